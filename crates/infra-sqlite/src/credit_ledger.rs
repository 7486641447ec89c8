// SQLite CreditLedger Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::debug;
use trainwatch_core::domain::{DebitOutcome, UserId};
use trainwatch_core::error::{AppError, Result};
use trainwatch_core::port::credit_ledger::validate_amount;
use trainwatch_core::port::CreditLedger;

/// Balances live in `users.credits`; the CHECK constraint backs the
/// conditional decrement below.
pub struct SqliteCreditLedger {
    pool: SqlitePool,
}

impl SqliteCreditLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a user account with an opening balance (no-op if it exists)
    pub async fn open_account(&self, user: &UserId, opening_balance: i64) -> Result<()> {
        validate_amount(opening_balance)?;
        sqlx::query("INSERT INTO users (id, credits) VALUES (?, ?) ON CONFLICT (id) DO NOTHING")
            .bind(user)
            .bind(opening_balance)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl CreditLedger for SqliteCreditLedger {
    async fn balance(&self, user: &UserId) -> Result<i64> {
        sqlx::query_scalar::<_, i64>("SELECT credits FROM users WHERE id = ?")
            .bind(user)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))
    }

    async fn debit(&self, user: &UserId, amount: i64) -> Result<DebitOutcome> {
        validate_amount(amount)?;

        // Check and decrement in one statement
        let balance: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE users
            SET credits = credits - ?
            WHERE id = ? AND credits >= ?
            RETURNING credits
            "#,
        )
        .bind(amount)
        .bind(user)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        match balance {
            Some(balance) => {
                debug!(user = %user, amount, balance, "Credits debited");
                Ok(DebitOutcome::Debited { balance })
            }
            None => {
                let balance = self.balance(user).await?;
                debug!(user = %user, amount, balance, "Debit rejected");
                Ok(DebitOutcome::InsufficientFunds {
                    balance,
                    required: amount,
                })
            }
        }
    }

    async fn credit(&self, user: &UserId, amount: i64) -> Result<i64> {
        validate_amount(amount)?;

        let balance: Option<i64> =
            sqlx::query_scalar("UPDATE users SET credits = credits + ? WHERE id = ? RETURNING credits")
                .bind(amount)
                .bind(user)
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        balance.ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))
    }
}
