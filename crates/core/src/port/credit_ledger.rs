// Credit Ledger Port

use crate::domain::{DebitOutcome, UserId};
use crate::error::Result;
use async_trait::async_trait;

/// Per-user non-negative credit balance
///
/// These are the only balance operations the core performs; payments and
/// invite redemption mutate balances elsewhere.
#[async_trait]
pub trait CreditLedger: Send + Sync {
    /// Current balance (`AppError::NotFound` for unknown users)
    async fn balance(&self, user: &UserId) -> Result<i64>;

    /// Atomic check-and-decrement; never drives the balance negative
    ///
    /// A rejected debit has no side effect.
    async fn debit(&self, user: &UserId, amount: i64) -> Result<DebitOutcome>;

    /// Atomic increment, returns the new balance
    async fn credit(&self, user: &UserId, amount: i64) -> Result<i64>;
}

/// Reject negative amounts before touching storage
pub fn validate_amount(amount: i64) -> Result<()> {
    if amount < 0 {
        return Err(crate::domain::DomainError::InvalidAmount(amount).into());
    }
    Ok(())
}

pub mod mocks {
    use super::*;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory ledger
    #[derive(Default)]
    pub struct InMemoryCreditLedger {
        balances: Mutex<HashMap<UserId, i64>>,
        debits: AtomicUsize,
    }

    impl InMemoryCreditLedger {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_balance(self, user: impl Into<String>, balance: i64) -> Self {
            self.balances.lock().unwrap().insert(user.into(), balance);
            self
        }

        pub fn set_balance(&self, user: impl Into<String>, balance: i64) {
            self.balances.lock().unwrap().insert(user.into(), balance);
        }

        /// Number of successful debits
        pub fn debit_count(&self) -> usize {
            self.debits.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CreditLedger for InMemoryCreditLedger {
        async fn balance(&self, user: &UserId) -> Result<i64> {
            self.balances
                .lock()
                .unwrap()
                .get(user)
                .copied()
                .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))
        }

        async fn debit(&self, user: &UserId, amount: i64) -> Result<DebitOutcome> {
            validate_amount(amount)?;
            let mut balances = self.balances.lock().unwrap();
            let balance = balances
                .get_mut(user)
                .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))?;
            if *balance < amount {
                return Ok(DebitOutcome::InsufficientFunds {
                    balance: *balance,
                    required: amount,
                });
            }
            *balance -= amount;
            self.debits.fetch_add(1, Ordering::SeqCst);
            Ok(DebitOutcome::Debited { balance: *balance })
        }

        async fn credit(&self, user: &UserId, amount: i64) -> Result<i64> {
            validate_amount(amount)?;
            let mut balances = self.balances.lock().unwrap();
            let balance = balances
                .get_mut(user)
                .ok_or_else(|| AppError::NotFound(format!("User {} not found", user)))?;
            *balance += amount;
            Ok(*balance)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mocks::InMemoryCreditLedger;
    use super::*;

    #[tokio::test]
    async fn test_debit_rejected_without_side_effect() {
        let ledger = InMemoryCreditLedger::new().with_balance("u1", 5);
        let user = "u1".to_string();

        let outcome = ledger.debit(&user, 7).await.unwrap();
        assert_eq!(
            outcome,
            DebitOutcome::InsufficientFunds {
                balance: 5,
                required: 7
            }
        );
        assert_eq!(ledger.balance(&user).await.unwrap(), 5);
        assert_eq!(ledger.debit_count(), 0);
    }

    #[tokio::test]
    async fn test_negative_amount_rejected() {
        let ledger = InMemoryCreditLedger::new().with_balance("u1", 5);
        let user = "u1".to_string();

        assert!(ledger.debit(&user, -1).await.is_err());
        assert!(ledger.credit(&user, -1).await.is_err());
        assert_eq!(ledger.balance(&user).await.unwrap(), 5);
    }
}
