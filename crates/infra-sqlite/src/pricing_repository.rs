// SQLite PricingRepository Implementation

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use sqlx::SqlitePool;
use trainwatch_core::domain::Pricing;
use trainwatch_core::error::Result;
use trainwatch_core::port::credit_ledger::validate_amount;
use trainwatch_core::port::PricingRepository;

pub struct SqlitePricingRepository {
    pool: SqlitePool,
}

impl SqlitePricingRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace the pricing record (operator seeding; the core only reads it)
    pub async fn set(&self, pricing: Pricing) -> Result<()> {
        validate_amount(pricing.training_cost)?;
        validate_amount(pricing.generation_cost)?;
        sqlx::query(
            r#"
            INSERT INTO pricing (id, training_cost, generation_cost) VALUES (1, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                training_cost = excluded.training_cost,
                generation_cost = excluded.generation_cost
            "#,
        )
        .bind(pricing.training_cost)
        .bind(pricing.generation_cost)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}

#[async_trait]
impl PricingRepository for SqlitePricingRepository {
    async fn current(&self) -> Result<Option<Pricing>> {
        let row: Option<(i64, i64)> =
            sqlx::query_as("SELECT training_cost, generation_cost FROM pricing WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        Ok(row.map(|(training_cost, generation_cost)| Pricing {
            training_cost,
            generation_cost,
        }))
    }
}
