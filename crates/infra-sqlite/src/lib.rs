// Trainwatch Infrastructure - SQLite Adapter
// Implements: JobRepository, CreditLedger, PricingRepository

mod connection;
mod credit_ledger;
mod error;
mod job_repository;
mod migration;
mod pricing_repository;

pub use connection::create_pool;
pub use credit_ledger::SqliteCreditLedger;
pub use job_repository::SqliteJobRepository;
pub use migration::run_migrations;
pub use pricing_repository::SqlitePricingRepository;

// Note: sqlx::Error conversion is handled by map_sqlx_error in `error`
// due to Rust's orphan rules (cannot implement From<sqlx::Error> for AppError here)
