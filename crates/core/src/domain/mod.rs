// Domain Layer - Pure business logic and entities

pub mod credit;
pub mod error;
pub mod job;
pub mod subject;

// Re-exports
pub use credit::{DebitOutcome, Pricing};
pub use error::DomainError;
pub use job::{JobId, JobStatus, PromptParams, ProviderRef, TrainingJob};
pub use subject::{SubjectKey, UserId, WatchGranularity};
