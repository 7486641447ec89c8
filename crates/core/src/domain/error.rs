// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid job status transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Job {job_id} already registered with provider ref {existing}")]
    ProviderRefAlreadySet { job_id: String, existing: String },

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;
