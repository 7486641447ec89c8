// Central Error Type for the Application

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Domain error: {0}")]
    Domain(#[from] crate::domain::DomainError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Provider error: {0}")]
    Provider(#[from] crate::port::ProviderError),

    /// Generation provider failure; the training itself is unaffected
    #[error("Generation failed: {0}")]
    Generation(crate::port::ProviderError),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Insufficient credits: required {required}, available {available}")]
    InsufficientCredits { required: i64, available: i64 },

    #[error("Pricing unavailable")]
    PricingUnavailable,

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Failure classification surfaced to owners and callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureKind {
    /// Retried on the next poll cycle
    Transient,
    /// Provider reported a terminal failure
    ProviderFailed,
    /// Generation provider refused or returned garbage; retried next cycle
    GenerationFailed,
    InsufficientCredits,
    Storage,
    Validation,
    NotFound,
    Internal,
}

impl FailureKind {
    /// Whether the job stays non-terminal and is retried next cycle
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Transient
                | FailureKind::GenerationFailed
                | FailureKind::InsufficientCredits
                | FailureKind::Storage
        )
    }
}

/// Typed failure report (kind + message), never a raw provider payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReport {
    pub kind: FailureKind,
    pub message: String,
}

impl AppError {
    pub fn kind(&self) -> FailureKind {
        use crate::port::ProviderError;

        match self {
            AppError::Provider(ProviderError::Transient(_)) => FailureKind::Transient,
            AppError::Provider(_) => FailureKind::ProviderFailed,
            AppError::Generation(ProviderError::Transient(_)) => FailureKind::Transient,
            AppError::Generation(_) => FailureKind::GenerationFailed,
            AppError::Database(_) | AppError::PricingUnavailable => FailureKind::Transient,
            AppError::Storage(_) => FailureKind::Storage,
            AppError::InsufficientCredits { .. } => FailureKind::InsufficientCredits,
            AppError::Validation(_) | AppError::Domain(_) => FailureKind::Validation,
            AppError::NotFound(_) => FailureKind::NotFound,
            AppError::Config(_) | AppError::InvalidState(_) | AppError::Internal(_) => {
                FailureKind::Internal
            }
        }
    }

    pub fn report(&self) -> FailureReport {
        FailureReport {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

// sqlx::Error conversion is handled in the infra-sqlite crate
// by converting to AppError::Database(String)
