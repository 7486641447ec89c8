// Port Layer - Interfaces for external dependencies

pub mod artifact_store;
pub mod credit_ledger;
pub mod id_provider; // For deterministic testing
pub mod job_repository;
pub mod pricing;
pub mod provider;
pub mod time_provider;

// Re-exports
pub use artifact_store::ArtifactStore;
pub use credit_ledger::CreditLedger;
pub use id_provider::IdProvider;
pub use job_repository::JobRepository;
pub use pricing::PricingRepository;
pub use provider::{
    GeneratedArtifact, GenerationProvider, GenerationRequest, ProviderError, ProviderJobState,
    TrainingProvider, TrainingSpec, TrainingStatus, TrainingSubmission,
};
pub use time_provider::TimeProvider;
