// Application Layer - Use Cases and Watch Orchestration

pub mod completion;
pub mod events;
pub mod generation;
pub mod recovery;
pub mod service;
pub mod submission;
pub mod watcher;

// Re-exports
pub use completion::{
    artifact_key, CompletionGuard, CompletionOutcome, CompletionSequence, OwnerLocks,
};
pub use events::{EventBus, WatchEvent};
pub use generation::{GenerateImageRequest, GeneratedImage, GenerationService};
pub use recovery::{RecoveryReport, WatcherRecovery};
pub use service::WatchService;
pub use submission::{SubmitTrainingRequest, SubmittedTraining, TrainingService};
pub use watcher::{WatcherConfig, WatcherState};
