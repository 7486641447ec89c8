// Trainwatch Infrastructure - HTTP Adapters
// Implements: TrainingProvider, GenerationProvider (Replicate), ArtifactStore (GCS)

mod error;
mod gcs;
mod replicate;

pub use gcs::{GcsArtifactStore, GCS_BASE_URL};
pub use replicate::{
    ReplicateGenerationProvider, ReplicateTrainingProvider, DEFAULT_TRAINER, REPLICATE_BASE_URL,
};
