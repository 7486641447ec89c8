//! RPC Request/Response Types

use serde::{Deserialize, Serialize};
use trainwatch_core::domain::{SubjectKey, TrainingJob};

/// training.submit.v1 takes `SubmitTrainingRequest` and returns `SubmittedTraining`
pub use trainwatch_core::application::{SubmitTrainingRequest, SubmittedTraining};

/// generation.create.v1 takes `GenerateImageRequest` and returns `GeneratedImage`
pub use trainwatch_core::application::{GenerateImageRequest, GeneratedImage};

/// watch.start.v1 / watch.stop.v1 - `{"subject": {"kind": "user", "id": "alice"}}`
#[derive(Debug, Deserialize)]
pub struct WatchRequest {
    pub subject: SubjectKey,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchStartResponse {
    pub subject: SubjectKey,
    /// False if a live watcher already existed
    pub started: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchStopResponse {
    pub subject: SubjectKey,
    pub stopped: bool,
}

/// job.get.v1
#[derive(Debug, Deserialize)]
pub struct JobGetRequest {
    pub job_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobGetResponse {
    pub job: TrainingJob,
    /// Whether a watcher is live for the job's subject
    pub watching: bool,
}

/// job.list.v1
#[derive(Debug, Deserialize)]
pub struct JobListRequest {
    pub owner: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobListResponse {
    pub owner: String,
    /// Oldest first, any status
    pub jobs: Vec<TrainingJob>,
}

/// credits.balance.v1
#[derive(Debug, Deserialize)]
pub struct BalanceRequest {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub user_id: String,
    pub balance: i64,
}
