// Watch subjects

use serde::{Deserialize, Serialize};

/// User identity (owner of jobs and credit balance)
pub type UserId = String;

/// Granularity at which watchers are de-duplicated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WatchGranularity {
    #[default]
    PerJob,
    PerUser,
}

impl std::str::FromStr for WatchGranularity {
    type Err = crate::domain::DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job" | "per_job" => Ok(WatchGranularity::PerJob),
            "user" | "per_user" => Ok(WatchGranularity::PerUser),
            other => Err(crate::domain::DomainError::ValidationError(format!(
                "unknown watch granularity: {}",
                other
            ))),
        }
    }
}

/// Key a watcher is registered under
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum SubjectKey {
    User(UserId),
    Job(String),
}

impl std::fmt::Display for SubjectKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubjectKey::User(id) => write!(f, "user:{}", id),
            SubjectKey::Job(id) => write!(f, "job:{}", id),
        }
    }
}
