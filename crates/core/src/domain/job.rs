// Training Job Domain Model

use crate::domain::error::{DomainError, Result};
use crate::domain::subject::{SubjectKey, UserId};
use serde::{Deserialize, Serialize};

/// Local job ID (UUID v4)
pub type JobId = String;

/// Opaque job reference assigned by the training provider
pub type ProviderRef = String;

/// Job lifecycle status
///
/// Transitions: `Starting -> Succeeded` or `Starting -> Failed`. Nothing leaves a
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Starting,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }

    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Starting, JobStatus::Succeeded) | (JobStatus::Starting, JobStatus::Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Starting => write!(f, "STARTING"),
            JobStatus::Succeeded => write!(f, "SUCCEEDED"),
            JobStatus::Failed => write!(f, "FAILED"),
        }
    }
}

impl std::str::FromStr for JobStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "STARTING" => Ok(JobStatus::Starting),
            "SUCCEEDED" => Ok(JobStatus::Succeeded),
            "FAILED" => Ok(JobStatus::Failed),
            other => Err(DomainError::ValidationError(format!(
                "unknown job status: {}",
                other
            ))),
        }
    }
}

/// Parameters used to build the generation prompt once training completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptParams {
    pub trigger_word: String,
    pub gender: String,
    pub style_link: Option<String>,
}

impl PromptParams {
    /// Prompt sent to the generation provider
    pub fn prompt(&self) -> String {
        format!("{} is {}", self.trigger_word, self.gender)
    }
}

/// Training job entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingJob {
    pub id: JobId,
    pub owner: UserId,

    /// Set exactly once, after the provider accepts the submission
    pub provider_ref: Option<ProviderRef>,
    pub status: JobStatus,

    /// Provenance tag of the external model (trainer version, then trained output version)
    pub model_version: Option<String>,
    pub model_name: Option<String>,
    pub dataset_uri: String,
    pub prompt: PromptParams,

    /// Public artifact URIs, append-only
    pub artifacts: Vec<String>,

    pub created_at: i64, // epoch ms
    pub finished_at: Option<i64>,
}

impl TrainingJob {
    /// Create a new job in `Starting` status
    ///
    /// ID and timestamp are injected so tests stay deterministic.
    pub fn new(
        id: impl Into<String>,
        created_at: i64,
        owner: impl Into<String>,
        dataset_uri: impl Into<String>,
        prompt: PromptParams,
    ) -> Self {
        Self {
            id: id.into(),
            owner: owner.into(),
            provider_ref: None,
            status: JobStatus::Starting,
            model_version: None,
            model_name: None,
            dataset_uri: dataset_uri.into(),
            prompt,
            artifacts: Vec::new(),
            created_at,
            finished_at: None,
        }
    }

    /// Create a job already registered with the provider (tests only)
    pub fn new_test(owner: impl Into<String>, provider_ref: impl Into<String>) -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static TEST_COUNTER: AtomicU64 = AtomicU64::new(1);

        let counter = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
        let mut job = Self::new(
            format!("job-{}", counter),
            (counter * 1000) as i64,
            owner,
            "https://storage.example/dataset.zip",
            PromptParams {
                trigger_word: format!("{:09}", counter),
                gender: "woman".to_string(),
                style_link: None,
            },
        );
        job.provider_ref = Some(provider_ref.into());
        job
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Subject key this job is watched under for the given granularity
    pub fn subject(&self, granularity: crate::domain::WatchGranularity) -> SubjectKey {
        match granularity {
            crate::domain::WatchGranularity::PerJob => SubjectKey::Job(self.id.clone()),
            crate::domain::WatchGranularity::PerUser => SubjectKey::User(self.owner.clone()),
        }
    }

    /// Record the provider's job reference (one-time re-registration after submission)
    pub fn register_provider_ref(
        &mut self,
        provider_ref: impl Into<String>,
        model_version: Option<String>,
    ) -> Result<()> {
        if let Some(existing) = &self.provider_ref {
            return Err(DomainError::ProviderRefAlreadySet {
                job_id: self.id.clone(),
                existing: existing.clone(),
            });
        }
        self.provider_ref = Some(provider_ref.into());
        if model_version.is_some() {
            self.model_version = model_version;
        }
        Ok(())
    }

    /// Transition to Succeeded, appending the published artifact
    pub fn succeed(
        &mut self,
        artifact_uri: impl Into<String>,
        model_version: Option<String>,
        now_millis: i64,
    ) -> Result<()> {
        self.transition(JobStatus::Succeeded)?;
        self.artifacts.push(artifact_uri.into());
        if model_version.is_some() {
            self.model_version = model_version;
        }
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Transition to Failed
    pub fn fail(&mut self, now_millis: i64) -> Result<()> {
        self.transition(JobStatus::Failed)?;
        self.finished_at = Some(now_millis);
        Ok(())
    }

    /// Add an on-demand artifact to a trained model
    pub fn append_artifact(&mut self, artifact_uri: impl Into<String>) -> Result<()> {
        if self.status != JobStatus::Succeeded {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: JobStatus::Succeeded.to_string(),
            });
        }
        self.artifacts.push(artifact_uri.into());
        Ok(())
    }

    fn transition(&mut self, next: JobStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(DomainError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_job_starts_non_terminal() {
        let job = TrainingJob::new_test("user-1", "r8-abc");
        assert_eq!(job.status, JobStatus::Starting);
        assert!(!job.is_terminal());
        assert!(job.artifacts.is_empty());
    }

    #[test]
    fn test_succeed_appends_artifact() {
        let mut job = TrainingJob::new_test("user-1", "r8-abc");
        job.succeed("https://cdn/a.jpg", Some("v2".into()), 42).unwrap();

        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.artifacts, vec!["https://cdn/a.jpg".to_string()]);
        assert_eq!(job.model_version.as_deref(), Some("v2"));
        assert_eq!(job.finished_at, Some(42));
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let mut job = TrainingJob::new_test("user-1", "r8-abc");
        job.fail(1).unwrap();

        assert!(job.succeed("https://cdn/a.jpg", None, 2).is_err());
        assert!(job.fail(3).is_err());
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.artifacts.is_empty());
        assert_eq!(job.finished_at, Some(1));
    }

    #[test]
    fn test_append_artifact_only_after_success() {
        let mut job = TrainingJob::new_test("user-1", "r8-abc");
        assert!(job.append_artifact("https://cdn/early.jpg").is_err());

        job.succeed("https://cdn/a.jpg", None, 1).unwrap();
        job.append_artifact("https://cdn/b.jpg").unwrap();

        assert_eq!(job.artifacts, vec!["https://cdn/a.jpg", "https://cdn/b.jpg"]);
        assert_eq!(job.status, JobStatus::Succeeded);
    }

    #[test]
    fn test_provider_ref_registered_once() {
        let mut job = TrainingJob::new(
            "job-x",
            0,
            "user-1",
            "gs://data.zip",
            PromptParams {
                trigger_word: "123456789".into(),
                gender: "man".into(),
                style_link: None,
            },
        );
        job.register_provider_ref("r8-1", Some("trainer-v".into()))
            .unwrap();
        let err = job.register_provider_ref("r8-2", None).unwrap_err();

        assert!(err.to_string().contains("r8-1"));
        assert_eq!(job.provider_ref.as_deref(), Some("r8-1"));
    }

    #[test]
    fn test_status_parse_roundtrip_names() {
        for status in [JobStatus::Starting, JobStatus::Succeeded, JobStatus::Failed] {
            assert_eq!(status.to_string().parse::<JobStatus>().unwrap(), status);
        }
        assert!("RUNNING".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_prompt_format() {
        let params = PromptParams {
            trigger_word: "042424242".into(),
            gender: "woman".into(),
            style_link: Some("https://styles/1.jpg".into()),
        };
        assert_eq!(params.prompt(), "042424242 is woman");
    }
}
