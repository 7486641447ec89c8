// External Provider Ports
// Training provider (submit + pull status) and generation provider (derived artifact)

use crate::domain::{PromptParams, ProviderRef, UserId};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by external providers and the artifact store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Network failure, timeout, 429 or 5xx. Retried on the next poll cycle.
    #[error("transient provider failure: {0}")]
    Transient(String),

    /// Request refused (4xx other than 429)
    #[error("provider rejected request (status {status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response could not be interpreted
    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// What gets submitted for training
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSpec {
    pub owner: UserId,
    /// Destination model name (unique per submission)
    pub model_name: String,
    pub dataset_uri: String,
    pub trigger_word: String,
}

/// Provider acknowledgement of a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingSubmission {
    pub provider_ref: ProviderRef,
    pub model_version: Option<String>,
}

/// Provider-side job state, normalised
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderJobState {
    InProgress,
    Succeeded,
    Failed,
}

/// Result of a status poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainingStatus {
    pub state: ProviderJobState,
    /// Version of the trained model, present once succeeded
    pub output_version: Option<String>,
}

impl TrainingStatus {
    pub fn in_progress() -> Self {
        Self {
            state: ProviderJobState::InProgress,
            output_version: None,
        }
    }

    pub fn succeeded(output_version: impl Into<String>) -> Self {
        Self {
            state: ProviderJobState::Succeeded,
            output_version: Some(output_version.into()),
        }
    }

    pub fn failed() -> Self {
        Self {
            state: ProviderJobState::Failed,
            output_version: None,
        }
    }
}

#[async_trait]
pub trait TrainingProvider: Send + Sync {
    async fn submit_training(
        &self,
        spec: &TrainingSpec,
    ) -> Result<TrainingSubmission, ProviderError>;

    async fn get_status(&self, provider_ref: &ProviderRef) -> Result<TrainingStatus, ProviderError>;
}

/// Input to the generation provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    /// Trained model version to run
    pub model_version: String,
    /// Rendered prompt text
    pub prompt: String,
    /// Optional style image passed alongside the prompt
    pub style_link: Option<String>,
}

impl GenerationRequest {
    /// Portrait a freshly trained model renders on completion
    pub fn for_completion(model_version: String, params: &PromptParams) -> Self {
        Self {
            model_version,
            prompt: params.prompt(),
            style_link: params.style_link.clone(),
        }
    }
}

/// Generation output: inline bytes or a URI to download from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GeneratedArtifact {
    Bytes { data: Vec<u8>, content_type: String },
    Uri(String),
}

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn generate(&self, request: &GenerationRequest)
        -> Result<GeneratedArtifact, ProviderError>;

    /// Fetch bytes of an artifact the provider returned by URI
    async fn download(&self, uri: &str) -> Result<Vec<u8>, ProviderError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// One scripted poll response
    #[derive(Debug, Clone)]
    pub enum ScriptedPoll {
        Status(TrainingStatus),
        Error(ProviderError),
    }

    /// Training provider answering polls from a per-job script
    ///
    /// Each poll pops the next entry; the last entry repeats forever.
    /// Unscripted references report `InProgress`.
    #[derive(Default)]
    pub struct ScriptedTrainingProvider {
        scripts: Mutex<HashMap<ProviderRef, VecDeque<ScriptedPoll>>>,
        polls: Mutex<HashMap<ProviderRef, usize>>,
        submissions: Mutex<Vec<TrainingSpec>>,
        submit_error: Mutex<Option<ProviderError>>,
        counter: AtomicUsize,
    }

    impl ScriptedTrainingProvider {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn script(&self, provider_ref: impl Into<String>, polls: Vec<ScriptedPoll>) {
            self.scripts
                .lock()
                .unwrap()
                .insert(provider_ref.into(), polls.into());
        }

        /// Report InProgress `pending` times, then succeed with `version`
        pub fn succeed_after(&self, provider_ref: impl Into<String>, pending: usize, version: &str) {
            let mut polls = vec![ScriptedPoll::Status(TrainingStatus::in_progress()); pending];
            polls.push(ScriptedPoll::Status(TrainingStatus::succeeded(version)));
            self.script(provider_ref, polls);
        }

        /// Report InProgress `pending` times, then fail
        pub fn fail_after(&self, provider_ref: impl Into<String>, pending: usize) {
            let mut polls = vec![ScriptedPoll::Status(TrainingStatus::in_progress()); pending];
            polls.push(ScriptedPoll::Status(TrainingStatus::failed()));
            self.script(provider_ref, polls);
        }

        pub fn reject_submissions(&self, error: ProviderError) {
            *self.submit_error.lock().unwrap() = Some(error);
        }

        pub fn poll_count(&self, provider_ref: &str) -> usize {
            self.polls
                .lock()
                .unwrap()
                .get(provider_ref)
                .copied()
                .unwrap_or(0)
        }

        pub fn submissions(&self) -> Vec<TrainingSpec> {
            self.submissions.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TrainingProvider for ScriptedTrainingProvider {
        async fn submit_training(
            &self,
            spec: &TrainingSpec,
        ) -> Result<TrainingSubmission, ProviderError> {
            if let Some(err) = self.submit_error.lock().unwrap().clone() {
                return Err(err);
            }
            self.submissions.lock().unwrap().push(spec.clone());
            let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TrainingSubmission {
                provider_ref: format!("training-{}", n),
                model_version: Some("trainer-version".to_string()),
            })
        }

        async fn get_status(
            &self,
            provider_ref: &ProviderRef,
        ) -> Result<TrainingStatus, ProviderError> {
            *self
                .polls
                .lock()
                .unwrap()
                .entry(provider_ref.clone())
                .or_insert(0) += 1;

            let mut scripts = self.scripts.lock().unwrap();
            let next = match scripts.get_mut(provider_ref) {
                Some(queue) if queue.len() > 1 => queue.pop_front(),
                Some(queue) => queue.front().cloned(),
                None => None,
            };
            match next {
                Some(ScriptedPoll::Status(status)) => Ok(status),
                Some(ScriptedPoll::Error(err)) => Err(err),
                None => Ok(TrainingStatus::in_progress()),
            }
        }
    }

    /// Generation provider returning fixed bytes
    pub struct MockGenerationProvider {
        output: GeneratedArtifact,
        delay: Duration,
        failures: AtomicUsize,
        rejections: AtomicUsize,
        calls: AtomicUsize,
        downloads: AtomicUsize,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    impl MockGenerationProvider {
        pub fn new() -> Self {
            Self::with_output(GeneratedArtifact::Bytes {
                data: b"webp-bytes".to_vec(),
                content_type: "image/webp".to_string(),
            })
        }

        pub fn with_output(output: GeneratedArtifact) -> Self {
            Self {
                output,
                delay: Duration::ZERO,
                failures: AtomicUsize::new(0),
                rejections: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
                downloads: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
            }
        }

        /// Sleep this long inside every generate call
        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = delay;
            self
        }

        /// Fail the next `n` generate calls with a transient error
        pub fn fail_next(&self, n: usize) {
            self.failures.store(n, Ordering::SeqCst);
        }

        /// Reject the next `n` generate calls as a content-filter 422 would
        pub fn reject_next(&self, n: usize) {
            self.rejections.store(n, Ordering::SeqCst);
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn download_count(&self) -> usize {
            self.downloads.load(Ordering::SeqCst)
        }

        pub fn requests(&self) -> Vec<GenerationRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Default for MockGenerationProvider {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl GenerationProvider for MockGenerationProvider {
        async fn generate(
            &self,
            request: &GenerationRequest,
        ) -> Result<GeneratedArtifact, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requests.lock().unwrap().push(request.clone());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self
                .rejections
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ProviderError::Rejected {
                    status: 422,
                    message: "prediction failed".to_string(),
                });
            }
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(ProviderError::Transient("generation unavailable".to_string()));
            }
            Ok(self.output.clone())
        }

        async fn download(&self, uri: &str) -> Result<Vec<u8>, ProviderError> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            Ok(format!("downloaded:{}", uri).into_bytes())
        }
    }
}
