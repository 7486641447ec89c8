// Training submission - create, charge, submit, then watch

use crate::application::service::WatchService;
use crate::domain::{DebitOutcome, JobId, PromptParams, ProviderRef, TrainingJob, UserId};
use crate::error::{AppError, Result};
use crate::port::{
    CreditLedger, IdProvider, JobRepository, PricingRepository, TimeProvider, TrainingProvider,
    TrainingSpec,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitTrainingRequest {
    pub owner: UserId,
    pub dataset_uri: String,
    pub gender: String,
    #[serde(default)]
    pub style_link: Option<String>,
    #[serde(default)]
    pub model_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmittedTraining {
    pub job_id: JobId,
    pub provider_ref: ProviderRef,
    /// False if a watcher for the subject was already running
    pub watcher_started: bool,
    pub balance: i64,
}

pub fn validate_request(req: &SubmitTrainingRequest) -> Result<()> {
    if req.owner.trim().is_empty() {
        return Err(AppError::Validation("owner must not be empty".to_string()));
    }
    if req.dataset_uri.trim().is_empty() {
        return Err(AppError::Validation(
            "dataset_uri must not be empty".to_string(),
        ));
    }
    if req.gender.trim().is_empty() {
        return Err(AppError::Validation("gender must not be empty".to_string()));
    }
    if let Some(name) = &req.model_name {
        if name.trim().is_empty() {
            return Err(AppError::Validation(
                "model_name must not be blank".to_string(),
            ));
        }
    }
    Ok(())
}

pub struct TrainingService {
    job_repo: Arc<dyn JobRepository>,
    ledger: Arc<dyn CreditLedger>,
    pricing: Arc<dyn PricingRepository>,
    training: Arc<dyn TrainingProvider>,
    watch: WatchService,
    ids: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl TrainingService {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        ledger: Arc<dyn CreditLedger>,
        pricing: Arc<dyn PricingRepository>,
        training: Arc<dyn TrainingProvider>,
        watch: WatchService,
        ids: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            ledger,
            pricing,
            training,
            watch,
            ids,
            time_provider,
        }
    }

    /// Submit a training for `req.owner` and start watching it
    ///
    /// The balance must cover the training and the later generation up front;
    /// only the training cost is debited here.
    pub async fn submit(&self, req: SubmitTrainingRequest) -> Result<SubmittedTraining> {
        validate_request(&req)?;

        let pricing = self.pricing.current().await?.unwrap_or_default();
        let required = pricing.submission_requirement();
        let available = self.ledger.balance(&req.owner).await?;
        if available < required {
            return Err(AppError::InsufficientCredits {
                required,
                available,
            });
        }

        let job_id = self.ids.generate_id();
        let prompt = PromptParams {
            trigger_word: self.ids.generate_trigger_word(),
            gender: req.gender.clone(),
            style_link: req.style_link.clone(),
        };
        let mut job = TrainingJob::new(
            job_id,
            self.time_provider.now_millis(),
            req.owner.clone(),
            req.dataset_uri.clone(),
            prompt,
        );
        job.model_name = req.model_name.clone();
        self.job_repo.insert(&job).await?;
        info!(job_id = %job.id, owner = %job.owner, "Training job created");

        let balance = match self.ledger.debit(&job.owner, pricing.training_cost).await {
            Ok(DebitOutcome::Debited { balance }) => balance,
            Ok(DebitOutcome::InsufficientFunds { balance, required }) => {
                // Drained between the check and the debit
                self.abandon(&job).await;
                return Err(AppError::InsufficientCredits {
                    required,
                    available: balance,
                });
            }
            Err(e) => {
                self.abandon(&job).await;
                return Err(e);
            }
        };

        let spec = TrainingSpec {
            owner: job.owner.clone(),
            model_name: job.model_name.clone().unwrap_or_else(|| job.id.clone()),
            dataset_uri: job.dataset_uri.clone(),
            trigger_word: job.prompt.trigger_word.clone(),
        };
        let submission = match self.training.submit_training(&spec).await {
            Ok(submission) => submission,
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Training submission failed, refunding");
                self.refund(&job, pricing.training_cost).await;
                self.abandon(&job).await;
                return Err(e.into());
            }
        };

        job.register_provider_ref(submission.provider_ref.clone(), submission.model_version)?;
        if let Err(e) = self.job_repo.update(&job).await {
            // Without a stored provider_ref nothing can ever watch this job
            error!(
                job_id = %job.id,
                provider_ref = %submission.provider_ref,
                error = %e,
                "Failed to record provider reference, refunding"
            );
            self.refund(&job, pricing.training_cost).await;
            self.abandon(&job).await;
            return Err(e);
        }
        info!(
            job_id = %job.id,
            provider_ref = %submission.provider_ref,
            "Training submitted"
        );

        let watcher_started = self.watch.watch_job(&job);
        Ok(SubmittedTraining {
            job_id: job.id,
            provider_ref: submission.provider_ref,
            watcher_started,
            balance,
        })
    }

    async fn refund(&self, job: &TrainingJob, amount: i64) {
        if let Err(e) = self.ledger.credit(&job.owner, amount).await {
            error!(job_id = %job.id, amount = amount, error = %e, "Refund failed");
        }
    }

    async fn abandon(&self, job: &TrainingJob) {
        let now = self.time_provider.now_millis();
        if let Err(e) = self.job_repo.mark_failed(&job.id, now).await {
            error!(job_id = %job.id, error = %e, "Failed to mark abandoned job");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::completion::CompletionSequence;
    use crate::application::watcher::WatcherConfig;
    use crate::domain::{JobStatus, SubjectKey, WatchGranularity};
    use crate::error::FailureKind;
    use crate::port::artifact_store::mocks::InMemoryArtifactStore;
    use crate::port::credit_ledger::mocks::InMemoryCreditLedger;
    use crate::port::id_provider::mocks::SequentialIdProvider;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::pricing::mocks::FixedPricing;
    use crate::port::provider::mocks::{MockGenerationProvider, ScriptedTrainingProvider};
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use crate::port::ProviderError;

    struct Harness {
        repo: Arc<InMemoryJobRepository>,
        ledger: Arc<InMemoryCreditLedger>,
        pricing: Arc<FixedPricing>,
        training: Arc<ScriptedTrainingProvider>,
        watch: WatchService,
        service: TrainingService,
    }

    fn harness(balance: i64) -> Harness {
        let repo = Arc::new(InMemoryJobRepository::new());
        let ledger = Arc::new(InMemoryCreditLedger::new().with_balance("alice", balance));
        let pricing = Arc::new(FixedPricing::new(300, 7));
        let training = Arc::new(ScriptedTrainingProvider::new());
        let time = Arc::new(ManualTimeProvider::new(5_000));
        let completion = Arc::new(CompletionSequence::new(
            repo.clone(),
            ledger.clone(),
            pricing.clone(),
            Arc::new(MockGenerationProvider::new()),
            Arc::new(InMemoryArtifactStore::new()),
            time.clone(),
        ));
        let watch = WatchService::new(
            WatcherConfig {
                poll_interval: std::time::Duration::from_secs(300),
                granularity: WatchGranularity::PerJob,
            },
            repo.clone(),
            training.clone(),
            completion,
            time.clone(),
        );
        let service = TrainingService::new(
            repo.clone(),
            ledger.clone(),
            pricing.clone(),
            training.clone(),
            watch.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            time,
        );
        Harness {
            repo,
            ledger,
            pricing,
            training,
            watch,
            service,
        }
    }

    fn request() -> SubmitTrainingRequest {
        SubmitTrainingRequest {
            owner: "alice".to_string(),
            dataset_uri: "https://storage.example/alice.zip".to_string(),
            gender: "woman".to_string(),
            style_link: None,
            model_name: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_debits_training_and_starts_watcher() {
        let h = harness(400);

        let submitted = h.service.submit(request()).await.unwrap();

        assert_eq!(submitted.balance, 100);
        assert!(submitted.watcher_started);
        let job = h.repo.get(&submitted.job_id).unwrap();
        assert_eq!(job.status, JobStatus::Starting);
        assert_eq!(job.provider_ref.as_deref(), Some(submitted.provider_ref.as_str()));
        assert_eq!(job.model_version.as_deref(), Some("trainer-version"));
        assert_eq!(job.prompt.trigger_word.len(), 9);
        assert!(h.watch.is_watching(&SubjectKey::Job(job.id.clone())));

        let specs = h.training.submissions();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].model_name, job.id);
        assert_eq!(specs[0].trigger_word, job.prompt.trigger_word);

        h.watch.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_submit_requires_training_plus_generation_cost() {
        let h = harness(306);

        let err = h.service.submit(request()).await.unwrap_err();

        assert!(matches!(
            err,
            AppError::InsufficientCredits {
                required: 307,
                available: 306
            }
        ));
        assert!(h.training.submissions().is_empty());
        assert_eq!(h.ledger.debit_count(), 0);
    }

    #[tokio::test]
    async fn test_provider_rejection_refunds_and_fails_job() {
        let h = harness(400);
        h.training.reject_submissions(ProviderError::Rejected {
            status: 422,
            message: "invalid dataset".into(),
        });

        let err = h.service.submit(request()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::ProviderFailed);
        assert_eq!(h.ledger.balance(&"alice".to_string()).await.unwrap(), 400);
        assert!(h.watch.active_subjects().is_empty());
        let failed = h.repo.get("job-1").unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.provider_ref.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_pricing_falls_back_to_defaults() {
        let h = harness(307);
        h.pricing.set(None);

        let submitted = h.service.submit(request()).await.unwrap();
        assert_eq!(submitted.balance, 7);

        h.watch.shutdown(std::time::Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_validation_rejects_blank_fields() {
        let h = harness(400);
        let mut req = request();
        req.gender = "  ".to_string();

        let err = h.service.submit(req).await.unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert!(h.repo.get("job-1").is_none());
    }

    #[tokio::test]
    async fn test_unrecorded_provider_ref_refunds_and_fails_job() {
        let h = harness(400);
        h.repo.fail_next_updates(1);

        let err = h.service.submit(request()).await.unwrap_err();

        assert_eq!(err.kind(), FailureKind::Transient);
        assert_eq!(h.training.submissions().len(), 1);
        assert_eq!(h.ledger.balance(&"alice".to_string()).await.unwrap(), 400);
        assert_eq!(h.repo.get("job-1").unwrap().status, JobStatus::Failed);
        assert!(h.watch.active_subjects().is_empty());
    }
}
