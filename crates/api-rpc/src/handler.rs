//! RPC Method Handlers
//!
//! Thin adapters from RPC parameters onto the application services.

use crate::error::to_rpc_error;
use crate::types::{
    BalanceRequest, BalanceResponse, GenerateImageRequest, GeneratedImage, JobGetRequest,
    JobGetResponse, JobListRequest, JobListResponse, SubmitTrainingRequest, SubmittedTraining,
    WatchRequest, WatchStartResponse, WatchStopResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use std::sync::Arc;
use tracing::info;
use trainwatch_core::application::{GenerationService, TrainingService, WatchService};
use trainwatch_core::error::AppError;
use trainwatch_core::port::{CreditLedger, JobRepository};

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    training: Arc<TrainingService>,
    generation: Arc<GenerationService>,
    watch: WatchService,
    job_repo: Arc<dyn JobRepository>,
    ledger: Arc<dyn CreditLedger>,
}

impl RpcHandler {
    pub fn new(
        training: Arc<TrainingService>,
        generation: Arc<GenerationService>,
        watch: WatchService,
        job_repo: Arc<dyn JobRepository>,
        ledger: Arc<dyn CreditLedger>,
    ) -> Self {
        Self {
            training,
            generation,
            watch,
            job_repo,
            ledger,
        }
    }

    /// training.submit.v1
    pub async fn submit_training(
        &self,
        params: SubmitTrainingRequest,
    ) -> Result<SubmittedTraining, ErrorObjectOwned> {
        info!(owner = %params.owner, "training.submit.v1");
        self.training.submit(params).await.map_err(to_rpc_error)
    }

    /// generation.create.v1
    pub async fn generate_image(
        &self,
        params: GenerateImageRequest,
    ) -> Result<GeneratedImage, ErrorObjectOwned> {
        info!(owner = %params.owner, job_id = %params.job_id, "generation.create.v1");
        self.generation.generate(params).await.map_err(to_rpc_error)
    }

    /// watch.start.v1
    pub fn start_watch(&self, params: WatchRequest) -> WatchStartResponse {
        let started = self.watch.start_watching(params.subject.clone());
        WatchStartResponse {
            subject: params.subject,
            started,
        }
    }

    /// watch.stop.v1
    pub fn stop_watch(&self, params: WatchRequest) -> WatchStopResponse {
        let stopped = self.watch.stop_watching(&params.subject);
        WatchStopResponse {
            subject: params.subject,
            stopped,
        }
    }

    /// job.get.v1
    pub async fn get_job(&self, params: JobGetRequest) -> Result<JobGetResponse, ErrorObjectOwned> {
        let job = self
            .job_repo
            .find_by_id(&params.job_id)
            .await
            .map_err(to_rpc_error)?
            .ok_or_else(|| {
                to_rpc_error(AppError::NotFound(format!("Job {} not found", params.job_id)))
            })?;

        let watching = self.watch.is_watching(&job.subject(self.watch.granularity()));
        Ok(JobGetResponse { job, watching })
    }

    /// job.list.v1
    pub async fn list_jobs(
        &self,
        params: JobListRequest,
    ) -> Result<JobListResponse, ErrorObjectOwned> {
        let jobs = self
            .job_repo
            .find_by_owner(&params.owner)
            .await
            .map_err(to_rpc_error)?;
        Ok(JobListResponse {
            owner: params.owner,
            jobs,
        })
    }

    /// credits.balance.v1
    pub async fn balance(&self, params: BalanceRequest) -> Result<BalanceResponse, ErrorObjectOwned> {
        let balance = self
            .ledger
            .balance(&params.user_id)
            .await
            .map_err(to_rpc_error)?;
        Ok(BalanceResponse {
            user_id: params.user_id,
            balance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use std::time::Duration;
    use trainwatch_core::application::{CompletionSequence, WatcherConfig};
    use trainwatch_core::domain::TrainingJob;
    use trainwatch_core::domain::{JobStatus, SubjectKey, WatchGranularity};
    use trainwatch_core::port::artifact_store::mocks::InMemoryArtifactStore;
    use trainwatch_core::port::credit_ledger::mocks::InMemoryCreditLedger;
    use trainwatch_core::port::id_provider::mocks::SequentialIdProvider;
    use trainwatch_core::port::job_repository::mocks::InMemoryJobRepository;
    use trainwatch_core::port::pricing::mocks::FixedPricing;
    use trainwatch_core::port::provider::mocks::{MockGenerationProvider, ScriptedTrainingProvider};
    use trainwatch_core::port::time_provider::mocks::ManualTimeProvider;

    struct Fixture {
        handler: RpcHandler,
        watch: WatchService,
        repo: Arc<InMemoryJobRepository>,
    }

    fn fixture(balance: i64) -> Fixture {
        let repo = Arc::new(InMemoryJobRepository::new());
        let ledger = Arc::new(InMemoryCreditLedger::new().with_balance("alice", balance));
        let pricing = Arc::new(FixedPricing::new(300, 7));
        let training = Arc::new(ScriptedTrainingProvider::new());
        let time = Arc::new(ManualTimeProvider::new(0));
        let generator = Arc::new(MockGenerationProvider::new());
        let store = Arc::new(InMemoryArtifactStore::new());
        let completion = Arc::new(CompletionSequence::new(
            repo.clone(),
            ledger.clone(),
            pricing.clone(),
            generator.clone(),
            store.clone(),
            time.clone(),
        ));
        let generation = Arc::new(GenerationService::new(
            repo.clone(),
            ledger.clone(),
            pricing.clone(),
            generator,
            store,
            completion.owner_locks(),
            Arc::new(SequentialIdProvider::new("img")),
            time.clone(),
        ));
        let watch = WatchService::new(
            WatcherConfig {
                poll_interval: Duration::from_secs(300),
                granularity: WatchGranularity::PerUser,
            },
            repo.clone(),
            training.clone(),
            completion,
            time.clone(),
        );
        let service = Arc::new(TrainingService::new(
            repo.clone(),
            ledger.clone(),
            pricing,
            training,
            watch.clone(),
            Arc::new(SequentialIdProvider::new("job")),
            time,
        ));
        Fixture {
            handler: RpcHandler::new(service, generation, watch.clone(), repo.clone(), ledger),
            watch,
            repo,
        }
    }

    fn handler(balance: i64) -> (RpcHandler, WatchService) {
        let f = fixture(balance);
        (f.handler, f.watch)
    }

    fn submit_request() -> SubmitTrainingRequest {
        SubmitTrainingRequest {
            owner: "alice".into(),
            dataset_uri: "https://storage.example/alice.zip".into(),
            gender: "man".into(),
            style_link: None,
            model_name: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_then_get_job() {
        let (handler, watch) = handler(1_000);

        let submitted = handler.submit_training(submit_request()).await.unwrap();
        let fetched = handler
            .get_job(JobGetRequest {
                job_id: submitted.job_id.clone(),
            })
            .await
            .unwrap();

        assert_eq!(fetched.job.status, JobStatus::Starting);
        assert!(fetched.watching);
        let balance = handler
            .balance(BalanceRequest {
                user_id: "alice".into(),
            })
            .await
            .unwrap();
        assert_eq!(balance.balance, 700);

        watch.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_submit_without_credit_maps_error_code() {
        let (handler, _watch) = handler(10);
        let err = handler.submit_training(submit_request()).await.unwrap_err();
        assert_eq!(err.code(), code::INSUFFICIENT_CREDITS);
    }

    #[tokio::test]
    async fn test_unknown_job_and_user() {
        let (handler, _watch) = handler(10);
        let err = handler
            .get_job(JobGetRequest {
                job_id: "nope".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);

        let err = handler
            .balance(BalanceRequest {
                user_id: "mallory".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);
    }

    #[tokio::test(start_paused = true)]
    async fn test_watch_start_and_stop() {
        let (handler, _watch) = handler(10);
        let subject = SubjectKey::User("alice".into());

        assert!(handler.start_watch(WatchRequest { subject: subject.clone() }).started);
        assert!(!handler.start_watch(WatchRequest { subject: subject.clone() }).started);
        assert!(handler.stop_watch(WatchRequest { subject: subject.clone() }).stopped);
        assert!(!handler.stop_watch(WatchRequest { subject }).stopped);
    }

    #[tokio::test]
    async fn test_generate_image_on_trained_job() {
        let f = fixture(10);
        let job = TrainingJob::new_test("alice", "r8-done");
        f.repo.insert(&job).await.unwrap();
        f.repo
            .commit_success(&job.id, "mem://first.jpg", Some("lora-v1"), 1)
            .await
            .unwrap();

        let image = f
            .handler
            .generate_image(GenerateImageRequest {
                owner: "alice".into(),
                job_id: job.id.clone(),
                prompt: "in a spacesuit".into(),
            })
            .await
            .unwrap();
        assert_eq!(image.balance, 3);

        let err = f
            .handler
            .generate_image(GenerateImageRequest {
                owner: "alice".into(),
                job_id: job.id.clone(),
                prompt: "again".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::INSUFFICIENT_CREDITS);
    }

    #[tokio::test]
    async fn test_list_jobs_by_owner() {
        let f = fixture(10);
        let first = TrainingJob::new_test("alice", "r8-a");
        let second = TrainingJob::new_test("alice", "r8-b");
        let other = TrainingJob::new_test("bob", "r8-c");
        for job in [&first, &second, &other] {
            f.repo.insert(job).await.unwrap();
        }
        f.repo.mark_failed(&first.id, 5).await.unwrap();

        let listed = f
            .handler
            .list_jobs(JobListRequest {
                owner: "alice".into(),
            })
            .await
            .unwrap();

        assert_eq!(listed.owner, "alice");
        assert_eq!(listed.jobs.len(), 2);
        assert_eq!(listed.jobs[0].id, first.id);
        assert_eq!(listed.jobs[0].status, JobStatus::Failed);
        assert_eq!(listed.jobs[1].id, second.id);
    }
}
