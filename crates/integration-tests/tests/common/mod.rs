//! Shared wiring: SQLite in-memory store and ledger, scripted providers

#![allow(dead_code)]

use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use trainwatch_core::application::{
    CompletionSequence, GenerationService, WatchEvent, WatchService, WatcherConfig,
};
use trainwatch_core::domain::{Pricing, TrainingJob, WatchGranularity};
use trainwatch_core::port::artifact_store::mocks::InMemoryArtifactStore;
use trainwatch_core::port::provider::mocks::{MockGenerationProvider, ScriptedTrainingProvider};
use trainwatch_core::port::id_provider::mocks::SequentialIdProvider;
use trainwatch_core::port::time_provider::SystemTimeProvider;
use trainwatch_core::port::{CreditLedger, JobRepository};
use trainwatch_infra_sqlite::{
    create_pool, run_migrations, SqliteCreditLedger, SqliteJobRepository,
    SqlitePricingRepository,
};

pub const POLL_INTERVAL: Duration = Duration::from_millis(20);
pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);
pub const TRAINING_COST: i64 = 300;
pub const GENERATION_COST: i64 = 7;

pub struct Stack {
    pub pool: SqlitePool,
    pub repo: Arc<SqliteJobRepository>,
    pub ledger: Arc<SqliteCreditLedger>,
    pub training: Arc<ScriptedTrainingProvider>,
    pub generator: Arc<MockGenerationProvider>,
    pub artifacts: Arc<InMemoryArtifactStore>,
    pub watch: WatchService,
    pub generation: GenerationService,
}

pub async fn memory_pool() -> SqlitePool {
    let pool = create_pool("sqlite::memory:").await.unwrap();
    run_migrations(&pool).await.unwrap();
    let pricing = SqlitePricingRepository::new(pool.clone());
    pricing
        .set(Pricing {
            training_cost: TRAINING_COST,
            generation_cost: GENERATION_COST,
        })
        .await
        .unwrap();
    pool
}

impl Stack {
    pub async fn new(granularity: WatchGranularity) -> Self {
        Self::on_pool(memory_pool().await, granularity)
    }

    /// Fresh services over an existing database (a daemon restart)
    pub fn on_pool(pool: SqlitePool, granularity: WatchGranularity) -> Self {
        Self::with_generator(pool, granularity, MockGenerationProvider::new())
    }

    pub fn with_generator(
        pool: SqlitePool,
        granularity: WatchGranularity,
        generator: MockGenerationProvider,
    ) -> Self {
        let repo = Arc::new(SqliteJobRepository::new(pool.clone()));
        let ledger = Arc::new(SqliteCreditLedger::new(pool.clone()));
        let training = Arc::new(ScriptedTrainingProvider::new());
        let generator = Arc::new(generator);
        let artifacts = Arc::new(InMemoryArtifactStore::new());
        let time = Arc::new(SystemTimeProvider);

        let completion = Arc::new(CompletionSequence::new(
            repo.clone(),
            ledger.clone(),
            Arc::new(SqlitePricingRepository::new(pool.clone())),
            generator.clone(),
            artifacts.clone(),
            time.clone(),
        ));
        let generation = GenerationService::new(
            repo.clone(),
            ledger.clone(),
            Arc::new(SqlitePricingRepository::new(pool.clone())),
            generator.clone(),
            artifacts.clone(),
            completion.owner_locks(),
            Arc::new(SequentialIdProvider::new("img")),
            time.clone(),
        );
        let watch = WatchService::new(
            WatcherConfig {
                poll_interval: POLL_INTERVAL,
                granularity,
            },
            repo.clone(),
            training.clone(),
            completion,
            time,
        );

        Self {
            pool,
            repo,
            ledger,
            training,
            generator,
            artifacts,
            watch,
            generation,
        }
    }

    pub async fn open_account(&self, user: &str, balance: i64) {
        self.ledger
            .open_account(&user.to_string(), balance)
            .await
            .unwrap();
    }

    pub async fn balance(&self, user: &str) -> i64 {
        self.ledger.balance(&user.to_string()).await.unwrap()
    }

    /// Persist a job already registered with the provider under `provider_ref`
    pub async fn insert_job(&self, owner: &str, provider_ref: &str) -> TrainingJob {
        let job = TrainingJob::new_test(owner, provider_ref);
        self.repo.insert(&job).await.unwrap();
        job
    }

    pub async fn job(&self, job: &TrainingJob) -> TrainingJob {
        self.repo.find_by_id(&job.id).await.unwrap().unwrap()
    }
}

pub async fn next_event(rx: &mut broadcast::Receiver<WatchEvent>) -> WatchEvent {
    tokio::time::timeout(EVENT_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for watch event")
        .unwrap()
}

/// Collect events until `stopped` watchers have reported `WatcherStopped`
pub async fn events_until_stopped(
    rx: &mut broadcast::Receiver<WatchEvent>,
    stopped: usize,
) -> Vec<WatchEvent> {
    let mut events = Vec::new();
    let mut seen = 0;
    while seen < stopped {
        let event = next_event(rx).await;
        if matches!(event, WatchEvent::WatcherStopped { .. }) {
            seen += 1;
        }
        events.push(event);
    }
    events
}
