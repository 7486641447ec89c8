//! Trainwatch daemon: watches provider trainings and completes them

mod config;
mod logging;

use anyhow::{Context, Result};
use config::DaemonConfig;
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info, warn};

use trainwatch_api_rpc::{RpcHandler, RpcServer, RpcServerConfig};
use trainwatch_core::application::watcher::constants::DEFAULT_SHUTDOWN_GRACE;
use trainwatch_core::application::{
    CompletionSequence, GenerationService, TrainingService, WatchEvent, WatchService, WatcherConfig,
    WatcherRecovery,
};
use trainwatch_core::port::id_provider::UuidProvider;
use trainwatch_core::port::time_provider::SystemTimeProvider;
use trainwatch_core::port::{
    ArtifactStore, CreditLedger, GenerationProvider, JobRepository, PricingRepository,
    TimeProvider, TrainingProvider,
};
use trainwatch_core::VERSION;
use trainwatch_infra_http::{
    GcsArtifactStore, ReplicateGenerationProvider, ReplicateTrainingProvider,
};
use trainwatch_infra_sqlite::{
    create_pool, run_migrations, SqliteCreditLedger, SqliteJobRepository,
    SqlitePricingRepository,
};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Configuration (errors surface through anyhow before logging exists)
    let config = DaemonConfig::from_env().context("Invalid configuration")?;

    // 2. Logging
    logging::init_logging(config.log_format)?;

    info!("Trainwatch v{} starting...", VERSION);
    info!(
        db_path = %config.db_path,
        rpc_port = config.rpc_port,
        poll_interval_secs = config.poll_interval.as_secs(),
        granularity = ?config.granularity,
        "Configuration loaded"
    );

    // 3. Database
    if let Some(parent) = Path::new(&config.db_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    let pool = create_pool(&config.db_path)
        .await
        .context("DB pool creation failed")?;
    run_migrations(&pool).await.context("Migration failed")?;

    // 4. Adapters (DI wiring)
    let time_provider: Arc<dyn TimeProvider> = Arc::new(SystemTimeProvider);
    let job_repo: Arc<dyn JobRepository> = Arc::new(SqliteJobRepository::new(pool.clone()));
    let ledger: Arc<dyn CreditLedger> = Arc::new(SqliteCreditLedger::new(pool.clone()));
    let pricing: Arc<dyn PricingRepository> = Arc::new(SqlitePricingRepository::new(pool));

    let training: Arc<dyn TrainingProvider> = Arc::new(ReplicateTrainingProvider::with_base_url(
        config.replicate.api_token.clone(),
        config.replicate.owner.clone(),
        config.replicate.trainer_version.clone(),
        config.replicate.base_url.clone(),
    )?);
    let generator: Arc<dyn GenerationProvider> =
        Arc::new(ReplicateGenerationProvider::with_base_url(
            config.replicate.api_token.clone(),
            config.replicate.base_url.clone(),
        )?);
    let artifacts: Arc<dyn ArtifactStore> = Arc::new(GcsArtifactStore::with_base_url(
        config.gcs.bucket.clone(),
        config.gcs.access_token.clone(),
        config.gcs.base_url.clone(),
    )?);

    // 5. Application services
    let completion = Arc::new(CompletionSequence::new(
        job_repo.clone(),
        ledger.clone(),
        pricing.clone(),
        generator.clone(),
        artifacts.clone(),
        time_provider.clone(),
    ));
    let generation_service = Arc::new(GenerationService::new(
        job_repo.clone(),
        ledger.clone(),
        pricing.clone(),
        generator,
        artifacts,
        completion.owner_locks(),
        Arc::new(UuidProvider),
        time_provider.clone(),
    ));
    let watch = WatchService::new(
        WatcherConfig {
            poll_interval: config.poll_interval,
            granularity: config.granularity,
        },
        job_repo.clone(),
        training.clone(),
        completion,
        time_provider.clone(),
    );
    let training_service = Arc::new(TrainingService::new(
        job_repo.clone(),
        ledger.clone(),
        pricing,
        training,
        watch.clone(),
        Arc::new(UuidProvider),
        time_provider.clone(),
    ));

    // 6. Event log
    let mut events = watch.subscribe();
    tokio::spawn(async move {
        use tokio::sync::broadcast::error::RecvError;
        loop {
            match events.recv().await {
                Ok(WatchEvent::JobSucceeded {
                    job_id,
                    owner,
                    artifact_uri,
                    charged,
                }) => {
                    info!(job_id = %job_id, owner = %owner, artifact = %artifact_uri, charged, "Job succeeded")
                }
                Ok(WatchEvent::JobFailed { job_id, owner, report }) => {
                    warn!(job_id = %job_id, owner = %owner, kind = ?report.kind, message = %report.message, "Job failed")
                }
                Ok(WatchEvent::CompletionDeferred { job_id, owner, report }) => {
                    warn!(job_id = %job_id, owner = %owner, kind = ?report.kind, message = %report.message, "Completion deferred")
                }
                Ok(WatchEvent::WatcherStopped { subject }) => {
                    info!(subject = %subject, "Watcher stopped")
                }
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 7. Resume watchers for jobs left non-terminal by a previous run
    info!("Resuming watchers...");
    let recovery = WatcherRecovery::new(job_repo.clone(), watch.clone(), time_provider);
    match recovery.resume().await {
        Ok(report) => info!(
            watchers_started = report.watchers_started,
            orphans_failed = report.orphans_failed,
            "Watcher recovery completed"
        ),
        Err(e) => error!(error = %e, "Watcher recovery failed"),
    }

    // 8. JSON-RPC server
    let rpc_config = RpcServerConfig {
        port: config.rpc_port,
        ..Default::default()
    };
    let handler = RpcHandler::new(
        training_service,
        generation_service,
        watch.clone(),
        job_repo,
        ledger,
    );
    let (rpc_handle, addr) = RpcServer::new(rpc_config, handler)
        .start()
        .await
        .context("RPC server start failed")?;

    info!(addr = %addr, "System ready. Press Ctrl+C to shutdown");

    // 9. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Exiting gracefully...");

    // 10. Graceful shutdown: stop intake first, then drain watchers and completions
    rpc_handle.stop().context("RPC server stop failed")?;
    watch.shutdown(DEFAULT_SHUTDOWN_GRACE).await;
    rpc_handle.stopped().await;

    info!("Shutdown complete.");
    Ok(())
}
