// Job Watcher - per-subject polling loop

pub mod constants;
pub mod registry;
mod stop;

pub use registry::{WatcherId, WatcherRegistry, WatcherSlot};
pub use stop::{stop_channel, StopSender, StopToken};

use crate::application::completion::CompletionOutcome;
use crate::application::events::WatchEvent;
use crate::application::service::WatchRuntime;
use crate::domain::{SubjectKey, TrainingJob, WatchGranularity};
use crate::error::{AppError, FailureKind, FailureReport, Result};
use crate::port::{ProviderError, ProviderJobState, TrainingStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Watcher configuration (plain values, never read from the environment here)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherConfig {
    pub poll_interval: Duration,
    pub granularity: WatchGranularity,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: constants::DEFAULT_POLL_INTERVAL,
            granularity: WatchGranularity::default(),
        }
    }
}

/// Watcher lifecycle, published over a watch channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    Polling,
    Completing,
    Stopped,
}

/// Result of one poll cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Non-terminal jobs remain (or were just polled)
    Active,
    /// No non-terminal jobs for the subject
    Idle,
}

pub struct JobWatcher {
    subject: SubjectKey,
    id: WatcherId,
    runtime: Arc<WatchRuntime>,
    state: watch::Sender<WatcherState>,
}

impl JobWatcher {
    pub(crate) fn new(
        subject: SubjectKey,
        id: WatcherId,
        runtime: Arc<WatchRuntime>,
        state: watch::Sender<WatcherState>,
    ) -> Self {
        Self {
            subject,
            id,
            runtime,
            state,
        }
    }

    /// Poll on a fixed interval until idle or stopped
    ///
    /// The stop signal is only observed between cycles, so an in-flight
    /// completion always runs to its end.
    pub async fn run(self, mut stop: StopToken) {
        info!(
            subject = %self.subject,
            watcher_id = self.id,
            interval_ms = self.runtime.config.poll_interval.as_millis() as u64,
            "Watcher started"
        );

        let mut ticker = tokio::time::interval(self.runtime.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {},
                _ = stop.wait() => {
                    info!(subject = %self.subject, "Watcher interrupted while waiting");
                    break;
                }
            }
            if stop.is_stopped() {
                break;
            }

            match self.poll_cycle().await {
                Ok(CycleOutcome::Active) => {}
                Ok(CycleOutcome::Idle) => {
                    info!(subject = %self.subject, "No non-terminal jobs left, stopping watcher");
                    self.retire().await;
                    break;
                }
                Err(e) => {
                    // Store unavailable: try again next tick
                    warn!(subject = %self.subject, error = %e, "Poll cycle failed");
                }
            }
        }

        let _ = self.state.send(WatcherState::Stopped);
        self.runtime.events.publish(WatchEvent::WatcherStopped {
            subject: self.subject.clone(),
        });
        info!(subject = %self.subject, watcher_id = self.id, "Watcher stopped");
    }

    /// Query the provider for every non-terminal job and act on terminal states
    pub async fn poll_cycle(&self) -> Result<CycleOutcome> {
        let jobs = self
            .runtime
            .job_repo
            .find_non_terminal_by_subject(&self.subject)
            .await?;
        if jobs.is_empty() {
            return Ok(CycleOutcome::Idle);
        }

        debug!(subject = %self.subject, jobs = jobs.len(), "Polling training provider");

        // Status queries for distinct jobs run concurrently
        let training = &self.runtime.training;
        let polls = jobs.into_iter().filter_map(|job| {
            let provider_ref = match &job.provider_ref {
                Some(r) => r.clone(),
                None => {
                    debug!(job_id = %job.id, "Job not yet registered with provider");
                    return None;
                }
            };
            Some(async move {
                let status = training.get_status(&provider_ref).await;
                (job, status)
            })
        });
        let results = futures::future::join_all(polls).await;

        // Completions for one subject run one at a time
        for (job, status) in results {
            self.handle_status(job, status).await;
        }
        Ok(CycleOutcome::Active)
    }

    async fn handle_status(
        &self,
        job: TrainingJob,
        status: std::result::Result<TrainingStatus, ProviderError>,
    ) {
        let status = match status {
            Ok(status) => status,
            Err(e) => {
                // Never a job failure: next cycle polls again
                warn!(job_id = %job.id, error = %e, "Status poll failed");
                return;
            }
        };

        match status.state {
            ProviderJobState::InProgress => {
                debug!(job_id = %job.id, "Training still in progress");
            }
            ProviderJobState::Failed => self.record_failure(&job).await,
            ProviderJobState::Succeeded => self.complete(job, status.output_version).await,
        }
    }

    async fn record_failure(&self, job: &TrainingJob) {
        let now = self.runtime.time_provider.now_millis();
        match self.runtime.job_repo.mark_failed(&job.id, now).await {
            Ok(true) => {
                info!(job_id = %job.id, owner = %job.owner, "Training failed at provider");
                self.runtime.events.publish(WatchEvent::JobFailed {
                    job_id: job.id.clone(),
                    owner: job.owner.clone(),
                    report: FailureReport {
                        kind: FailureKind::ProviderFailed,
                        message: "training failed at provider".to_string(),
                    },
                });
            }
            Ok(false) => debug!(job_id = %job.id, "Job already terminal"),
            Err(e) => warn!(job_id = %job.id, error = %e, "Failed to record training failure"),
        }
    }

    async fn complete(&self, job: TrainingJob, output_version: Option<String>) {
        let _ = self.state.send(WatcherState::Completing);

        // Run isolated: a panic inside the sequence must not take the watcher down
        // Counted before the spawn so shutdown never misses a run that has not been polled yet
        let completion = Arc::clone(&self.runtime.completion);
        let running = completion.in_flight().enter();
        let snapshot = job.clone();
        let handle = tokio::spawn(async move {
            let _running = running;
            completion.run(&snapshot, output_version).await
        });

        let result = match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                error!(job_id = %job.id, error = ?join_err, "Completion sequence panicked");
                Err(AppError::Internal(format!(
                    "completion sequence aborted: {}",
                    join_err
                )))
            }
        };

        match result {
            Ok(CompletionOutcome::Completed { artifact_uri, .. }) => {
                self.runtime.events.publish(WatchEvent::JobSucceeded {
                    job_id: job.id.clone(),
                    owner: job.owner.clone(),
                    artifact_uri,
                    charged: true,
                });
            }
            Ok(CompletionOutcome::CompletedUncharged { artifact_uri }) => {
                self.runtime.events.publish(WatchEvent::JobSucceeded {
                    job_id: job.id.clone(),
                    owner: job.owner.clone(),
                    artifact_uri,
                    charged: false,
                });
            }
            Ok(CompletionOutcome::AlreadyCompleted) | Ok(CompletionOutcome::InProgress) => {}
            Err(e) => {
                warn!(
                    job_id = %job.id,
                    kind = ?e.kind(),
                    error = %e,
                    "Completion deferred to next cycle"
                );
                self.runtime.events.publish(WatchEvent::CompletionDeferred {
                    job_id: job.id.clone(),
                    owner: job.owner.clone(),
                    report: e.report(),
                });
            }
        }

        let _ = self.state.send(WatcherState::Polling);
    }

    /// Leave the registry, then hand off if a job slipped in meanwhile
    ///
    /// A submission may insert a job and call `start_watching` after our empty
    /// scan but before we leave the registry; that call was a no-op, so re-check.
    async fn retire(&self) {
        if !self.runtime.registry.retire(&self.subject, self.id) {
            return;
        }
        match self
            .runtime
            .job_repo
            .find_non_terminal_by_subject(&self.subject)
            .await
        {
            Ok(jobs) if jobs.is_empty() => {}
            Ok(_) => {
                info!(subject = %self.subject, "Job arrived during retirement, handing off");
                self.runtime.start_watching(self.subject.clone());
            }
            Err(e) => {
                warn!(subject = %self.subject, error = %e, "Re-check failed, handing off");
                self.runtime.start_watching(self.subject.clone());
            }
        }
    }
}
