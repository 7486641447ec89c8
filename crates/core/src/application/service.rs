// Watch service - entry point for starting and stopping job watchers

use crate::application::completion::CompletionSequence;
use crate::application::events::{EventBus, WatchEvent};
use crate::application::watcher::{JobWatcher, WatcherConfig, WatcherRegistry, WatcherState};
use crate::domain::{SubjectKey, TrainingJob, WatchGranularity};
use crate::port::{JobRepository, TimeProvider, TrainingProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::info;

/// State shared by the service handle and every watcher task
pub(crate) struct WatchRuntime {
    pub(crate) config: WatcherConfig,
    pub(crate) registry: WatcherRegistry,
    pub(crate) job_repo: Arc<dyn JobRepository>,
    pub(crate) training: Arc<dyn TrainingProvider>,
    pub(crate) completion: Arc<CompletionSequence>,
    pub(crate) time_provider: Arc<dyn TimeProvider>,
    pub(crate) events: EventBus,
}

impl WatchRuntime {
    pub(crate) fn start_watching(self: &Arc<Self>, subject: SubjectKey) -> bool {
        let runtime = Arc::clone(self);
        let key = subject.clone();
        self.registry.register(subject, move |slot| {
            let watcher = JobWatcher::new(key, slot.id, runtime, slot.state);
            tokio::spawn(watcher.run(slot.stop))
        })
    }
}

/// Cloneable handle over the watcher registry
#[derive(Clone)]
pub struct WatchService {
    runtime: Arc<WatchRuntime>,
}

impl WatchService {
    pub fn new(
        config: WatcherConfig,
        job_repo: Arc<dyn JobRepository>,
        training: Arc<dyn TrainingProvider>,
        completion: Arc<CompletionSequence>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            runtime: Arc::new(WatchRuntime {
                config,
                registry: WatcherRegistry::new(),
                job_repo,
                training,
                completion,
                time_provider,
                events: EventBus::new(),
            }),
        }
    }

    /// Start a watcher for `subject`; no-op (returns `false`) if one is live
    pub fn start_watching(&self, subject: SubjectKey) -> bool {
        self.runtime.start_watching(subject)
    }

    /// Start watching `job` under the configured granularity
    pub fn watch_job(&self, job: &TrainingJob) -> bool {
        self.start_watching(job.subject(self.runtime.config.granularity))
    }

    /// Signal the watcher for `subject` to stop after its current cycle
    pub fn stop_watching(&self, subject: &SubjectKey) -> bool {
        self.runtime.registry.deregister(subject).is_some()
    }

    pub fn is_watching(&self, subject: &SubjectKey) -> bool {
        self.runtime.registry.is_watching(subject)
    }

    pub fn watcher_state(&self, subject: &SubjectKey) -> Option<WatcherState> {
        self.runtime.registry.state(subject)
    }

    pub fn active_subjects(&self) -> Vec<SubjectKey> {
        self.runtime.registry.active_subjects()
    }

    pub fn granularity(&self) -> WatchGranularity {
        self.runtime.config.granularity
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WatchEvent> {
        self.runtime.events.subscribe()
    }

    /// Stop all watchers, then wait for every in-flight completion
    ///
    /// `grace` bounds only the wait for idle watchers. A completion that has
    /// started is never cut off between its commit and its debit.
    pub async fn shutdown(&self, grace: Duration) {
        info!("Shutting down watch service");
        self.runtime.registry.shutdown(grace).await;

        let in_flight = self.runtime.completion.in_flight();
        let running = in_flight.current();
        if running > 0 {
            info!(running = running, "Waiting for in-flight completions");
        }
        in_flight.wait_idle().await;
    }
}
