// Watcher recovery on daemon startup
use crate::application::service::WatchService;
use crate::domain::SubjectKey;
use crate::error::Result;
use crate::port::{JobRepository, TimeProvider};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Summary of one recovery pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub watchers_started: usize,
    /// Jobs that never reached the provider (crashed mid-submission)
    pub orphans_failed: usize,
}

/// Restarts watchers for jobs left non-terminal by a previous run
///
/// Watchers live only in memory, so after a restart nothing polls the
/// provider until this runs.
pub struct WatcherRecovery {
    job_repo: Arc<dyn JobRepository>,
    watch: WatchService,
    time_provider: Arc<dyn TimeProvider>,
}

impl WatcherRecovery {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        watch: WatchService,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            watch,
            time_provider,
        }
    }

    pub async fn resume(&self) -> Result<RecoveryReport> {
        let jobs = self.job_repo.find_non_terminal().await?;
        if jobs.is_empty() {
            info!("No non-terminal jobs to resume");
            return Ok(RecoveryReport::default());
        }

        let granularity = self.watch.granularity();
        let mut report = RecoveryReport::default();
        let mut subjects: Vec<SubjectKey> = Vec::new();
        let mut seen = HashSet::new();

        for job in jobs {
            if job.provider_ref.is_none() {
                // No provider reference means nothing to poll, ever
                let now = self.time_provider.now_millis();
                if self.job_repo.mark_failed(&job.id, now).await? {
                    warn!(job_id = %job.id, owner = %job.owner, "Orphaned job without provider reference marked failed");
                    report.orphans_failed += 1;
                }
                continue;
            }
            let subject = job.subject(granularity);
            if seen.insert(subject.clone()) {
                subjects.push(subject);
            }
        }

        for subject in subjects {
            if self.watch.start_watching(subject.clone()) {
                report.watchers_started += 1;
            }
        }

        info!(
            watchers_started = report.watchers_started,
            orphans_failed = report.orphans_failed,
            "Watcher recovery complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::completion::CompletionSequence;
    use crate::application::watcher::WatcherConfig;
    use crate::domain::{JobStatus, TrainingJob, WatchGranularity};
    use crate::port::artifact_store::mocks::InMemoryArtifactStore;
    use crate::port::credit_ledger::mocks::InMemoryCreditLedger;
    use crate::port::job_repository::mocks::InMemoryJobRepository;
    use crate::port::pricing::mocks::FixedPricing;
    use crate::port::provider::mocks::{MockGenerationProvider, ScriptedTrainingProvider};
    use crate::port::time_provider::mocks::ManualTimeProvider;
    use std::time::Duration;

    fn recovery(
        repo: Arc<InMemoryJobRepository>,
        granularity: WatchGranularity,
    ) -> (WatcherRecovery, WatchService) {
        let time = Arc::new(ManualTimeProvider::new(0));
        let completion = Arc::new(CompletionSequence::new(
            repo.clone(),
            Arc::new(InMemoryCreditLedger::new()),
            Arc::new(FixedPricing::new(300, 7)),
            Arc::new(MockGenerationProvider::new()),
            Arc::new(InMemoryArtifactStore::new()),
            time.clone(),
        ));
        let watch = WatchService::new(
            WatcherConfig {
                poll_interval: Duration::from_secs(300),
                granularity,
            },
            repo.clone(),
            Arc::new(ScriptedTrainingProvider::new()),
            completion,
            time.clone(),
        );
        (WatcherRecovery::new(repo, watch.clone(), time), watch)
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_starts_one_watcher_per_subject() {
        let repo = Arc::new(InMemoryJobRepository::new());
        for provider_ref in ["r-1", "r-2"] {
            repo.insert(&TrainingJob::new_test("alice", provider_ref))
                .await
                .unwrap();
        }
        repo.insert(&TrainingJob::new_test("bob", "r-3")).await.unwrap();

        let (recovery, watch) = recovery(repo, WatchGranularity::PerUser);
        let report = recovery.resume().await.unwrap();

        assert_eq!(report.watchers_started, 2);
        assert!(watch.is_watching(&SubjectKey::User("alice".into())));
        assert!(watch.is_watching(&SubjectKey::User("bob".into())));

        watch.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_fails_jobs_without_provider_ref() {
        let repo = Arc::new(InMemoryJobRepository::new());
        let mut orphan = TrainingJob::new_test("alice", "unused");
        orphan.provider_ref = None;
        repo.insert(&orphan).await.unwrap();
        let live = TrainingJob::new_test("alice", "r-live");
        repo.insert(&live).await.unwrap();

        let (recovery, watch) = recovery(repo.clone(), WatchGranularity::PerJob);
        let report = recovery.resume().await.unwrap();

        assert_eq!(
            report,
            RecoveryReport {
                watchers_started: 1,
                orphans_failed: 1
            }
        );
        assert_eq!(repo.get(&orphan.id).unwrap().status, JobStatus::Failed);
        assert!(watch.is_watching(&SubjectKey::Job(live.id.clone())));

        watch.shutdown(Duration::from_secs(1)).await;
    }

    #[tokio::test]
    async fn test_resume_with_nothing_pending() {
        let (recovery, watch) = recovery(
            Arc::new(InMemoryJobRepository::new()),
            WatchGranularity::PerJob,
        );
        assert_eq!(recovery.resume().await.unwrap(), RecoveryReport::default());
        assert!(watch.active_subjects().is_empty());
    }
}
