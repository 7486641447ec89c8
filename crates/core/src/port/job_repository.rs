// Job Repository Port (Interface)

use crate::domain::{JobId, SubjectKey, TrainingJob, UserId};
use crate::error::Result;
use async_trait::async_trait;

/// Repository interface for training job persistence
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new job
    async fn insert(&self, job: &TrainingJob) -> Result<()>;

    /// Find job by local ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<TrainingJob>>;

    /// Overwrite a job that is still non-terminal
    ///
    /// Returns `AppError::InvalidState` if the stored job is already terminal.
    async fn update(&self, job: &TrainingJob) -> Result<()>;

    /// Non-terminal jobs a watcher for `subject` is responsible for (oldest first)
    async fn find_non_terminal_by_subject(&self, subject: &SubjectKey) -> Result<Vec<TrainingJob>>;

    /// All non-terminal jobs (for watcher recovery on startup)
    async fn find_non_terminal(&self) -> Result<Vec<TrainingJob>>;

    /// Every job of `owner`, any status, oldest first
    async fn find_by_owner(&self, owner: &UserId) -> Result<Vec<TrainingJob>>;

    /// Commit point of the completion sequence
    ///
    /// Atomically appends `artifact_uri` and moves the job `STARTING -> SUCCEEDED`.
    /// Returns `false` (and changes nothing) if the job was already terminal.
    async fn commit_success(
        &self,
        id: &JobId,
        artifact_uri: &str,
        model_version: Option<&str>,
        finished_at: i64,
    ) -> Result<bool>;

    /// Append an on-demand artifact to a SUCCEEDED job
    ///
    /// Returns `false` (and changes nothing) if the job is not SUCCEEDED.
    async fn append_artifact(&self, id: &JobId, artifact_uri: &str, created_at: i64)
        -> Result<bool>;

    /// Conditionally move the job `STARTING -> FAILED`
    ///
    /// Returns `false` if the job was already terminal.
    async fn mark_failed(&self, id: &JobId, finished_at: i64) -> Result<bool>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use crate::domain::JobStatus;
    use crate::error::AppError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// In-memory job store
    #[derive(Default)]
    pub struct InMemoryJobRepository {
        jobs: Mutex<HashMap<JobId, TrainingJob>>,
        failing_commits: AtomicUsize,
        failing_updates: AtomicUsize,
        commit_calls: AtomicUsize,
    }

    impl InMemoryJobRepository {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `n` commit_success calls fail with a database error
        pub fn fail_next_commits(&self, n: usize) {
            self.failing_commits.store(n, Ordering::SeqCst);
        }

        /// Make the next `n` update calls fail with a database error
        pub fn fail_next_updates(&self, n: usize) {
            self.failing_updates.store(n, Ordering::SeqCst);
        }

        pub fn commit_calls(&self) -> usize {
            self.commit_calls.load(Ordering::SeqCst)
        }

        pub fn get(&self, id: &str) -> Option<TrainingJob> {
            self.jobs.lock().unwrap().get(id).cloned()
        }

        fn matches(job: &TrainingJob, subject: &SubjectKey) -> bool {
            match subject {
                SubjectKey::User(owner) => &job.owner == owner,
                SubjectKey::Job(id) => &job.id == id,
            }
        }
    }

    #[async_trait]
    impl JobRepository for InMemoryJobRepository {
        async fn insert(&self, job: &TrainingJob) -> Result<()> {
            let mut jobs = self.jobs.lock().unwrap();
            if jobs.contains_key(&job.id) {
                return Err(AppError::Database(format!("duplicate job id {}", job.id)));
            }
            jobs.insert(job.id.clone(), job.clone());
            Ok(())
        }

        async fn find_by_id(&self, id: &JobId) -> Result<Option<TrainingJob>> {
            Ok(self.jobs.lock().unwrap().get(id).cloned())
        }

        async fn update(&self, job: &TrainingJob) -> Result<()> {
            if self
                .failing_updates
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::Database("injected update failure".to_string()));
            }
            let mut jobs = self.jobs.lock().unwrap();
            match jobs.get(&job.id) {
                None => Err(AppError::NotFound(format!("Job {} not found", job.id))),
                Some(stored) if stored.is_terminal() => Err(AppError::InvalidState(format!(
                    "Job {} is already {}",
                    job.id, stored.status
                ))),
                Some(_) => {
                    jobs.insert(job.id.clone(), job.clone());
                    Ok(())
                }
            }
        }

        async fn find_non_terminal_by_subject(
            &self,
            subject: &SubjectKey,
        ) -> Result<Vec<TrainingJob>> {
            let mut found: Vec<TrainingJob> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| !j.is_terminal() && Self::matches(j, subject))
                .cloned()
                .collect();
            found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(found)
        }

        async fn find_non_terminal(&self) -> Result<Vec<TrainingJob>> {
            let mut found: Vec<TrainingJob> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| !j.is_terminal())
                .cloned()
                .collect();
            found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(found)
        }

        async fn find_by_owner(&self, owner: &UserId) -> Result<Vec<TrainingJob>> {
            let mut found: Vec<TrainingJob> = self
                .jobs
                .lock()
                .unwrap()
                .values()
                .filter(|j| &j.owner == owner)
                .cloned()
                .collect();
            found.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
            Ok(found)
        }

        async fn commit_success(
            &self,
            id: &JobId,
            artifact_uri: &str,
            model_version: Option<&str>,
            finished_at: i64,
        ) -> Result<bool> {
            self.commit_calls.fetch_add(1, Ordering::SeqCst);
            if self
                .failing_commits
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(AppError::Database("injected commit failure".to_string()));
            }

            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            if job.status != JobStatus::Starting {
                return Ok(false);
            }
            job.succeed(artifact_uri, model_version.map(str::to_string), finished_at)?;
            Ok(true)
        }

        async fn append_artifact(
            &self,
            id: &JobId,
            artifact_uri: &str,
            _created_at: i64,
        ) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            if job.status != JobStatus::Succeeded {
                return Ok(false);
            }
            job.append_artifact(artifact_uri)?;
            Ok(true)
        }

        async fn mark_failed(&self, id: &JobId, finished_at: i64) -> Result<bool> {
            let mut jobs = self.jobs.lock().unwrap();
            let job = jobs
                .get_mut(id)
                .ok_or_else(|| AppError::NotFound(format!("Job {} not found", id)))?;
            if job.status != JobStatus::Starting {
                return Ok(false);
            }
            job.fail(finished_at)?;
            Ok(true)
        }
    }
}
