//! Completion Sequence - runs once a training is observed to have succeeded
//!
//! Steps, in order:
//! 1. re-read balance, abort if below the generation cost
//! 2. invoke the generation provider
//! 3. store the artifact under a per-owner, per-job key
//! 4. append the artifact and mark the job SUCCEEDED (commit point)
//! 5. debit the generation cost
//!
//! Step 4 is conditional on the job still being STARTING, and step 5 only runs
//! for the caller whose commit moved the job. A retry after a crash between 3
//! and 4 finds the stored object by key and skips re-generation.
//!
//! Steps 1 to 5 hold the owner's [`OwnerLocks`] permit, so two jobs of one
//! owner never both pass the balance check against the same credits.

use crate::application::watcher::constants::DEFAULT_ARTIFACT_CONTENT_TYPE;
use crate::domain::{DebitOutcome, JobId, TrainingJob, UserId};
use crate::error::{AppError, Result};
use crate::port::{
    ArtifactStore, CreditLedger, GeneratedArtifact, GenerationProvider, GenerationRequest,
    JobRepository, PricingRepository, ProviderError, TimeProvider,
};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, OwnedMutexGuard};
use tracing::{debug, info, warn};

/// Outcome of one completion attempt that did not error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// Committed and charged
    Completed { artifact_uri: String, balance: i64 },
    /// Committed, but the final debit was rejected (balance drained concurrently)
    CompletedUncharged { artifact_uri: String },
    /// Job was already terminal; nothing done
    AlreadyCompleted,
    /// Another watcher holds this job's completion guard
    InProgress,
}

/// Storage key for a job's generated artifact
pub fn artifact_key(job: &TrainingJob) -> String {
    format!("{}/generated-{}.jpg", job.owner, job.id)
}

/// Per-job "completing" guard: atomic check-and-set keyed by job ID
#[derive(Clone, Default)]
pub struct CompletionGuard {
    active: Arc<Mutex<HashSet<JobId>>>,
}

impl CompletionGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter `completing` for `job_id`; `None` if already entered elsewhere
    pub fn try_begin(&self, job_id: &JobId) -> Option<CompletionPermit> {
        let mut active = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if !active.insert(job_id.clone()) {
            return None;
        }
        Some(CompletionPermit {
            job_id: job_id.clone(),
            active: Arc::clone(&self.active),
        })
    }

    pub fn is_completing(&self, job_id: &JobId) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(job_id)
    }
}

/// Held for the duration of one completion attempt; released on drop (including unwind)
pub struct CompletionPermit {
    job_id: JobId,
    active: Arc<Mutex<HashSet<JobId>>>,
}

impl Drop for CompletionPermit {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.job_id);
    }
}

/// Per-owner exclusive access to the credit balance
///
/// Unlike [`CompletionGuard`] this waits: the second caller runs after the
/// first has debited and sees the reduced balance.
#[derive(Clone, Default)]
pub struct OwnerLocks {
    locks: Arc<Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, owner: &UserId) -> OwnerPermit {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(owner.clone()).or_default())
        };
        let guard = lock.lock_owned().await;
        OwnerPermit {
            owner: owner.clone(),
            guard: Some(guard),
            locks: Arc::clone(&self.locks),
        }
    }

    pub fn is_held(&self, owner: &UserId) -> bool {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(owner)
            .map(|lock| lock.try_lock().is_err())
            .unwrap_or(false)
    }
}

/// Exclusive hold on one owner's balance; the map entry goes with the last holder
pub struct OwnerPermit {
    owner: UserId,
    guard: Option<OwnedMutexGuard<()>>,
    locks: Arc<Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>>,
}

impl Drop for OwnerPermit {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // Waiters clone the Arc under this lock, so a count of 1 means nobody is queued
        if locks
            .get(&self.owner)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.owner);
        }
    }
}

/// Number of completion runs a shutdown has to wait for
#[derive(Clone)]
pub struct InFlight {
    count: Arc<watch::Sender<usize>>,
}

impl InFlight {
    pub fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    /// Count a run from before it is spawned until the returned value drops
    pub fn enter(&self) -> InFlightRun {
        self.count.send_modify(|n| *n += 1);
        InFlightRun {
            count: Arc::clone(&self.count),
        }
    }

    pub fn current(&self) -> usize {
        *self.count.borrow()
    }

    pub async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so this only ends at zero
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for InFlight {
    fn default() -> Self {
        Self::new()
    }
}

pub struct InFlightRun {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for InFlightRun {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

pub struct CompletionSequence {
    job_repo: Arc<dyn JobRepository>,
    ledger: Arc<dyn CreditLedger>,
    pricing: Arc<dyn PricingRepository>,
    generator: Arc<dyn GenerationProvider>,
    artifacts: Arc<dyn ArtifactStore>,
    time_provider: Arc<dyn TimeProvider>,
    guard: CompletionGuard,
    owners: OwnerLocks,
    in_flight: InFlight,
}

impl CompletionSequence {
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        ledger: Arc<dyn CreditLedger>,
        pricing: Arc<dyn PricingRepository>,
        generator: Arc<dyn GenerationProvider>,
        artifacts: Arc<dyn ArtifactStore>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            ledger,
            pricing,
            generator,
            artifacts,
            time_provider,
            guard: CompletionGuard::new(),
            owners: OwnerLocks::new(),
            in_flight: InFlight::new(),
        }
    }

    pub fn guard(&self) -> &CompletionGuard {
        &self.guard
    }

    /// Runs spawned by watchers that have not finished yet
    pub fn in_flight(&self) -> &InFlight {
        &self.in_flight
    }

    /// Owner locks shared with anything else that debits generation costs
    pub fn owner_locks(&self) -> OwnerLocks {
        self.owners.clone()
    }

    /// Run the sequence for `job`
    ///
    /// `output_version` is the trained model version reported by the provider.
    /// Any `Err` leaves the job STARTING so the next poll cycle retries.
    pub async fn run(
        &self,
        job: &TrainingJob,
        output_version: Option<String>,
    ) -> Result<CompletionOutcome> {
        let _permit = match self.guard.try_begin(&job.id) {
            Some(permit) => permit,
            None => {
                debug!(job_id = %job.id, "Completion already in progress elsewhere");
                return Ok(CompletionOutcome::InProgress);
            }
        };
        let _owner = self.owners.acquire(&job.owner).await;

        // The caller's snapshot may be stale; the store is authoritative
        let job = self
            .job_repo
            .find_by_id(&job.id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", job.id)))?;
        if job.is_terminal() {
            debug!(job_id = %job.id, status = %job.status, "Job already terminal, skipping");
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        // 1. Credit check
        let pricing = self
            .pricing
            .current()
            .await?
            .ok_or(AppError::PricingUnavailable)?;
        let cost = pricing.generation_cost;
        let balance = self.ledger.balance(&job.owner).await?;
        if balance < cost {
            return Err(AppError::InsufficientCredits {
                required: cost,
                available: balance,
            });
        }

        // 2 + 3. Generate and store, unless a previous attempt already stored it
        let model_version = output_version.or_else(|| job.model_version.clone());
        let key = artifact_key(&job);
        let artifact_uri = match self
            .artifacts
            .exists(&key)
            .await
            .map_err(|e| AppError::Storage(e.to_string()))?
        {
            Some(uri) => {
                info!(job_id = %job.id, key = %key, "Artifact already stored, reusing");
                uri
            }
            None => {
                let model_version = model_version.clone().ok_or_else(|| {
                    AppError::Generation(ProviderError::Decode(format!(
                        "no trained model version for job {}",
                        job.id
                    )))
                })?;
                let request = GenerationRequest::for_completion(model_version, &job.prompt);
                info!(job_id = %job.id, model_version = %request.model_version, "Generating artifact");
                render_and_store(self.generator.as_ref(), self.artifacts.as_ref(), &request, &key)
                    .await?
            }
        };

        // 4. Commit point
        let now = self.time_provider.now_millis();
        let committed = self
            .job_repo
            .commit_success(&job.id, &artifact_uri, model_version.as_deref(), now)
            .await?;
        if !committed {
            info!(job_id = %job.id, "Job committed concurrently, not charging");
            return Ok(CompletionOutcome::AlreadyCompleted);
        }

        // 5. Debit
        match self.ledger.debit(&job.owner, cost).await {
            Ok(DebitOutcome::Debited { balance }) => {
                info!(
                    job_id = %job.id,
                    owner = %job.owner,
                    charged = cost,
                    balance = balance,
                    artifact_uri = %artifact_uri,
                    "Completion sequence finished"
                );
                Ok(CompletionOutcome::Completed {
                    artifact_uri,
                    balance,
                })
            }
            Ok(DebitOutcome::InsufficientFunds { balance, required }) => {
                warn!(
                    job_id = %job.id,
                    owner = %job.owner,
                    balance = balance,
                    required = required,
                    "Generation debit rejected after commit, job left uncharged"
                );
                Ok(CompletionOutcome::CompletedUncharged { artifact_uri })
            }
            Err(e) => {
                // Job is terminal now; retrying would skip the debit anyway
                warn!(job_id = %job.id, error = %e, "Generation debit failed after commit");
                Ok(CompletionOutcome::CompletedUncharged { artifact_uri })
            }
        }
    }
}

/// Run the generation provider and store its output under `key`
pub(crate) async fn render_and_store(
    generator: &dyn GenerationProvider,
    artifacts: &dyn ArtifactStore,
    request: &GenerationRequest,
    key: &str,
) -> Result<String> {
    let (data, content_type) = match generator
        .generate(request)
        .await
        .map_err(AppError::Generation)?
    {
        GeneratedArtifact::Bytes { data, content_type } => (data, content_type),
        GeneratedArtifact::Uri(uri) => {
            debug!(key = %key, uri = %uri, "Downloading generated artifact");
            let data = generator
                .download(&uri)
                .await
                .map_err(AppError::Generation)?;
            (data, DEFAULT_ARTIFACT_CONTENT_TYPE.to_string())
        }
    };

    artifacts
        .put(key, data, &content_type)
        .await
        .map_err(|e| AppError::Storage(e.to_string()))
}
