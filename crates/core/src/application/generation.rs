// On-demand generation against an already trained model

use crate::application::completion::{render_and_store, OwnerLocks};
use crate::domain::{DebitOutcome, JobId, JobStatus, TrainingJob, UserId};
use crate::error::{AppError, Result};
use crate::port::{
    ArtifactStore, CreditLedger, GenerationProvider, GenerationRequest, IdProvider,
    JobRepository, PricingRepository, ProviderError, TimeProvider,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateImageRequest {
    pub owner: UserId,
    pub job_id: JobId,
    /// Free text appended after the model's trigger word
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedImage {
    pub job_id: JobId,
    pub artifact_uri: String,
    pub charged: i64,
    pub balance: i64,
}

/// Storage key of an on-demand image; `suffix` keeps repeated prompts apart
pub fn generated_image_key(job: &TrainingJob, suffix: &str) -> String {
    format!("{}/generated-{}-{}.jpg", job.owner, job.id, suffix)
}

pub struct GenerationService {
    job_repo: Arc<dyn JobRepository>,
    ledger: Arc<dyn CreditLedger>,
    pricing: Arc<dyn PricingRepository>,
    generator: Arc<dyn GenerationProvider>,
    artifacts: Arc<dyn ArtifactStore>,
    owners: OwnerLocks,
    ids: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl GenerationService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        job_repo: Arc<dyn JobRepository>,
        ledger: Arc<dyn CreditLedger>,
        pricing: Arc<dyn PricingRepository>,
        generator: Arc<dyn GenerationProvider>,
        artifacts: Arc<dyn ArtifactStore>,
        owners: OwnerLocks,
        ids: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            job_repo,
            ledger,
            pricing,
            generator,
            artifacts,
            owners,
            ids,
            time_provider,
        }
    }

    /// Render `req.prompt` with the owner's trained model and charge for it
    ///
    /// The image is recorded on the job only once the debit went through.
    pub async fn generate(&self, req: GenerateImageRequest) -> Result<GeneratedImage> {
        if req.owner.trim().is_empty() {
            return Err(AppError::Validation("owner must not be empty".to_string()));
        }
        let prompt = req.prompt.trim();
        if prompt.is_empty() {
            return Err(AppError::Validation("prompt must not be empty".to_string()));
        }

        let job = self
            .job_repo
            .find_by_id(&req.job_id)
            .await?
            .filter(|job| job.owner == req.owner)
            .ok_or_else(|| AppError::NotFound(format!("Job {} not found", req.job_id)))?;
        if job.status != JobStatus::Succeeded {
            return Err(AppError::Validation(format!(
                "job {} is {}, no trained model yet",
                job.id, job.status
            )));
        }
        let model_version = job.model_version.clone().ok_or_else(|| {
            AppError::Generation(ProviderError::Decode(format!(
                "no trained model version for job {}",
                job.id
            )))
        })?;

        let _owner = self.owners.acquire(&job.owner).await;

        let cost = self
            .pricing
            .current()
            .await?
            .ok_or(AppError::PricingUnavailable)?
            .generation_cost;
        let available = self.ledger.balance(&job.owner).await?;
        if available < cost {
            return Err(AppError::InsufficientCredits {
                required: cost,
                available,
            });
        }

        let request = GenerationRequest {
            model_version,
            prompt: format!("{} {}", job.prompt.trigger_word, prompt),
            style_link: None,
        };
        let key = generated_image_key(&job, &self.ids.generate_id());
        info!(job_id = %job.id, key = %key, "Generating on-demand image");
        let artifact_uri = render_and_store(
            self.generator.as_ref(),
            self.artifacts.as_ref(),
            &request,
            &key,
        )
        .await?;

        let balance = match self.ledger.debit(&job.owner, cost).await? {
            DebitOutcome::Debited { balance } => balance,
            DebitOutcome::InsufficientFunds { balance, required } => {
                warn!(job_id = %job.id, key = %key, "Balance drained during generation, image not recorded");
                return Err(AppError::InsufficientCredits {
                    required,
                    available: balance,
                });
            }
        };

        let now = self.time_provider.now_millis();
        let recorded = match self.job_repo.append_artifact(&job.id, &artifact_uri, now).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(AppError::InvalidState(format!(
                "Job {} is no longer SUCCEEDED",
                job.id
            ))),
            Err(e) => Err(e),
        };
        if let Err(e) = recorded {
            error!(job_id = %job.id, error = %e, "Failed to record generated image, refunding");
            if let Err(refund_err) = self.ledger.credit(&job.owner, cost).await {
                error!(job_id = %job.id, error = %refund_err, "Refund failed");
            }
            return Err(e);
        }

        info!(
            job_id = %job.id,
            owner = %job.owner,
            charged = cost,
            balance = balance,
            artifact_uri = %artifact_uri,
            "On-demand image generated"
        );
        Ok(GeneratedImage {
            job_id: job.id,
            artifact_uri,
            charged: cost,
            balance,
        })
    }
}
