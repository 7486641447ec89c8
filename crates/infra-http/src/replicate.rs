// Replicate adapters: LoRA training and image generation

use crate::error::{build_client, check_status, map_reqwest_error};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use trainwatch_core::domain::ProviderRef;
use trainwatch_core::error::AppError;
use trainwatch_core::port::{
    GeneratedArtifact, GenerationProvider, GenerationRequest, ProviderError, TrainingProvider,
    TrainingSpec, TrainingStatus, TrainingSubmission,
};

pub const REPLICATE_BASE_URL: &str = "https://api.replicate.com";

/// Trainer model the LoRA trainings run on
pub const DEFAULT_TRAINER: &str = "ostris/flux-dev-lora-trainer";

const PREDICTION_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PREDICTION_POLL_ATTEMPTS: usize = 90;

/// Authenticated JSON client shared by both adapters
#[derive(Clone)]
struct ReplicateApi {
    client: Client,
    api_token: String,
    base_url: String,
}

impl ReplicateApi {
    fn new(api_token: String, base_url: String) -> Result<Self, AppError> {
        Ok(Self {
            client: build_client()?,
            api_token,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post<B: Serialize, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
        what: &str,
    ) -> Result<R, ProviderError> {
        let response = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(body)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response, what)
            .await?
            .json::<R>()
            .await
            .map_err(map_reqwest_error)
    }

    async fn get<R: DeserializeOwned>(&self, path: &str, what: &str) -> Result<R, ProviderError> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response, what)
            .await?
            .json::<R>()
            .await
            .map_err(map_reqwest_error)
    }
}

#[derive(Debug, Deserialize)]
struct TrainingResponse {
    id: String,
    status: String,
    #[serde(default)]
    version: Option<String>,
    #[serde(default)]
    output: Option<TrainingOutput>,
}

#[derive(Debug, Deserialize)]
struct TrainingOutput {
    #[serde(default)]
    version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PredictionResponse {
    id: String,
    status: String,
    #[serde(default)]
    output: Option<serde_json::Value>,
}

/// Training provider backed by Replicate trainings
pub struct ReplicateTrainingProvider {
    api: ReplicateApi,
    /// Replicate account that owns the destination models
    owner: String,
    trainer: String,
    trainer_version: String,
}

impl ReplicateTrainingProvider {
    pub fn new(
        api_token: String,
        owner: String,
        trainer_version: String,
    ) -> Result<Self, AppError> {
        Self::with_base_url(api_token, owner, trainer_version, REPLICATE_BASE_URL.to_string())
    }

    /// Create a provider pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        api_token: String,
        owner: String,
        trainer_version: String,
        base_url: String,
    ) -> Result<Self, AppError> {
        Ok(Self {
            api: ReplicateApi::new(api_token, base_url)?,
            owner,
            trainer: DEFAULT_TRAINER.to_string(),
            trainer_version,
        })
    }

    fn training_input(spec: &TrainingSpec) -> serde_json::Value {
        json!({
            "steps": 1000,
            "lora_rank": 16,
            "optimizer": "adamw8bit",
            "batch_size": 1,
            "resolution": "512,768,1024",
            "autocaption": true,
            "input_images": spec.dataset_uri,
            "trigger_word": spec.trigger_word,
            "learning_rate": 0.0004,
            "caption_dropout_rate": 0.05,
            "cache_latents_to_disk": false,
        })
    }
}

#[async_trait]
impl TrainingProvider for ReplicateTrainingProvider {
    async fn submit_training(
        &self,
        spec: &TrainingSpec,
    ) -> Result<TrainingSubmission, ProviderError> {
        // Destination model first; trainings write their weights into it
        let _: serde_json::Value = self
            .api
            .post(
                "/v1/models",
                &json!({
                    "owner": self.owner,
                    "name": spec.model_name,
                    "visibility": "private",
                    "hardware": "cpu",
                }),
                "model creation",
            )
            .await?;
        debug!(model = %spec.model_name, "Destination model created");

        let path = format!(
            "/v1/models/{}/versions/{}/trainings",
            self.trainer, self.trainer_version
        );
        let training: TrainingResponse = self
            .api
            .post(
                &path,
                &json!({
                    "destination": format!("{}/{}", self.owner, spec.model_name),
                    "input": Self::training_input(spec),
                }),
                "training submission",
            )
            .await?;

        info!(
            provider_ref = %training.id,
            status = %training.status,
            owner = %spec.owner,
            "Training accepted by provider"
        );
        Ok(TrainingSubmission {
            provider_ref: training.id,
            model_version: training.version,
        })
    }

    async fn get_status(&self, provider_ref: &ProviderRef) -> Result<TrainingStatus, ProviderError> {
        let training: TrainingResponse = self
            .api
            .get(&format!("/v1/trainings/{}", provider_ref), "training status")
            .await?;
        debug!(provider_ref = %provider_ref, status = %training.status, "Training status");

        match training.status.as_str() {
            "starting" | "processing" => Ok(TrainingStatus::in_progress()),
            "succeeded" => {
                let version = training
                    .output
                    .and_then(|o| o.version)
                    .ok_or_else(|| {
                        ProviderError::Decode(format!(
                            "training {} succeeded without an output version",
                            provider_ref
                        ))
                    })?;
                Ok(TrainingStatus::succeeded(version))
            }
            "failed" | "canceled" => Ok(TrainingStatus::failed()),
            other => Err(ProviderError::Decode(format!(
                "unknown training status {}",
                other
            ))),
        }
    }
}

/// Generation provider backed by Replicate predictions
pub struct ReplicateGenerationProvider {
    api: ReplicateApi,
    poll_interval: Duration,
}

impl ReplicateGenerationProvider {
    pub fn new(api_token: String) -> Result<Self, AppError> {
        Self::with_base_url(api_token, REPLICATE_BASE_URL.to_string())
    }

    /// Create a provider pointing at a custom base URL (useful for testing).
    pub fn with_base_url(api_token: String, base_url: String) -> Result<Self, AppError> {
        Ok(Self {
            api: ReplicateApi::new(api_token, base_url)?,
            poll_interval: PREDICTION_POLL_INTERVAL,
        })
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn prediction_input(request: &GenerationRequest) -> serde_json::Value {
        let mut input = json!({
            "model": "dev",
            "prompt": request.prompt,
            "lora_scale": 1,
            "num_outputs": 1,
            "aspect_ratio": "1:1",
            "output_format": "webp",
            "guidance_scale": 3.5,
            "output_quality": 90,
            "prompt_strength": 0.8,
            "extra_lora_scale": 1,
            "num_inference_steps": 28,
        });
        if let Some(style) = &request.style_link {
            input["image"] = json!(style);
        }
        input
    }

    /// First output URI of a finished prediction
    fn first_output(prediction: &PredictionResponse) -> Result<String, ProviderError> {
        let uri = match &prediction.output {
            Some(serde_json::Value::Array(items)) => items.first().and_then(|v| v.as_str()),
            Some(serde_json::Value::String(uri)) => Some(uri.as_str()),
            _ => None,
        };
        uri.map(str::to_string).ok_or_else(|| {
            ProviderError::Decode(format!("prediction {} has no output", prediction.id))
        })
    }
}

#[async_trait]
impl GenerationProvider for ReplicateGenerationProvider {
    async fn generate(
        &self,
        request: &GenerationRequest,
    ) -> Result<GeneratedArtifact, ProviderError> {
        let mut prediction: PredictionResponse = self
            .api
            .post(
                "/v1/predictions",
                &json!({
                    "version": request.model_version,
                    "input": Self::prediction_input(request),
                }),
                "prediction",
            )
            .await?;

        for _ in 0..PREDICTION_POLL_ATTEMPTS {
            match prediction.status.as_str() {
                "succeeded" => return Self::first_output(&prediction).map(GeneratedArtifact::Uri),
                // A fresh prediction is started on the next completion attempt
                "failed" | "canceled" => {
                    return Err(ProviderError::Transient(format!(
                        "prediction {} {}",
                        prediction.id, prediction.status
                    )))
                }
                _ => {
                    tokio::time::sleep(self.poll_interval).await;
                    prediction = self
                        .api
                        .get(&format!("/v1/predictions/{}", prediction.id), "prediction status")
                        .await?;
                }
            }
        }

        Err(ProviderError::Transient(format!(
            "prediction {} did not finish in time",
            prediction.id
        )))
    }

    async fn download(&self, uri: &str) -> Result<Vec<u8>, ProviderError> {
        let response = self
            .api
            .client
            .get(uri)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let bytes = check_status(response, "artifact download")
            .await?
            .bytes()
            .await
            .map_err(map_reqwest_error)?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trainwatch_core::port::ProviderJobState;
    use wiremock::matchers::{bearer_token, body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn training_provider(server: &MockServer) -> ReplicateTrainingProvider {
        ReplicateTrainingProvider::with_base_url(
            "test-token".into(),
            "acme".into(),
            "abc123".into(),
            server.uri(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_submit_creates_model_then_training() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/models"))
            .and(bearer_token("test-token"))
            .and(body_partial_json(json!({"owner": "acme", "name": "job-1"})))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({"name": "job-1"})))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(
                "/v1/models/ostris/flux-dev-lora-trainer/versions/abc123/trainings",
            ))
            .and(body_partial_json(json!({
                "destination": "acme/job-1",
                "input": {"trigger_word": "123456789", "input_images": "gs://data.zip"}
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": "tr-42",
                "status": "starting",
                "version": "abc123"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let submission = training_provider(&server)
            .submit_training(&TrainingSpec {
                owner: "alice".into(),
                model_name: "job-1".into(),
                dataset_uri: "gs://data.zip".into(),
                trigger_word: "123456789".into(),
            })
            .await
            .unwrap();

        assert_eq!(submission.provider_ref, "tr-42");
        assert_eq!(submission.model_version.as_deref(), Some("abc123"));
    }

    #[tokio::test]
    async fn test_status_mapping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/trainings/running"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "running", "status": "processing"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/trainings/done"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "done",
                "status": "succeeded",
                "output": {"version": "acme/job-1:v9"}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/trainings/broken"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"id": "broken", "status": "failed"})),
            )
            .mount(&server)
            .await;

        let provider = training_provider(&server);
        assert_eq!(
            provider.get_status(&"running".to_string()).await.unwrap().state,
            ProviderJobState::InProgress
        );
        assert_eq!(
            provider.get_status(&"done".to_string()).await.unwrap(),
            TrainingStatus::succeeded("acme/job-1:v9")
        );
        assert_eq!(
            provider.get_status(&"broken".to_string()).await.unwrap().state,
            ProviderJobState::Failed
        );
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/trainings/busy"))
            .respond_with(ResponseTemplate::new(503).set_body_string("upstream secret detail"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/trainings/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let provider = training_provider(&server);
        let busy = provider.get_status(&"busy".to_string()).await.unwrap_err();
        assert!(busy.is_transient());
        assert!(!busy.to_string().contains("secret"));

        let gone = provider.get_status(&"gone".to_string()).await.unwrap_err();
        assert!(matches!(gone, ProviderError::Rejected { status: 404, .. }));
    }

    #[tokio::test]
    async fn test_generate_polls_until_output() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/predictions"))
            .and(body_partial_json(json!({
                "version": "acme/job-1:v9",
                "input": {"prompt": "123456789 is woman", "image": "https://style.png"}
            })))
            .respond_with(
                ResponseTemplate::new(201).set_body_json(json!({"id": "p-1", "status": "starting"})),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/predictions/p-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "p-1",
                "status": "succeeded",
                "output": ["https://replicate.delivery/out-0.webp"]
            })))
            .mount(&server)
            .await;

        let provider = ReplicateGenerationProvider::with_base_url("t".into(), server.uri())
            .unwrap()
            .with_poll_interval(Duration::from_millis(1));
        let artifact = provider
            .generate(&GenerationRequest {
                model_version: "acme/job-1:v9".into(),
                prompt: "123456789 is woman".into(),
                style_link: Some("https://style.png".into()),
            })
            .await
            .unwrap();

        assert_eq!(
            artifact,
            GeneratedArtifact::Uri("https://replicate.delivery/out-0.webp".into())
        );
    }

    #[tokio::test]
    async fn test_download_returns_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/out.webp"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"image-bytes".to_vec()))
            .mount(&server)
            .await;

        let provider = ReplicateGenerationProvider::with_base_url("t".into(), server.uri()).unwrap();
        let bytes = provider
            .download(&format!("{}/out.webp", server.uri()))
            .await
            .unwrap();
        assert_eq!(bytes, b"image-bytes".to_vec());
    }
}
