// Google Cloud Storage artifact store (JSON API, publicly readable objects)

use crate::error::{build_client, check_status, map_reqwest_error};
use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use tracing::info;
use trainwatch_core::error::AppError;
use trainwatch_core::port::{ArtifactStore, ProviderError};

pub const GCS_BASE_URL: &str = "https://storage.googleapis.com";

pub struct GcsArtifactStore {
    client: Client,
    bucket: String,
    access_token: String,
    base_url: Url,
    public_base: String,
}

impl GcsArtifactStore {
    pub fn new(bucket: String, access_token: String) -> Result<Self, AppError> {
        Self::with_base_url(bucket, access_token, GCS_BASE_URL.to_string())
    }

    /// Create a store pointing at a custom base URL (useful for testing).
    pub fn with_base_url(
        bucket: String,
        access_token: String,
        base_url: String,
    ) -> Result<Self, AppError> {
        let base_url = Url::parse(&base_url)
            .map_err(|e| AppError::Config(format!("invalid GCS base URL {}: {}", base_url, e)))?;
        Ok(Self {
            client: build_client()?,
            bucket,
            access_token,
            public_base: base_url.as_str().trim_end_matches('/').to_string(),
            base_url,
        })
    }

    /// Public URL objects are served from
    pub fn public_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.public_base, self.bucket, key)
    }

    /// `{base}/{segments...}` with each segment percent-encoded (keys contain `/`)
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ProviderError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ProviderError::Decode("GCS base URL cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl ArtifactStore for GcsArtifactStore {
    async fn put(
        &self,
        key: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<String, ProviderError> {
        let url = self.endpoint(&["upload", "storage", "v1", "b", &self.bucket, "o"])?;
        let size = data.len();
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .query(&[
                ("uploadType", "media"),
                ("name", key),
                ("predefinedAcl", "publicRead"),
            ])
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response, "artifact upload").await?;

        let public_url = self.public_url(key);
        info!(key = %key, bytes = size, url = %public_url, "Artifact stored");
        Ok(public_url)
    }

    async fn exists(&self, key: &str) -> Result<Option<String>, ProviderError> {
        let url = self.endpoint(&["storage", "v1", "b", &self.bucket, "o", key])?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        check_status(response, "artifact lookup").await?;
        Ok(Some(self.public_url(key)))
    }
}
