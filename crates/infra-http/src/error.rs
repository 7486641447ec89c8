// reqwest -> ProviderError mapping

use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::debug;
use trainwatch_core::error::AppError;
use trainwatch_core::port::ProviderError;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

pub(crate) fn build_client() -> Result<Client, AppError> {
    Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(REQUEST_TIMEOUT)
        .build()
        .map_err(|e| AppError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Network failures are transient; body decoding failures are not
pub(crate) fn map_reqwest_error(err: reqwest::Error) -> ProviderError {
    if err.is_decode() {
        ProviderError::Decode(err.to_string())
    } else {
        ProviderError::Transient(err.to_string())
    }
}

/// Reject non-2xx responses, keeping the body out of the error
///
/// 429 and 5xx are retryable; other statuses are terminal.
pub(crate) async fn check_status(response: Response, what: &str) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    debug!(status = status.as_u16(), body = %body, "{} failed", what);

    if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
        Err(ProviderError::Transient(format!("{} returned {}", what, status)))
    } else {
        Err(ProviderError::Rejected {
            status: status.as_u16(),
            message: format!("{} returned {}", what, status),
        })
    }
}
