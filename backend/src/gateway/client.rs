use reqwest::multipart::{Form, Part};
use reqwest::Client as HttpClient;
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::upload::ImageUpload;
use super::wire::{self, BackendPrediction};

/// Per-call lifecycle of a backend request. The gateway itself holds no
/// state between calls, so every call starts from `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Idle,
    Sending,
    Completed,
    TimedOut,
    BackendError,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Model backend did not respond within {0:?}")]
    Timeout(Duration),
    #[error("Model backend returned status {code}: {detail}")]
    UpstreamStatus { code: u16, detail: String },
    #[error("Model backend returned a malformed response: {0}")]
    MalformedResponse(String),
    #[error("Model backend unreachable: {0}")]
    Unreachable(String),
    #[error("Gateway setup failed: {0}")]
    Setup(String),
}

impl GatewayError {
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::Timeout(_) => "timeout",
            GatewayError::UpstreamStatus { .. } => "upstream_status",
            GatewayError::MalformedResponse(_) => "malformed_response",
            GatewayError::Unreachable(_) => "unreachable",
            GatewayError::Setup(_) => "setup",
        }
    }

    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            GatewayError::UpstreamStatus { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The state a request ends in when it fails with this error.
    pub fn state(&self) -> GatewayState {
        match self {
            GatewayError::Timeout(_) => GatewayState::TimedOut,
            _ => GatewayState::BackendError,
        }
    }
}

/// Client for the external model-serving backend.
///
/// One request per call and no retries: re-submitting an upload is left to
/// the caller. The timeout covers connect, send and reading the body, and
/// dropping the returned future aborts the request and frees the connection.
#[derive(Clone)]
pub struct InferenceGateway {
    http_client: HttpClient,
    predict_url: Url,
    health_url: Url,
    timeout: Duration,
}

impl InferenceGateway {
    pub fn new(base_url: &Url, timeout: Duration) -> Result<Self, GatewayError> {
        let mut base = base_url.clone();
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let predict_url = base
            .join("predict")
            .map_err(|e| GatewayError::Setup(e.to_string()))?;
        let health_url = base
            .join("health")
            .map_err(|e| GatewayError::Setup(e.to_string()))?;

        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Setup(e.to_string()))?;

        Ok(Self {
            http_client,
            predict_url,
            health_url,
            timeout,
        })
    }

    pub fn predict_url(&self) -> &Url {
        &self.predict_url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn predict(&self, upload: ImageUpload) -> Result<BackendPrediction, GatewayError> {
        let file_name = upload.file_name();
        let mime_type = upload.mime_type();
        let (bytes, meta) = upload.into_parts();

        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(mime_type)
            .map_err(|e| GatewayError::Setup(e.to_string()))?;
        let mut form = Form::new().part("file", part);
        if let Some(meta) = meta {
            form = form.text("meta", meta);
        }

        log::debug!(
            "Gateway {:?} -> {:?}: POST {}",
            GatewayState::Idle,
            GatewayState::Sending,
            self.predict_url
        );

        let result = self.send_predict(form).await;
        match &result {
            Ok(_) => log::debug!("Gateway {:?} -> {:?}", GatewayState::Sending, GatewayState::Completed),
            Err(e) => log::debug!("Gateway {:?} -> {:?}: {}", GatewayState::Sending, e.state(), e),
        }
        result
    }

    async fn send_predict(&self, form: Form) -> Result<BackendPrediction, GatewayError> {
        let response = self
            .http_client
            .post(self.predict_url.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;

        if !status.is_success() {
            return Err(GatewayError::UpstreamStatus {
                code: status.as_u16(),
                detail: wire::error_detail(&body, status.canonical_reason()),
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
    }

    pub async fn health(&self) -> Result<Value, GatewayError> {
        let response = self
            .http_client
            .get(self.health_url.clone())
            .send()
            .await
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        let body = response.text().await.map_err(|e| self.transport_error(e))?;
        if !status.is_success() {
            return Err(GatewayError::UpstreamStatus {
                code: status.as_u16(),
                detail: wire::error_detail(&body, status.canonical_reason()),
            });
        }

        serde_json::from_str(&body).map_err(|e| GatewayError::MalformedResponse(e.to_string()))
    }

    fn transport_error(&self, err: reqwest::Error) -> GatewayError {
        if err.is_timeout() {
            GatewayError::Timeout(self.timeout)
        } else if err.is_decode() {
            GatewayError::MalformedResponse(err.to_string())
        } else {
            GatewayError::Unreachable(err.to_string())
        }
    }
}
