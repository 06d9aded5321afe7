use async_trait::async_trait;
use reqwest::Client;
use thiserror::Error;
use tracing::{error, info};

use crate::models::{ErrorBody, GenerateRequest, Generation};

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    Status { status: u16, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// The generation backend as seen by the controller. The HTTP contract is
/// the production implementation; tests script this trait directly.
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError>;
}

pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl GenerationBackend for HttpBackend {
    async fn generate(&self, request: &GenerateRequest) -> Result<Generation, BackendError> {
        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        info!("📤 POST {} (style {})", url, request.style);

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .map(|body| body.message)
                .unwrap_or_else(|_| "Generation failed".to_string());
            error!("❌ Backend error {}: {}", status, message);
            return Err(BackendError::Status {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<Generation>()
            .await
            .map_err(|e| BackendError::Malformed(e.to_string()))
    }
}
