use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use registry::FunctionRegistry;

use crate::{ControlError, ControlMessage, apply};

/// Sending side of the control plane. `Ok` means the receiver applied the
/// message to its registry.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    async fn send(&self, message: &ControlMessage) -> Result<(), ControlError>;
}

/// Sends messages to an rproxy process over HTTP.
pub struct HttpControlClient {
    url: String,
    client: reqwest::Client,
}

impl HttpControlClient {
    pub fn new(url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ControlPlane for HttpControlClient {
    async fn send(&self, message: &ControlMessage) -> Result<(), ControlError> {
        let response = self
            .client
            .post(&self.url)
            .json(message)
            .send()
            .await
            .map_err(|err| ControlError::Unreachable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            tracing::debug!(function = %message.name, delete = message.is_delete(), "control message acknowledged");
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(ControlError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

/// Applies messages to a registry in the same process.
pub struct LocalControlPlane {
    registry: Arc<FunctionRegistry>,
}

impl LocalControlPlane {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }
}

#[async_trait]
impl ControlPlane for LocalControlPlane {
    async fn send(&self, message: &ControlMessage) -> Result<(), ControlError> {
        apply(&self.registry, message)
    }
}
