//! Seam between the dispatcher and the worker HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use shotq_comfyui::api::{ComfyUIApi, ComfyUIApiError};

/// Submission and history lookup against a worker given by base URL.
#[async_trait]
pub trait WorkerGateway: Send + Sync {
    /// Queue `workflow` on `host`; returns the worker's prompt ID.
    async fn submit(&self, host: &str, workflow: &Value, client_id: &str) -> Result<String, ComfyUIApiError>;

    /// Raw `/history/{prompt_id}` response from `host`.
    async fn history(&self, host: &str, prompt_id: &str) -> Result<Value, ComfyUIApiError>;
}

/// Gateway over real HTTP. One pooled client is shared by every host.
#[derive(Debug, Clone)]
pub struct HttpGateway {
    client: reqwest::Client,
}

impl HttpGateway {
    /// Build a gateway whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn api(&self, host: &str) -> ComfyUIApi {
        ComfyUIApi::with_client(self.client.clone(), host)
    }
}

#[async_trait]
impl WorkerGateway for HttpGateway {
    async fn submit(&self, host: &str, workflow: &Value, client_id: &str) -> Result<String, ComfyUIApiError> {
        let response = self.api(host).submit_workflow(workflow, client_id).await?;
        Ok(response.prompt_id)
    }

    async fn history(&self, host: &str, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        self.api(host).get_history(prompt_id).await
    }
}
