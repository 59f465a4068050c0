//! HTTP-backed model provider.
//!
//! Speaks a small JSON gateway protocol: `POST {base}/v1/generate` for
//! generation steps and `GET {base}/v1/health` for probes. The gateway in
//! front of the actual provider normalizes vendor wire formats, so this
//! backend stays vendor-agnostic.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, instrument};

use atrium_core::invocations::ToolRequest;

use crate::backend::{BackendError, BackendTurn, GenerateRequest, ModelBackend};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Gateway response body for a generation step.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<ToolRequest>,
}

/// [`ModelBackend`] over an HTTP model gateway.
pub struct RemoteBackend {
    provider: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl RemoteBackend {
    /// Backend for the given provider key and gateway base URL.
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be constructed.
    pub fn new(
        provider: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, BackendError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        let base_url = base_url.into();
        Ok(Self {
            provider: provider.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

#[async_trait]
impl ModelBackend for RemoteBackend {
    fn provider(&self) -> &str {
        &self.provider
    }

    #[instrument(skip(self, request), fields(provider = %self.provider, model = %request.model))]
    async fn generate(&self, request: &GenerateRequest) -> Result<BackendTurn, BackendError> {
        let url = format!("{}/v1/generate", self.base_url);
        let response = self
            .authorize(self.client.post(&url).json(request))
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Unavailable(body));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(BackendError::Http {
                status: status.as_u16(),
                message: body,
            });
        }

        let parsed: GenerateResponse = response
            .json()
            .await
            .map_err(|e| BackendError::InvalidResponse(e.to_string()))?;
        if parsed.content.is_none() && parsed.tool_calls.is_empty() {
            return Err(BackendError::InvalidResponse(
                "neither content nor toolCalls present".into(),
            ));
        }

        debug!(
            tool_calls = parsed.tool_calls.len(),
            has_content = parsed.content.is_some(),
            "generation step complete"
        );
        Ok(BackendTurn {
            content: parsed.content,
            tool_requests: parsed.tool_calls,
        })
    }

    async fn probe(&self) -> Result<(), BackendError> {
        let url = format!("{}/v1/health", self.base_url);
        let response = self
            .authorize(self.client.get(&url).timeout(PROBE_TIMEOUT))
            .send()
            .await
            .map_err(|e| BackendError::Transport(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(BackendError::Unavailable(format!(
                "health endpoint returned {}",
                response.status()
            )))
        }
    }
}
