//! Ollama-compatible backend.
//!
//! Sends the context snapshot to `POST <base_url>/api/chat` and hands the
//! raw response body back as a byte stream. The body is newline-delimited
//! JSON; decoding it is left to the response assembler.

use async_trait::async_trait;
use futures::StreamExt;
use parley_core::error::ProviderError;
use parley_core::provider::{ByteStream, ChatRequest};
use std::time::Duration;
use tracing::{debug, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A backend that speaks Ollama's `/api/chat` protocol.
pub struct OllamaProvider {
    name: String,
    base_url: String,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url)
    }
}

fn send_error(e: reqwest::Error) -> ProviderError {
    if e.is_builder() {
        ProviderError::InvalidRequest(e.to_string())
    } else {
        ProviderError::Unavailable(e.to_string())
    }
}

#[async_trait]
impl parley_core::Provider for OllamaProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chat(&self, request: ChatRequest) -> Result<ByteStream, ProviderError> {
        debug!(
            provider = %self.name,
            model = %request.model,
            messages = request.messages.len(),
            "Sending chat request"
        );

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(send_error)?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), body = %error_body, "Backend returned error");
            return Err(ProviderError::Backend {
                status_code: status.as_u16(),
                message: error_body,
            });
        }

        let stream = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| ProviderError::StreamInterrupted(e.to_string())));

        Ok(Box::pin(stream))
    }

    async fn health_check(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(self.tags_url())
            .send()
            .await
            .map_err(send_error)?;
        Ok(response.status().is_success())
    }
}
