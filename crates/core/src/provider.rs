//! Provider trait — the abstraction over the assistant backend transport.
//!
//! A Provider knows how to send a conversation snapshot to the backend and
//! hand back the raw response body as a lazy stream of byte buffers. Decoding
//! that body (newline-delimited JSON frames) is the job of the response
//! assembler in `parley-agent`, so the same decoding path runs against real
//! HTTP bodies and scripted test streams.

use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::message::Message;

/// A finite, lazily produced sequence of response body chunks.
///
/// Chunk boundaries are arbitrary: a frame may be split across several
/// chunks, and one chunk may carry several frames.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ProviderError>> + Send>>;

/// The request body sent to `POST <endpoint>/api/chat`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    /// The configured model id (e.g., "llama3.2")
    pub model: String,

    /// The context snapshot, oldest first
    pub messages: Vec<Message>,

    /// Always `false`; the response is still consumed as a chunked stream
    #[serde(default)]
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            stream: false,
        }
    }
}

/// The core Provider trait.
///
/// `chat` resolves once the backend has accepted the request with a success
/// status. Connection failures map to [`ProviderError::Unavailable`] and
/// non-2xx statuses to [`ProviderError::Backend`]; in both cases no body is
/// returned. Failures while reading the returned stream surface as
/// [`ProviderError::StreamInterrupted`] items.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "ollama").
    fn name(&self) -> &str;

    /// Send a chat request and get the response body as a byte stream.
    async fn chat(&self, request: ChatRequest) -> Result<ByteStream, ProviderError>;

    /// Can we reach the backend?
    async fn health_check(&self) -> Result<bool, ProviderError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chat_request_wire_shape() {
        let req = ChatRequest::new("llama3.2", vec![Message::user("hi")]);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "model": "llama3.2",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false
            })
        );
    }
}
