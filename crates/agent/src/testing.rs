//! Scripted backend for tests.
//!
//! Each `chat` call pops the next [`Script`] and plays it back as an
//! Ollama-style response body. Requests are recorded so tests can check
//! exactly which snapshot each generation sent.

use async_trait::async_trait;
use bytes::Bytes;
use parley_core::error::ProviderError;
use parley_core::provider::{ByteStream, ChatRequest, Provider};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// One NDJSON frame, newline included.
pub fn frame(content: &str, done: bool) -> Bytes {
    let line = serde_json::json!({
        "message": {"role": "assistant", "content": content},
        "done": done,
    });
    Bytes::from(format!("{line}\n"))
}

/// What the next backend call does.
pub enum Script {
    /// Return these body chunks
    Chunks(Vec<Bytes>),
    /// Fail before any body is returned
    Fail(ProviderError),
    /// Return some chunks, then a transport error
    Broken {
        chunks: Vec<Bytes>,
        error: ProviderError,
    },
    /// Wait for `gate` to be notified, then reply
    Gated { reply: String, gate: Arc<Notify> },
    /// Sleep, then reply
    Delayed { reply: String, delay: Duration },
    /// Never answer
    Stall,
}

impl Script {
    /// A reply streamed one word per frame, followed by a `done` frame.
    pub fn reply(text: &str) -> Self {
        Self::Chunks(reply_chunks(text))
    }
}

fn reply_chunks(text: &str) -> Vec<Bytes> {
    let mut chunks: Vec<Bytes> = text
        .split_inclusive(' ')
        .map(|word| frame(word, false))
        .collect();
    chunks.push(frame("", true));
    chunks
}

fn body(chunks: Vec<Bytes>) -> ByteStream {
    Box::pin(futures::stream::iter(chunks.into_iter().map(Ok)))
}

pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue another script.
    pub fn push(&self, script: Script) {
        self.scripts.lock().unwrap().push_back(script);
    }

    /// Every request received so far, oldest first.
    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest) -> Result<ByteStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let script = self.scripts.lock().unwrap().pop_front();

        match script {
            Some(Script::Chunks(chunks)) => Ok(body(chunks)),
            Some(Script::Fail(error)) => Err(error),
            Some(Script::Broken { chunks, error }) => {
                let items = chunks
                    .into_iter()
                    .map(Ok)
                    .chain(std::iter::once(Err(error)));
                Ok(Box::pin(futures::stream::iter(items)))
            }
            Some(Script::Gated { reply, gate }) => {
                gate.notified().await;
                Ok(body(reply_chunks(&reply)))
            }
            Some(Script::Delayed { reply, delay }) => {
                tokio::time::sleep(delay).await;
                Ok(body(reply_chunks(&reply)))
            }
            Some(Script::Stall) => futures::future::pending().await,
            None => Err(ProviderError::Backend {
                status_code: 500,
                message: "no scripted response left".into(),
            }),
        }
    }
}
