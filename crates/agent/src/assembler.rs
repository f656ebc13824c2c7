//! Streaming response assembler.
//!
//! The backend answers with newline-delimited JSON frames of the form
//! `{"message": {"content": "..."}, "done": false}`, delivered in chunks
//! whose boundaries have nothing to do with frame boundaries. Bytes are
//! buffered until a full line is available, so a frame (or a multi-byte
//! character) split across chunks is decoded exactly once.

use bytes::BytesMut;
use futures::StreamExt;
use parley_core::error::ProviderError;
use parley_core::provider::ByteStream;
use serde::Deserialize;
use tracing::{debug, warn};

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    message: Option<FrameMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct FrameMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Incremental reducer from response bytes to reply text.
#[derive(Debug, Default)]
pub struct ResponseAssembler {
    buffer: BytesMut,
    text: String,
    frames: usize,
    skipped: usize,
    done: bool,
}

impl ResponseAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk; every complete line it finishes is decoded.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);

        while let Some(newline_pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let mut line = self.buffer.split_to(newline_pos + 1);
            line.truncate(line.len() - 1);
            if line.last() == Some(&b'\r') {
                line.truncate(line.len() - 1);
            }
            self.decode_line(&line);
        }
    }

    fn decode_line(&mut self, raw: &[u8]) {
        let Ok(line) = std::str::from_utf8(raw) else {
            self.skipped += 1;
            warn!(bytes = raw.len(), "Skipping non-UTF-8 response line");
            return;
        };

        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<Frame>(line) {
            Ok(frame) => {
                self.frames += 1;
                if let Some(content) = frame.message.and_then(|m| m.content) {
                    self.text.push_str(&content);
                }
                self.done |= frame.done;
            }
            Err(e) => {
                self.skipped += 1;
                warn!(error = %e, line_len = line.len(), "Skipping malformed response frame");
            }
        }
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Whether a frame with `done: true` has been seen.
    pub fn saw_done(&self) -> bool {
        self.done
    }

    /// Decode any unterminated trailing line and return the full reply.
    pub fn finish(mut self) -> String {
        if !self.buffer.is_empty() {
            let tail = self.buffer.split();
            self.decode_line(&tail);
        }
        debug!(
            frames = self.frames,
            skipped = self.skipped,
            done = self.done,
            chars = self.text.chars().count(),
            "Response assembled"
        );
        self.text
    }
}

/// Drain `stream` to end-of-stream and return the concatenated reply.
///
/// A transport error mid-read fails the whole assembly with
/// [`ProviderError::StreamInterrupted`]; partial text is discarded.
pub async fn assemble(mut stream: ByteStream) -> Result<String, ProviderError> {
    let mut assembler = ResponseAssembler::new();

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => assembler.push(&bytes),
            Err(e) => {
                warn!(
                    error = %e,
                    discarded_chars = assembler.text().chars().count(),
                    "Response stream interrupted"
                );
                return Err(match e {
                    ProviderError::StreamInterrupted(_) => e,
                    other => ProviderError::StreamInterrupted(other.to_string()),
                });
            }
        }
    }

    Ok(assembler.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    const BODY: &str = concat!(
        "{\"message\":{\"role\":\"assistant\",\"content\":\"Héllo\"},\"done\":false}\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\", wörld\"},\"done\":false}\r\n",
        "not json at all\n",
        "\n",
        "{\"message\":{\"role\":\"assistant\",\"content\":\" 🦀\"},\"done\":false}\n",
        "{\"done\":true,\"total_duration\":123}\n",
    );

    fn stream_of(chunks: Vec<Vec<u8>>) -> ByteStream {
        Box::pin(futures::stream::iter(
            chunks.into_iter().map(|c| Ok(Bytes::from(c))),
        ))
    }

    fn split_at(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            chunks.push(bytes[start..cut].to_vec());
            start = cut;
        }
        chunks.push(bytes[start..].to_vec());
        chunks
    }

    #[test]
    fn concatenates_content_in_order() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(BODY.as_bytes());
        assert!(assembler.saw_done());
        assert_eq!(assembler.finish(), "Héllo, wörld 🦀");
    }

    #[tokio::test]
    async fn single_chunk_and_byte_chunks_agree() {
        let bytes = BODY.as_bytes();
        let whole = assemble(stream_of(vec![bytes.to_vec()])).await.unwrap();
        let bytewise = assemble(stream_of(bytes.iter().map(|b| vec![*b]).collect()))
            .await
            .unwrap();
        assert_eq!(whole, bytewise);
        assert_eq!(whole, "Héllo, wörld 🦀");
    }

    #[tokio::test]
    async fn arbitrary_splits_agree() {
        let bytes = BODY.as_bytes();
        let expected = assemble(stream_of(vec![bytes.to_vec()])).await.unwrap();

        let len = bytes.len();
        for step in [2, 3, 5, 7, 11, 13, 31, 64] {
            let cuts: Vec<usize> = (1..len).filter(|i| i % step == 0).collect();
            let got = assemble(stream_of(split_at(bytes, &cuts))).await.unwrap();
            assert_eq!(got, expected, "split every {step} bytes");
        }
    }

    #[test]
    fn unterminated_last_line_is_decoded() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(b"{\"message\":{\"content\":\"a\"}}\n{\"message\":{\"content\":\"b\"}}");
        assert_eq!(assembler.text(), "a");
        assert_eq!(assembler.finish(), "ab");
    }

    #[test]
    fn missing_done_is_fine() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(b"{\"message\":{\"content\":\"partial\"}}\n");
        assert!(!assembler.saw_done());
        assert_eq!(assembler.finish(), "partial");
    }

    #[test]
    fn frames_without_content_add_nothing() {
        let mut assembler = ResponseAssembler::new();
        assembler.push(b"{\"message\":{\"role\":\"assistant\"}}\n{}\n");
        assert_eq!(assembler.finish(), "");
    }

    #[tokio::test]
    async fn transport_error_discards_partial_text() {
        let stream: ByteStream = Box::pin(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"message\":{\"content\":\"half\"}}\n")),
            Err(ProviderError::StreamInterrupted("connection reset".into())),
        ]));
        let result = assemble(stream).await;
        assert!(matches!(result, Err(ProviderError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn empty_stream_is_empty_reply() {
        assert_eq!(assemble(stream_of(vec![])).await.unwrap(), "");
    }
}
