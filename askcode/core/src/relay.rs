//! Stream Relay
//!
//! Proxies one streamed model response into an internal channel.
//!
//! ```text
//!  StreamTransport ──bytes──► LineSplitter ──lines──► LineDecoder ──► mpsc<StreamFragment>
//!                                                                     Text.. [Error] End
//! ```
//!
//! The relay always finishes the channel with exactly one
//! [`StreamFragment::End`], whatever happened before: success, a failure
//! reported as a single [`StreamFragment::Error`], or cancellation.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::backend::{BackendError, GenerationOptions, RelayPayload, StreamRequest, StreamTransport};
use crate::config::AskConfig;

/// Prefix that marks error fragments in rendered output
pub const ERROR_MARKER: &str = "[Error]";

/// One unit of relay output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamFragment {
    /// Text delta, forwarded as soon as it is decoded
    Text(String),
    /// Human-readable failure description (without the marker)
    Error(String),
    /// End of stream, sent exactly once
    End,
}

impl StreamFragment {
    #[must_use]
    pub fn is_end(&self) -> bool {
        matches!(self, StreamFragment::End)
    }
}

impl fmt::Display for StreamFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFragment::Text(text) => f.write_str(text),
            StreamFragment::Error(message) => write!(f, "{ERROR_MARKER} {message}"),
            StreamFragment::End => Ok(()),
        }
    }
}

/// Input for one relay run
#[derive(Clone, Debug)]
pub struct RelayRequest {
    pub payload: RelayPayload,
    /// Model override; falls back to the configured default
    pub model: Option<String>,
}

/// Streams one response from the inference server into a channel
#[derive(Clone)]
pub struct StreamRelay {
    transport: Arc<dyn StreamTransport>,
    config: Arc<AskConfig>,
}

impl StreamRelay {
    pub fn new(transport: Arc<dyn StreamTransport>, config: Arc<AskConfig>) -> Self {
        Self { transport, config }
    }

    /// Run the relay to completion
    ///
    /// Never fails: errors become one `Error` fragment. `End` is always sent
    /// last (unless the receiver is already gone).
    pub async fn run(
        &self,
        request: RelayRequest,
        out: mpsc::Sender<StreamFragment>,
        cancel: CancellationToken,
    ) {
        if let Err(e) = self.relay(request, &out, &cancel).await {
            tracing::warn!(transport = self.transport.name(), error = %e, "Relay failed");
            let _ = out.send(StreamFragment::Error(e.to_string())).await;
        }
        let _ = out.send(StreamFragment::End).await;
    }

    async fn relay(
        &self,
        request: RelayRequest,
        out: &mpsc::Sender<StreamFragment>,
        cancel: &CancellationToken,
    ) -> Result<(), BackendError> {
        let model = self
            .config
            .resolve_model(request.model.as_deref())
            .ok_or(BackendError::NoModel)?;

        if cancel.is_cancelled() {
            return Ok(());
        }

        let stream_request = StreamRequest {
            model,
            payload: request.payload,
            options: GenerationOptions {
                temperature: self.config.temperature,
                num_ctx: self.config.num_ctx,
            },
            keep_alive: self.config.keep_alive.clone(),
            stream: true,
        };

        tracing::info!(
            model = %stream_request.model,
            endpoint = stream_request.endpoint().path(),
            "Requesting stream"
        );

        let mut body = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            opened = self.transport.open_stream(&stream_request) => opened?,
        };

        let mut splitter = LineSplitter::default();
        let mut decoder = LineDecoder::default();

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("Relay cancelled");
                    return Ok(());
                }
                chunk = body.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            for line in splitter.push(&chunk?) {
                if cancel.is_cancelled() {
                    return Ok(());
                }
                if let Some(fragment) = decoder.decode(&line) {
                    if out.send(fragment).await.is_err() {
                        // receiver gone, nobody left to report to
                        return Ok(());
                    }
                }
            }
        }

        if let Some(line) = splitter.finish() {
            if let Some(fragment) = decoder.decode(&line) {
                if !cancel.is_cancelled() {
                    let _ = out.send(fragment).await;
                }
            }
        }

        Ok(())
    }
}

/// Splits a chunked byte body into lines
///
/// Bytes are buffered until a `\n` arrives, so a line (or a multi-byte
/// character) split across chunks is decoded whole.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buffer: Vec<u8>,
}

impl LineSplitter {
    /// Feed a chunk and take every completed line
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Take the trailing line that had no newline, if any
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buffer);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Turns one NDJSON line into a fragment
#[derive(Debug, Default)]
pub struct LineDecoder {
    confirmed_model: Option<String>,
}

impl LineDecoder {
    /// Decode a line
    ///
    /// - blank line: `None`
    /// - JSON object: `message.content`, else `response`; empty deltas are `None`
    /// - JSON object with a string `error`: an `Error` fragment
    /// - anything else: the raw line as text
    pub fn decode(&mut self, line: &str) -> Option<StreamFragment> {
        let line = line.trim_end_matches('\r');
        if line.trim().is_empty() {
            return None;
        }

        let value = match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) if value.is_object() => value,
            _ => return Some(StreamFragment::Text(line.to_string())),
        };

        if self.confirmed_model.is_none() {
            if let Some(model) = value.get("model").and_then(|m| m.as_str()) {
                tracing::debug!(model = %model, "Server confirmed model");
                self.confirmed_model = Some(model.to_string());
            }
        }

        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            return Some(StreamFragment::Error(error.to_string()));
        }

        let delta = value
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .or_else(|| value.get("response").and_then(|r| r.as_str()))
            .unwrap_or_default();

        (!delta.is_empty()).then(|| StreamFragment::Text(delta.to_string()))
    }

    /// Model name reported by the server, once seen
    #[must_use]
    pub fn confirmed_model(&self) -> Option<&str> {
        self.confirmed_model.as_deref()
    }
}
