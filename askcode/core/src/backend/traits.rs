//! Streaming Transport Traits
//!
//! The relay does not talk HTTP directly. It asks a [`StreamTransport`] to
//! open a response body for a [`StreamRequest`] and then decodes the raw
//! bytes itself, so tests can swap the Ollama client for a scripted body.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::Serialize;
use thiserror::Error;

use crate::config::Endpoint;
use crate::messages::Message;

/// Raw response body, chunked as it arrives from the server
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, BackendError>>;

/// Errors raised while talking to the inference server
#[derive(Debug, Error)]
pub enum BackendError {
    /// No model override and no configured default
    #[error("No model specified")]
    NoModel,

    /// The server answered with a non-success status
    #[error("HTTP {status}: {body}")]
    Status {
        /// Status code
        status: u16,
        /// Response body, as far as it could be read
        body: String,
    },

    /// Connection, timeout or body read failure
    #[error("{}", transport_message(.0))]
    Transport(#[from] reqwest::Error),
}

/// reqwest's message plus its source chain, with timeouts named as such
fn transport_message(err: &reqwest::Error) -> String {
    let mut message = if err.is_timeout() {
        format!("Request timed out: {err}")
    } else {
        err.to_string()
    };

    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

/// What a turn sends: a linearised prompt or a structured history
///
/// Serialised flattened into the request, so it becomes either a
/// `"prompt"` or a `"messages"` key.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPayload {
    /// Generation endpoint
    Prompt(String),
    /// Chat endpoint
    Messages(Vec<Message>),
}

impl RelayPayload {
    /// Endpoint this payload is posted to
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        match self {
            RelayPayload::Prompt(_) => Endpoint::Generate,
            RelayPayload::Messages(_) => Endpoint::Chat,
        }
    }
}

/// Sampling options forwarded verbatim to the server
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub num_ctx: u32,
}

/// Body of a streaming request
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StreamRequest {
    pub model: String,
    #[serde(flatten)]
    pub payload: RelayPayload,
    pub options: GenerationOptions,
    pub keep_alive: String,
    pub stream: bool,
}

impl StreamRequest {
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.payload.endpoint()
    }
}

/// Opens streaming response bodies
#[async_trait]
pub trait StreamTransport: Send + Sync {
    /// Transport name for logs (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Send the request and return the response body as a byte stream
    ///
    /// Implementations must report HTTP error statuses as
    /// [`BackendError::Status`] instead of returning the error body as a stream.
    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, BackendError>;
}
