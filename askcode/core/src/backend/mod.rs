//! Inference Server Backend
//!
//! Access to the local model server through the [`StreamTransport`] trait.
//!
//! # Usage
//!
//! ```ignore
//! use askcode_core::backend::{OllamaBackend, StreamTransport};
//!
//! let backend = OllamaBackend::from_config(&config)?;
//! let body = backend.open_stream(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{
    BackendError, ByteStream, GenerationOptions, RelayPayload, StreamRequest, StreamTransport,
};
