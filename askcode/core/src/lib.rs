//! AskCode Core - Code Q&A Sessions over a Local Ollama Server
//!
//! This crate holds everything behind the `askcode` binary except argument
//! parsing: streaming the model's reply, running turns in the background,
//! keeping conversation state and turning a transcript into HTML.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │  ChatSession (history, status, transcript)                   │
//! │     │ ask()/stop()                     ▲ SessionUpdate       │
//! │     ▼                                  │                     │
//! │  ChatWorker task ── WorkerEvent{turn} ─┘                     │
//! │     │ spawn                  ▲ StreamFragment (bounded mpsc) │
//! │     ▼                        │                               │
//! │  StreamRelay task ───────────┘                               │
//! │     │ open_stream()                                          │
//! │     ▼                                                        │
//! │  StreamTransport (OllamaBackend: /api/chat, /api/generate)   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`ChatSession`]: one conversation pinned to a code selection
//! - [`ChatWorker`]: runs a single turn and reports [`WorkerEvent`]s
//! - [`StreamRelay`]: decodes a streamed NDJSON body into [`StreamFragment`]s
//! - [`RenderCoalescer`]: throttled markdown-to-HTML transcript
//! - [`AskConfig`]: settings from file, environment and overrides
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use askcode_core::{AskConfig, ChatSession, OllamaBackend, SessionUpdate};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Arc::new(AskConfig::load(None, &Default::default())?);
//!     let backend = Arc::new(OllamaBackend::from_config(&config)?);
//!
//!     let mut session = ChatSession::new("fn main() {}", "main.rs", config, backend);
//!     session.ask("What does this do?");
//!     while let Some(update) = session.next_update().await {
//!         if let SessionUpdate::Chunk(text) = update {
//!             print!("{text}");
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod config;
#[cfg(unix)]
pub mod ipc;
pub mod messages;
pub mod prompt;
pub mod relay;
pub mod render;
pub mod session;
pub mod worker;

pub use backend::{BackendError, OllamaBackend, StreamTransport};
pub use config::{AskConfig, ConfigError, ConfigOverrides, Endpoint};
pub use messages::{Message, Role, SessionId, TurnId};
pub use prompt::Action;
pub use relay::{RelayRequest, StreamFragment, StreamRelay};
pub use render::{html_document, RenderCoalescer};
pub use session::{ChatSession, SessionUpdate, TurnOutcome, TurnSummary};
pub use worker::{ChatWorker, WorkerEvent, WorkerEventKind, WorkerHandle};
