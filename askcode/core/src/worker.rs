//! Chat Worker
//!
//! Runs one conversation turn end to end: builds the relay input from a
//! history snapshot, runs the [`StreamRelay`] on its own task and republishes
//! its fragments as [`WorkerEvent`]s.
//!
//! ```text
//!   session ──spawn──► worker task ──spawn──► relay task (network I/O)
//!      ▲                   │   ▲                    │
//!      │  WorkerEvent      │   └── poll(timeout) ◄──┘ mpsc<StreamFragment>
//!      └───────────────────┘
//! ```
//!
//! Every turn ends with exactly one [`WorkerEventKind::Done`]. Once a stop is
//! observed no further `Chunk` or `Error` is emitted.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::backend::{RelayPayload, StreamTransport};
use crate::config::{AskConfig, Endpoint};
use crate::messages::{Message, TurnId};
use crate::prompt::linearize;
use crate::relay::{RelayRequest, StreamFragment, StreamRelay, ERROR_MARKER};

/// What happened during a turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WorkerEventKind {
    /// Incremental content
    Chunk(String),
    /// Failure text, including the `[Error]` marker
    Error(String),
    /// Turn finished (success, error or stop)
    Done,
}

/// Event published by a worker, tagged with its turn
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerEvent {
    pub turn: TurnId,
    pub kind: WorkerEventKind,
}

/// One conversation turn, ready to run
pub struct ChatWorker {
    turn: TurnId,
    messages: Vec<Message>,
    model: Option<String>,
    relay: StreamRelay,
    config: Arc<AskConfig>,
}

impl ChatWorker {
    /// Create a worker over a history snapshot
    ///
    /// `messages` is the full history including the new user message.
    pub fn new(
        turn: TurnId,
        messages: Vec<Message>,
        model: Option<String>,
        transport: Arc<dyn StreamTransport>,
        config: Arc<AskConfig>,
    ) -> Self {
        Self {
            turn,
            messages,
            model,
            relay: StreamRelay::new(transport, Arc::clone(&config)),
            config,
        }
    }

    /// Relay input for the configured endpoint
    #[must_use]
    pub fn relay_request(&self) -> RelayRequest {
        let payload = match self.config.endpoint {
            Endpoint::Chat => RelayPayload::Messages(self.messages.clone()),
            Endpoint::Generate => RelayPayload::Prompt(linearize(&self.messages)),
        };
        RelayRequest {
            payload,
            model: self.model.clone(),
        }
    }

    /// Start the turn on a background task
    pub fn spawn(self, events: mpsc::UnboundedSender<WorkerEvent>) -> WorkerHandle {
        let turn = self.turn;
        let cancel = CancellationToken::new();
        let span = tracing::info_span!("turn", turn = %turn);
        let task = tokio::spawn(self.run(events, cancel.clone()).instrument(span));
        WorkerHandle { turn, cancel, task }
    }

    async fn run(self, events: mpsc::UnboundedSender<WorkerEvent>, cancel: CancellationToken) {
        let turn = self.turn;
        let request = self.relay_request();
        let relay = self.relay.clone();
        let poll_interval = self.config.poll_interval;

        let (tx, mut rx) = mpsc::channel(self.config.channel_capacity);
        let relay_cancel = cancel.child_token();
        let relay_task = {
            let relay_cancel = relay_cancel.clone();
            tokio::spawn(
                async move { relay.run(request, tx, relay_cancel).await }.in_current_span(),
            )
        };

        let emit = |kind: WorkerEventKind| events.send(WorkerEvent { turn, kind }).is_ok();

        loop {
            let fragment = match tokio::time::timeout(poll_interval, rx.recv()).await {
                Err(_) => {
                    if cancel.is_cancelled() {
                        tracing::debug!("Stop observed while waiting");
                        break;
                    }
                    continue;
                }
                Ok(None) => break,
                Ok(Some(fragment)) => fragment,
            };

            if fragment.is_end() || cancel.is_cancelled() {
                break;
            }

            let kind = match fragment {
                StreamFragment::Error(message) => {
                    WorkerEventKind::Error(format!("{ERROR_MARKER} {}", message.trim()))
                }
                StreamFragment::Text(text) => WorkerEventKind::Chunk(text),
                StreamFragment::End => break,
            };

            if !emit(kind) {
                tracing::debug!("Event receiver dropped");
                break;
            }
        }

        // Release the relay: it may be parked on a full channel or the socket
        relay_cancel.cancel();
        drop(rx);
        if let Err(e) = relay_task.await {
            tracing::error!(error = %e, "Relay task failed");
        }

        emit(WorkerEventKind::Done);
        tracing::debug!("Turn finished");
    }
}

/// Handle to a running turn
pub struct WorkerHandle {
    turn: TurnId,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl WorkerHandle {
    #[must_use]
    pub fn turn(&self) -> TurnId {
        self.turn
    }

    /// Ask the turn to stop
    ///
    /// The worker still emits its `Done` event.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the worker task to exit
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            tracing::error!(turn = %self.turn, error = %e, "Worker task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::OllamaBackend;
    use std::time::Duration;

    fn worker(endpoint: Endpoint) -> ChatWorker {
        let config = Arc::new(AskConfig {
            endpoint,
            ..Default::default()
        });
        let transport: Arc<dyn StreamTransport> =
            Arc::new(OllamaBackend::new("http://localhost:11434", Duration::from_secs(1)).unwrap());
        ChatWorker::new(
            TurnId(1),
            vec![Message::system("sys"), Message::user("u")],
            Some("m".to_string()),
            transport,
            config,
        )
    }

    #[test]
    fn test_chat_endpoint_sends_structured_history() {
        let request = worker(Endpoint::Chat).relay_request();
        assert_eq!(
            request.payload,
            RelayPayload::Messages(vec![Message::system("sys"), Message::user("u")])
        );
        assert_eq!(request.model.as_deref(), Some("m"));
    }

    #[test]
    fn test_generate_endpoint_sends_linearised_prompt() {
        let request = worker(Endpoint::Generate).relay_request();
        assert_eq!(
            request.payload,
            RelayPayload::Prompt("sys\nuser: u\nassistant:".to_string())
        );
    }
}
