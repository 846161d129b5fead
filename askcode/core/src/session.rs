//! Chat Sessions
//!
//! A [`ChatSession`] is one conversation pinned to a code selection. It owns
//! the message history and at most one running [`ChatWorker`]; all history
//! mutation happens here, in response to worker events, never in the worker.
//!
//! # Turn lifecycle
//!
//! ```text
//! ask() ──► user message appended ──► worker spawned ──► Chunk* [Error] Done
//!   │                                                                │
//!   └── ask()/stop() while busy: stop worker, keep partial text      ▼
//!                                                  assistant message appended
//! ```
//!
//! Events are tagged with their [`TurnId`]; events from a turn that has
//! already been stopped or replaced are dropped.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::backend::StreamTransport;
use crate::config::AskConfig;
use crate::messages::{Message, Role, SessionId, TurnId};
use crate::prompt::{lang_hint, system_context, Action};
use crate::relay::ERROR_MARKER;
use crate::render::RenderCoalescer;
use crate::worker::{ChatWorker, WorkerEvent, WorkerEventKind, WorkerHandle};

/// How a turn ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Stream ran to the end
    Completed,
    /// At least one error was reported
    Failed,
    /// Stopped by the user or replaced by a new turn
    Stopped,
}

/// Statistics for a finished turn
#[derive(Clone, Debug, PartialEq)]
pub struct TurnSummary {
    pub turn: TurnId,
    /// Characters of assistant text received
    pub chars: usize,
    pub elapsed: Duration,
    pub outcome: TurnOutcome,
}

impl TurnSummary {
    #[must_use]
    pub fn chars_per_second(&self) -> u64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            (self.chars as f64 / secs) as u64
        } else {
            0
        }
    }

    /// Status line, e.g. `Done in 1.2s | 340 chars @ 283 cps`
    #[must_use]
    pub fn status_line(&self) -> String {
        match self.outcome {
            TurnOutcome::Stopped => "Generation stopped".to_string(),
            TurnOutcome::Completed | TurnOutcome::Failed => format!(
                "Done in {:.1}s | {} chars @ {} cps",
                self.elapsed.as_secs_f64(),
                self.chars,
                self.chars_per_second()
            ),
        }
    }
}

/// What a session reports back to its driver after applying an event
#[derive(Clone, Debug, PartialEq)]
pub enum SessionUpdate {
    Chunk(String),
    Error(String),
    TurnFinished(TurnSummary),
}

/// The turn currently streaming
struct ActiveTurn {
    handle: WorkerHandle,
    assistant: String,
    started: Instant,
    chars: usize,
    errored: bool,
}

/// One conversation pinned to a code selection
pub struct ChatSession {
    id: SessionId,
    title: String,
    lang: &'static str,
    history: Vec<Message>,
    model: Option<String>,
    config: Arc<AskConfig>,
    transport: Arc<dyn StreamTransport>,
    active: Option<ActiveTurn>,
    last_turn: TurnId,
    coalescer: RenderCoalescer,
    events_tx: mpsc::UnboundedSender<WorkerEvent>,
    events_rx: mpsc::UnboundedReceiver<WorkerEvent>,
    status: String,
}

impl ChatSession {
    /// Open a session on `code`, labelled with `file_name`
    pub fn new(
        code: &str,
        file_name: &str,
        config: Arc<AskConfig>,
        transport: Arc<dyn StreamTransport>,
    ) -> Self {
        let lang = lang_hint(file_name);
        let title = if file_name.is_empty() {
            "selection".to_string()
        } else {
            file_name.to_string()
        };

        let mut coalescer = RenderCoalescer::new(config.render_interval);
        coalescer.push_code_context(code, lang);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let id = SessionId::new();
        tracing::info!(session = %id, title = %title, lang = lang, "Session opened");

        Self {
            id,
            title,
            lang,
            history: vec![system_context(code, lang)],
            model: None,
            config,
            transport,
            active: None,
            last_turn: TurnId(0),
            coalescer,
            events_tx,
            events_rx,
            status: "Ready".to_string(),
        }
    }

    /// Use a specific model instead of the configured default
    #[must_use]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn lang(&self) -> &'static str {
        self.lang
    }

    /// Conversation history, pinned system message first
    #[must_use]
    pub fn history(&self) -> &[Message] {
        &self.history
    }

    /// Model this session's turns will use
    #[must_use]
    pub fn model(&self) -> Option<String> {
        self.config.resolve_model(self.model.as_deref())
    }

    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.active.is_some()
    }

    /// Status line text
    #[must_use]
    pub fn status(&self) -> &str {
        &self.status
    }

    /// Text streamed so far in the running turn
    #[must_use]
    pub fn pending_reply(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.assistant.as_str())
    }

    /// Send a user message and start streaming the reply
    ///
    /// Blank input is ignored. A running turn is stopped first and its
    /// partial reply kept in history.
    pub fn ask(&mut self, text: &str) -> Option<TurnId> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        if self.active.is_some() {
            self.finish_active(TurnOutcome::Stopped);
        }

        self.history.push(Message::user(text));
        self.coalescer.push_message(Role::User, text);
        Some(self.start_turn())
    }

    /// Run one of the canned instructions
    pub fn run_action(&mut self, action: Action) -> Option<TurnId> {
        self.ask(action.instruction())
    }

    fn start_turn(&mut self) -> TurnId {
        let turn = self.last_turn.next();
        self.last_turn = turn;

        let worker = ChatWorker::new(
            turn,
            self.history.clone(),
            self.model.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.config),
        );
        let handle = worker.spawn(self.events_tx.clone());

        self.coalescer.begin_assistant();
        self.status = "Generating…".to_string();
        self.active = Some(ActiveTurn {
            handle,
            assistant: String::new(),
            started: Instant::now(),
            chars: 0,
            errored: false,
        });

        tracing::debug!(session = %self.id, turn = %turn, "Turn started");
        turn
    }

    /// Apply one worker event
    ///
    /// Returns `None` for events that belong to a stopped or replaced turn.
    pub fn apply(&mut self, event: WorkerEvent) -> Option<SessionUpdate> {
        let active = self.active.as_mut()?;
        if active.handle.turn() != event.turn {
            tracing::trace!(session = %self.id, turn = %event.turn, "Dropping stale event");
            return None;
        }

        match event.kind {
            WorkerEventKind::Chunk(text) => {
                active.chars += text.chars().count();
                active.assistant.push_str(&text);
                self.coalescer.push_fragment(&text);
                Some(SessionUpdate::Chunk(text))
            }
            WorkerEventKind::Error(message) => {
                active.errored = true;
                let shown = message.trim_start_matches(ERROR_MARKER).trim();
                self.coalescer.push_error(shown);
                self.status = message.clone();
                Some(SessionUpdate::Error(message))
            }
            WorkerEventKind::Done => {
                let outcome = if active.errored {
                    TurnOutcome::Failed
                } else {
                    TurnOutcome::Completed
                };
                self.finish_active(outcome)
                    .map(SessionUpdate::TurnFinished)
            }
        }
    }

    /// Wait for the next event of the running turn and apply it
    ///
    /// Returns `None` once no turn is running.
    pub async fn next_update(&mut self) -> Option<SessionUpdate> {
        loop {
            if self.active.is_none() {
                return None;
            }
            let event = self.events_rx.recv().await?;
            if let Some(update) = self.apply(event) {
                return Some(update);
            }
        }
    }

    /// Stop the running turn, keeping whatever text already arrived
    pub fn stop(&mut self) -> Option<TurnSummary> {
        self.finish_active(TurnOutcome::Stopped)
    }

    /// Cancel any in-flight worker before the session goes away
    pub fn close(&mut self) {
        if self.stop().is_some() {
            tracing::info!(session = %self.id, "Session closed mid-turn");
        } else {
            tracing::info!(session = %self.id, "Session closed");
        }
    }

    fn finish_active(&mut self, outcome: TurnOutcome) -> Option<TurnSummary> {
        let active = self.active.take()?;

        if outcome == TurnOutcome::Stopped {
            active.handle.stop();
            if !active.assistant.is_empty() {
                self.history.push(Message::assistant(active.assistant));
            }
        } else {
            self.history.push(Message::assistant(active.assistant));
        }
        self.coalescer.finish_assistant();

        let summary = TurnSummary {
            turn: active.handle.turn(),
            chars: active.chars,
            elapsed: active.started.elapsed(),
            outcome,
        };
        if outcome != TurnOutcome::Failed {
            self.status = summary.status_line();
        }

        tracing::info!(
            session = %self.id,
            turn = %summary.turn,
            chars = summary.chars,
            outcome = ?summary.outcome,
            "Turn finished"
        );
        Some(summary)
    }

    /// Render the transcript if it changed since the last tick (or `force`)
    pub fn render_tick(&mut self, force: bool) -> Option<String> {
        self.coalescer.tick(force)
    }

    /// Render interval for the driver's timer
    #[must_use]
    pub fn render_interval(&self) -> Duration {
        self.coalescer.interval()
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        if let Some(ref active) = self.active {
            active.handle.stop();
        }
    }
}
