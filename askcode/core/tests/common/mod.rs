//! Shared test fixtures: a transport that serves canned NDJSON bodies

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use askcode_core::backend::{BackendError, ByteStream, StreamRequest, StreamTransport};
use askcode_core::AskConfig;
use async_trait::async_trait;
use futures::stream::{self, StreamExt};

/// One canned response
#[derive(Clone, Debug, Default)]
pub struct Script {
    /// Body chunks, served in order
    pub chunks: Vec<Vec<u8>>,
    /// Keep the body open after the last chunk
    pub hang: bool,
    /// Fail with this status instead of opening a body
    pub status: Option<(u16, String)>,
}

impl Script {
    pub fn chat(deltas: &[&str]) -> Self {
        Self {
            chunks: deltas.iter().map(|d| chat_line(d).into_bytes()).collect(),
            ..Default::default()
        }
    }

    pub fn raw(chunks: &[&[u8]]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_vec()).collect(),
            ..Default::default()
        }
    }

    pub fn status(status: u16, body: &str) -> Self {
        Self {
            status: Some((status, body.to_string())),
            ..Default::default()
        }
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }
}

/// NDJSON line as sent by `/api/chat`
pub fn chat_line(delta: &str) -> String {
    format!(
        "{}\n",
        serde_json::json!({"model": "test-model", "message": {"role": "assistant", "content": delta}, "done": false})
    )
}

/// Serves one [`Script`] per call; the last script repeats
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    calls: AtomicUsize,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next_script(&self) -> Script {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.len() > 1 {
            scripts.pop_front().unwrap()
        } else {
            scripts.front().cloned().unwrap_or_default()
        }
    }
}

#[async_trait]
impl StreamTransport for ScriptedTransport {
    fn name(&self) -> &str {
        "Scripted"
    }

    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, BackendError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        let script = self.next_script();
        if let Some((status, body)) = script.status {
            return Err(BackendError::Status { status, body });
        }

        let body = stream::iter(script.chunks.into_iter().map(Ok));
        if script.hang {
            Ok(body.chain(stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }
}

/// Config with fast polling for tests
pub fn test_config() -> AskConfig {
    AskConfig {
        default_model: Some("test-model".to_string()),
        poll_interval: Duration::from_millis(10),
        render_interval: Duration::from_millis(10),
        channel_capacity: 16,
        ..Default::default()
    }
}
