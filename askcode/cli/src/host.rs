//! Host mode
//!
//! The long-lived instance that owns the hand-off socket. Every selection it
//! receives becomes its own session, driven on its own task, whose transcript
//! is rewritten to `<out>/<session-id>.html` whenever the render coalescer
//! reports a change.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use askcode_core::ipc::{default_socket_path, HandoffCommand, HandoffListener};
use askcode_core::{
    html_document, Action, AskConfig, ChatSession, OllamaBackend, SessionUpdate, StreamTransport,
};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Host settings from the command line
#[derive(Clone, Debug)]
pub struct HostOptions {
    /// Directory transcripts are written to
    pub out_dir: PathBuf,
    /// Action run on every received selection
    pub action: Action,
    /// Model every session uses
    pub model: String,
}

/// Run until Ctrl-C
pub async fn run(
    config: Arc<AskConfig>,
    backend: Arc<OllamaBackend>,
    options: HostOptions,
) -> anyhow::Result<()> {
    let socket_path = config
        .socket_path
        .clone()
        .unwrap_or_else(default_socket_path);
    let listener = HandoffListener::bind(&socket_path)
        .await
        .with_context(|| format!("Failed to bind hand-off socket {}", socket_path.display()))?;

    tokio::fs::create_dir_all(&options.out_dir)
        .await
        .with_context(|| format!("Failed to create {}", options.out_dir.display()))?;

    backend.warm_up(&options.model);
    info!(
        socket = ?listener.socket_path(),
        out = ?options.out_dir,
        model = %options.model,
        action = %options.action,
        "Host ready"
    );
    eprintln!("askcode host listening on {}", listener.socket_path().display());

    let transport: Arc<dyn StreamTransport> = backend;
    let shutdown = CancellationToken::new();
    let mut sessions = JoinSet::new();

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let received = tokio::select! {
            biased;
            signal = &mut ctrl_c => {
                if let Err(e) = signal {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Shutdown requested");
                break;
            }
            received = listener.accept() => received,
        };

        match received {
            Ok(HandoffCommand::OpenSession { code, file }) => {
                let session = ChatSession::new(
                    &code,
                    &file,
                    Arc::clone(&config),
                    Arc::clone(&transport),
                )
                .with_model(options.model.clone());
                info!(session = %session.id(), title = %session.title(), "Hand-off received");

                sessions.spawn(drive_session(
                    session,
                    options.action,
                    options.out_dir.clone(),
                    shutdown.child_token(),
                ));
            }
            Err(e) => warn!(error = %e, "Rejected hand-off"),
        }

        while let Some(finished) = sessions.try_join_next() {
            report(finished);
        }
    }

    shutdown.cancel();
    while let Some(finished) = sessions.join_next().await {
        report(finished);
    }

    info!("Host stopped");
    Ok(())
}

fn report(finished: Result<anyhow::Result<PathBuf>, tokio::task::JoinError>) {
    match finished {
        Ok(Ok(path)) => info!(path = ?path, "Session finished"),
        Ok(Err(e)) => error!(error = %e, "Session failed"),
        Err(e) => error!(error = %e, "Session task panicked"),
    }
}

enum Step {
    Shutdown,
    Tick,
    Update(Option<SessionUpdate>),
}

/// Run the action turn and keep the transcript file current
async fn drive_session(
    mut session: ChatSession,
    action: Action,
    out_dir: PathBuf,
    shutdown: CancellationToken,
) -> anyhow::Result<PathBuf> {
    let path = out_dir.join(format!("{}.html", session.id()));
    let title = format!(
        "{} - askcode {}",
        session.title(),
        chrono::Local::now().format("%Y-%m-%d %H:%M")
    );

    session.run_action(action);

    let mut ticker = tokio::time::interval(session.render_interval());
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        let step = tokio::select! {
            biased;
            () = shutdown.cancelled() => Step::Shutdown,
            _ = ticker.tick() => Step::Tick,
            update = session.next_update() => Step::Update(update),
        };

        match step {
            Step::Shutdown => {
                session.close();
                break;
            }
            Step::Tick => {
                if let Some(body) = session.render_tick(false) {
                    write_transcript(&path, &title, &body).await?;
                }
            }
            Step::Update(None) => break,
            Step::Update(Some(SessionUpdate::TurnFinished(summary))) => {
                info!(session = %session.id(), status = %summary.status_line(), "Turn finished");
            }
            Step::Update(Some(SessionUpdate::Error(message))) => {
                warn!(session = %session.id(), error = %message, "Turn reported an error");
            }
            Step::Update(Some(SessionUpdate::Chunk(_))) => {}
        }
    }

    if let Some(body) = session.render_tick(true) {
        write_transcript(&path, &title, &body).await?;
    }
    Ok(path)
}

/// Replace the transcript file in one step so readers never see half a page
async fn write_transcript(path: &Path, title: &str, body: &str) -> anyhow::Result<()> {
    let tmp = path.with_extension("html.tmp");
    tokio::fs::write(&tmp, html_document(title, body))
        .await
        .with_context(|| format!("Failed to write {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
