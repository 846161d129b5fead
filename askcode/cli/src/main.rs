//! askcode
//!
//! Ask a local Ollama model about a piece of code.
//!
//! # Usage
//!
//! ```bash
//! # Explain a selection (IDE external tool)
//! askcode ask --filepath "$FilePath$" --selection "$SelectedText$"
//!
//! # Pipe code in and ask a question
//! cat src/lib.rs | askcode ask --file lib.rs --prompt "Where can this panic?"
//!
//! # Keep a host running; later `ask` calls hand their selection to it
//! askcode host --out ~/askcode-transcripts --action explain
//!
//! # With verbose logging
//! RUST_LOG=debug askcode ask --selection "fn main() {}"
//! ```
//!
//! # Environment Variables
//!
//! - `ASKCODE_CONFIG`: config file path
//! - `ASKCODE_MODEL`, `ASKCODE_ENDPOINT`, `ASKCODE_TEMPERATURE`,
//!   `ASKCODE_NUM_CTX`, `ASKCODE_KEEP_ALIVE`, `ASKCODE_SOCKET`
//! - `OLLAMA_HOST`: Ollama server (`host`, `host:port` or URL)
//! - `RUST_LOG`: Log level (trace, debug, info, warn, error)
//!
//! Logs go to stderr; stdout carries only model output.

mod selection;

#[cfg(unix)]
mod host;

use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use askcode_core::{
    Action, AskConfig, ChatSession, ConfigOverrides, OllamaBackend, SessionUpdate, TurnOutcome,
};

use crate::selection::SelectionArgs;

#[derive(Parser, Debug)]
#[command(name = "askcode", version, about = "Ask a local Ollama model about a code selection")]
struct Cli {
    /// Config file (default: $XDG_CONFIG_HOME/askcode/config.toml)
    #[arg(long, global = true, env = "ASKCODE_CONFIG")]
    config: Option<PathBuf>,

    /// Ollama server URL
    #[arg(long, global = true)]
    url: Option<String>,

    /// Model to use
    #[arg(long, global = true)]
    model: Option<String>,

    /// Hand-off socket path
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask about a selection and stream the answer to stdout
    Ask {
        #[command(flatten)]
        selection: SelectionArgs,

        /// Canned instruction, used when no --prompt is given
        #[arg(long, default_value = "explain")]
        action: Action,

        /// Free-form question
        #[arg(long)]
        prompt: Option<String>,

        /// Do not hand the selection to a running host
        #[arg(long)]
        no_handoff: bool,
    },

    /// Accept hand-offs and write each session's transcript as HTML
    Host {
        /// Transcript directory (default: <tmp>/askcode)
        #[arg(long)]
        out: Option<PathBuf>,

        /// Instruction run on every received selection
        #[arg(long, default_value = "explain")]
        action: Action,
    },

    /// List the models the server has pulled
    Models,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("askcode=info".parse()?)
                .add_directive("askcode_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .init();

    let cli = Cli::parse();
    let overrides = ConfigOverrides {
        url: cli.url.clone(),
        model: cli.model.clone(),
        endpoint: None,
        socket_path: cli.socket.clone(),
    };
    let config = Arc::new(
        AskConfig::load(cli.config.as_deref(), &overrides).context("Failed to load configuration")?,
    );

    match cli.command {
        Command::Ask {
            selection,
            action,
            prompt,
            no_handoff,
        } => ask(config, selection, action, prompt, no_handoff).await,
        Command::Host { out, action } => host(config, out, action).await,
        Command::Models => models(config).await,
    }
}

/// Read stdin only when something is piped in
fn read_piped_stdin() -> std::io::Result<Option<String>> {
    let mut stdin = std::io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }
    let mut buf = Vec::new();
    stdin.read_to_end(&mut buf)?;
    Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
}

/// Model from the config, else the first one the server reports
async fn resolve_model(config: &AskConfig, backend: &OllamaBackend) -> anyhow::Result<String> {
    if let Some(model) = config.resolve_model(None) {
        return Ok(model);
    }
    match backend
        .first_model()
        .await
        .context("No model configured and the model list is unavailable")?
    {
        Some(model) => {
            info!(model = %model, "Using first model reported by the server");
            Ok(model)
        }
        None => bail!("No model configured and the server has none pulled"),
    }
}

#[cfg(unix)]
async fn try_handoff(config: &AskConfig, code: &str, title: &str) -> bool {
    let socket_path = config
        .socket_path
        .clone()
        .unwrap_or_else(askcode_core::ipc::default_socket_path);
    match askcode_core::ipc::send_open_session(&socket_path, code, title).await {
        Ok(delivered) => delivered,
        Err(e) => {
            warn!(error = %e, "Hand-off failed, answering here");
            false
        }
    }
}

#[cfg(not(unix))]
async fn try_handoff(_config: &AskConfig, _code: &str, _title: &str) -> bool {
    false
}

async fn ask(
    config: Arc<AskConfig>,
    args: SelectionArgs,
    action: Action,
    prompt: Option<String>,
    no_handoff: bool,
) -> anyhow::Result<()> {
    let selection = args.resolve(read_piped_stdin)?;

    if !no_handoff && try_handoff(&config, &selection.code, &selection.title).await {
        eprintln!("Handed off to the running askcode host");
        return Ok(());
    }

    let backend = Arc::new(OllamaBackend::from_config(&config).context("Failed to create HTTP client")?);
    let model = resolve_model(&config, &backend).await?;

    let mut session = ChatSession::new(&selection.code, &selection.title, config, backend)
        .with_model(model);
    match prompt.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(question) => session.ask(question),
        None => session.run_action(action),
    };

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut stdout = std::io::stdout();
    let mut failed = false;
    loop {
        let next = tokio::select! {
            biased;
            _ = &mut ctrl_c => None,
            update = session.next_update() => Some(update),
        };

        let Some(update) = next else {
            if let Some(summary) = session.stop() {
                writeln!(stdout)?;
                eprintln!("{}", summary.status_line());
            }
            break;
        };

        match update {
            None => break,
            Some(SessionUpdate::Chunk(text)) => {
                write!(stdout, "{text}")?;
                stdout.flush()?;
            }
            Some(SessionUpdate::Error(message)) => eprintln!("{message}"),
            Some(SessionUpdate::TurnFinished(summary)) => {
                writeln!(stdout)?;
                eprintln!("{}", summary.status_line());
                failed = summary.outcome == TurnOutcome::Failed;
            }
        }
    }

    session.close();
    if failed {
        bail!("Turn failed");
    }
    Ok(())
}

#[cfg(unix)]
async fn host(config: Arc<AskConfig>, out: Option<PathBuf>, action: Action) -> anyhow::Result<()> {
    let backend = Arc::new(OllamaBackend::from_config(&config).context("Failed to create HTTP client")?);
    let model = resolve_model(&config, &backend).await?;
    let options = host::HostOptions {
        out_dir: out.unwrap_or_else(|| std::env::temp_dir().join("askcode")),
        action,
        model,
    };
    host::run(config, backend, options).await
}

#[cfg(not(unix))]
async fn host(_config: Arc<AskConfig>, _out: Option<PathBuf>, _action: Action) -> anyhow::Result<()> {
    bail!("Host mode needs Unix domain sockets")
}

async fn models(config: Arc<AskConfig>) -> anyhow::Result<()> {
    let backend = OllamaBackend::from_config(&config).context("Failed to create HTTP client")?;
    let models = backend
        .list_models()
        .await
        .with_context(|| format!("Failed to list models at {}", backend.base_url()))?;

    let default = config.resolve_model(None);
    if models.is_empty() {
        eprintln!("No models pulled on {}", backend.base_url());
    }
    for model in models {
        let marker = if default.as_deref() == Some(model.as_str()) { "*" } else { " " };
        println!("{marker} {model}");
    }
    Ok(())
}
