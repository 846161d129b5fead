//! Single-Instance Hand-off
//!
//! A second `askcode` invocation delivers its selection to the instance that
//! already owns the hand-off socket instead of starting its own session.
//!
//! # Wire format
//!
//! One JSON object per connection, terminated by the client closing its
//! write half:
//!
//! ```json
//! {"cmd": "open_session", "code": "fn main() {}", "file": "main.rs"}
//! ```
//!
//! # Socket Location
//!
//! Default: `$XDG_RUNTIME_DIR/askcode/askcode.sock`
//! Fallback: `/tmp/askcode-$UID/askcode.sock`
//!
//! # Security
//!
//! - Socket created with mode 0600 (owner-only access)
//! - Peer UID checked against our own on every connection

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};

/// How long a client waits for a running instance to accept
pub const CONNECT_TIMEOUT: Duration = Duration::from_millis(200);
/// How long the listener waits for a connected client to finish writing
pub const READ_TIMEOUT: Duration = Duration::from_secs(2);
/// Largest payload accepted (selections are source code, not binaries)
pub const MAX_PAYLOAD_BYTES: usize = 16 * 1024 * 1024;

/// Errors from the hand-off socket
#[derive(Debug, Error)]
pub enum IpcError {
    #[error("IPC I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid hand-off payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// Another instance answers on the socket
    #[error("Another instance is already listening on {0:?}")]
    AlreadyRunning(PathBuf),

    #[error("Hand-off payload exceeds 16 MiB")]
    PayloadTooLarge,

    #[error("Timed out reading hand-off payload")]
    Timeout,

    #[error("Peer UID {peer_uid} does not match our UID {our_uid}")]
    PeerRejected { peer_uid: u32, our_uid: u32 },
}

/// Commands accepted on the hand-off socket
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum HandoffCommand {
    /// Open a new session on a selection
    OpenSession {
        /// Selected code
        code: String,
        /// Display name of the file the code came from
        file: String,
    },
}

/// Get the default hand-off socket path
///
/// Uses `XDG_RUNTIME_DIR` if available, otherwise falls back to
/// `/tmp/askcode-$UID/`.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("askcode").join("askcode.sock")
    } else {
        PathBuf::from(format!("/tmp/askcode-{}/askcode.sock", current_uid()))
    }
}

fn current_uid() -> u32 {
    // SAFETY: getuid has no preconditions and cannot fail
    unsafe { libc::getuid() }
}

/// Deliver a selection to a running instance
///
/// Returns `Ok(false)` when no instance is listening.
pub async fn send_open_session(socket_path: &Path, code: &str, file: &str) -> Result<bool, IpcError> {
    send_command(
        socket_path,
        &HandoffCommand::OpenSession {
            code: code.to_string(),
            file: file.to_string(),
        },
    )
    .await
}

/// Deliver any command to a running instance
pub async fn send_command(socket_path: &Path, command: &HandoffCommand) -> Result<bool, IpcError> {
    let mut stream = match tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(socket_path)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            tracing::debug!(path = ?socket_path, error = %e, "No running instance");
            return Ok(false);
        }
        Err(_) => {
            tracing::debug!(path = ?socket_path, "Connect to running instance timed out");
            return Ok(false);
        }
    };

    let payload = serde_json::to_vec(command)?;
    stream.write_all(&payload).await?;
    stream.shutdown().await?;

    tracing::info!(path = ?socket_path, bytes = payload.len(), "Handed off to running instance");
    Ok(true)
}

/// Owner of the hand-off socket
///
/// The socket file is removed when the listener is dropped.
pub struct HandoffListener {
    socket_path: PathBuf,
    listener: UnixListener,
}

impl HandoffListener {
    /// Bind the socket, clearing a stale file left by a dead instance
    pub async fn bind(socket_path: impl Into<PathBuf>) -> Result<Self, IpcError> {
        let socket_path = socket_path.into();

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if socket_path.exists() {
            let live = matches!(
                tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(&socket_path)).await,
                Ok(Ok(_))
            );
            if live {
                return Err(IpcError::AlreadyRunning(socket_path));
            }
            tracing::warn!(path = ?socket_path, "Removing stale socket file");
            std::fs::remove_file(&socket_path)?;
        }

        let listener = UnixListener::bind(&socket_path)?;
        std::fs::set_permissions(&socket_path, std::fs::Permissions::from_mode(0o600))?;

        tracing::info!(path = ?socket_path, "Listening for hand-offs");
        Ok(Self {
            socket_path,
            listener,
        })
    }

    /// Get the socket path
    #[must_use]
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Wait for the next connection and read its command
    ///
    /// A misbehaving client yields an error for that connection only; the
    /// listener stays usable.
    pub async fn accept(&self) -> Result<HandoffCommand, IpcError> {
        let (stream, _addr) = self.listener.accept().await?;
        validate_peer(&stream)?;
        read_command(stream).await
    }
}

impl Drop for HandoffListener {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            tracing::debug!(path = ?self.socket_path, error = %e, "Socket file already gone");
        }
    }
}

fn validate_peer(stream: &UnixStream) -> Result<(), IpcError> {
    let cred = stream.peer_cred()?;
    let our_uid = current_uid();
    if cred.uid() != our_uid {
        tracing::warn!(peer_uid = cred.uid(), our_uid, "Rejecting hand-off from different user");
        return Err(IpcError::PeerRejected {
            peer_uid: cred.uid(),
            our_uid,
        });
    }
    Ok(())
}

async fn read_command(stream: UnixStream) -> Result<HandoffCommand, IpcError> {
    let mut buf = Vec::new();
    let limit = (MAX_PAYLOAD_BYTES + 1) as u64;
    tokio::time::timeout(READ_TIMEOUT, stream.take(limit).read_to_end(&mut buf))
        .await
        .map_err(|_| IpcError::Timeout)??;

    if buf.len() > MAX_PAYLOAD_BYTES {
        return Err(IpcError::PayloadTooLarge);
    }
    Ok(serde_json::from_slice(&buf)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_payload_wire_format() {
        let command = HandoffCommand::OpenSession {
            code: "x = 1".to_string(),
            file: "a.py".to_string(),
        };
        let json = serde_json::to_string(&command).unwrap();
        assert_eq!(json, r#"{"cmd":"open_session","code":"x = 1","file":"a.py"}"#);
    }

    #[test]
    fn test_unknown_command_is_rejected() {
        let err = serde_json::from_str::<HandoffCommand>(r#"{"cmd":"shutdown"}"#);
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_send_without_listener_reports_false() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("none.sock");
        assert!(!send_open_session(&path, "code", "file").await.unwrap());
    }

    #[tokio::test]
    async fn test_handoff_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("askcode.sock");
        let listener = HandoffListener::bind(&path).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let sender = {
            let path = path.clone();
            tokio::spawn(async move { send_open_session(&path, "fn main() {}", "main.rs").await })
        };

        let command = listener.accept().await.unwrap();
        assert!(sender.await.unwrap().unwrap());
        assert_eq!(
            command,
            HandoffCommand::OpenSession {
                code: "fn main() {}".to_string(),
                file: "main.rs".to_string(),
            }
        );

        drop(listener);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_second_bind_sees_running_instance() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("askcode.sock");
        let _first = HandoffListener::bind(&path).await.unwrap();

        let err = HandoffListener::bind(&path).await.err().unwrap();
        assert!(matches!(err, IpcError::AlreadyRunning(_)));
    }

    #[tokio::test]
    async fn test_stale_socket_file_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("askcode.sock");
        {
            // bound with std and dropped without cleanup: file stays behind
            let _stale = std::os::unix::net::UnixListener::bind(&path).unwrap();
        }
        assert!(path.exists());

        let listener = HandoffListener::bind(&path).await.unwrap();
        assert_eq!(listener.socket_path(), path.as_path());
    }

    #[tokio::test]
    async fn test_garbage_payload_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("askcode.sock");
        let listener = HandoffListener::bind(&path).await.unwrap();

        let mut client = UnixStream::connect(&path).await.unwrap();
        client.write_all(b"not json").await.unwrap();
        client.shutdown().await.unwrap();

        let err = listener.accept().await.unwrap_err();
        assert!(matches!(err, IpcError::Payload(_)));
    }
}
