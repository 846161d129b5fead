//! OllamaBackend against a minimal local HTTP server

use std::sync::Arc;
use std::time::Duration;

use askcode_core::{AskConfig, Message, OllamaBackend, RelayRequest, StreamFragment, StreamRelay};
use askcode_core::backend::RelayPayload;
use pretty_assertions::assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Read one HTTP request (headers plus Content-Length body)
async fn read_request(socket: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let headers = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length: usize = headers
                .lines()
                .find_map(|l| l.strip_prefix("content-length:"))
                .map_or(0, |v| v.trim().parse().unwrap());
            if buf.len() >= end + 4 + length {
                return;
            }
        }
    }
}

/// Serve one chunked NDJSON reply, one token every `gap`
async fn spawn_slow_server(tokens: usize, gap: Duration) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        socket
            .write_all(
                b"HTTP/1.1 200 OK\r\nContent-Type: application/x-ndjson\r\nTransfer-Encoding: chunked\r\n\r\n",
            )
            .await
            .unwrap();
        for i in 0..tokens {
            let line = format!("{{\"response\":\"t{i} \"}}\n");
            let chunk = format!("{:x}\r\n{line}\r\n", line.len());
            socket.write_all(chunk.as_bytes()).await.unwrap();
            tokio::time::sleep(gap).await;
        }
        socket.write_all(b"0\r\n\r\n").await.unwrap();
        socket.shutdown().await.unwrap();
    });

    format!("http://{addr}")
}

async fn relay_all(backend: OllamaBackend) -> Vec<StreamFragment> {
    let config = Arc::new(AskConfig {
        default_model: Some("m".to_string()),
        ..Default::default()
    });
    let relay = StreamRelay::new(Arc::new(backend), config);
    let (tx, mut rx) = mpsc::channel(64);
    let request = RelayRequest {
        payload: RelayPayload::Messages(vec![Message::user("hi")]),
        model: None,
    };
    relay.run(request, tx, CancellationToken::new()).await;

    let mut fragments = Vec::new();
    while let Some(fragment) = rx.recv().await {
        fragments.push(fragment);
    }
    fragments
}

#[tokio::test]
async fn test_reply_may_stream_longer_than_timeout() {
    // 8 tokens 100 ms apart: the whole reply takes ~800 ms, each gap is well under 500 ms
    let url = spawn_slow_server(8, Duration::from_millis(100)).await;
    let backend = OllamaBackend::new(url, Duration::from_millis(500)).unwrap();

    let fragments = relay_all(backend).await;

    let mut expected: Vec<StreamFragment> = (0..8)
        .map(|i| StreamFragment::Text(format!("t{i} ")))
        .collect();
    expected.push(StreamFragment::End);
    assert_eq!(fragments, expected);
}

#[tokio::test]
async fn test_silent_server_reports_timeout() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        read_request(&mut socket).await;
        // never answer
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let backend = OllamaBackend::new(format!("http://{addr}"), Duration::from_millis(200)).unwrap();
    let fragments = relay_all(backend).await;

    assert_eq!(fragments.len(), 2);
    match &fragments[0] {
        StreamFragment::Error(message) => {
            assert!(message.starts_with("Request timed out"), "{message}");
        }
        other => panic!("expected an error fragment, got {other:?}"),
    }
    assert_eq!(fragments[1], StreamFragment::End);
}

#[tokio::test]
async fn test_connection_error_names_the_cause() {
    // bind then drop to get a port nobody listens on
    let addr = TcpListener::bind("127.0.0.1:0").await.unwrap().local_addr().unwrap();
    let backend = OllamaBackend::new(format!("http://{addr}"), Duration::from_secs(2)).unwrap();

    let err = backend.list_models().await.unwrap_err();
    let message = err.to_string().to_lowercase();
    assert!(message.contains("refused"), "{message}");
}
