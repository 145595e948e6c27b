//! End-to-end tests over a real Unix socket, no worker involved.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

use bdg_core::SessionPaths;
use bdg_daemon::{Daemon, DaemonConfig};

async fn start_daemon(dir: &tempfile::TempDir) -> (SessionPaths, tokio::task::JoinHandle<()>) {
    let paths = SessionPaths::with_base(dir.path());
    let daemon = Daemon::start(paths.clone(), DaemonConfig::default()).await.unwrap();
    let handle = tokio::spawn(async move {
        let _ = daemon.run().await;
    });
    (paths, handle)
}

async fn read_line(stream: &mut UnixStream) -> Value {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut byte))
            .await
            .expect("timed out waiting for response")
            .unwrap();
        assert!(n > 0, "socket closed before a full line arrived");
        if byte[0] == b'\n' {
            break;
        }
        line.push(byte[0]);
    }
    serde_json::from_slice(&line).unwrap()
}

#[tokio::test]
async fn handshake_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(paths.daemon_socket()).await.unwrap();
    stream.write_all(b"{\"type\":\"handshake_request\",\"sessionId\":\"a\"}\n").await.unwrap();

    let response = read_line(&mut stream).await;
    assert_eq!(response["type"], "handshake_response");
    assert_eq!(response["sessionId"], "a");
    assert_eq!(response["status"], "ok");
    assert!(response["message"].is_string());
}

#[tokio::test]
async fn status_without_session_reports_daemon_only() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(paths.daemon_socket()).await.unwrap();
    stream.write_all(b"{\"type\":\"status_request\",\"sessionId\":\"b\"}\n").await.unwrap();

    let response = read_line(&mut stream).await;
    assert_eq!(response["type"], "status_response");
    assert_eq!(response["status"], "ok");
    assert_eq!(response["data"]["daemonPid"], std::process::id());
    assert!(response["data"].get("sessionPid").is_none());
}

#[tokio::test]
async fn concurrent_clients_receive_only_their_responses() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut tasks = Vec::new();
    for client in 1..=2 {
        let socket = paths.daemon_socket();
        tasks.push(tokio::spawn(async move {
            let mut stream = UnixStream::connect(socket).await.unwrap();
            let mut received = Vec::new();
            for i in 1..=3 {
                let request = json!({
                    "type": "handshake_request",
                    "sessionId": format!("c{client}-{i}"),
                });
                let mut bytes = serde_json::to_vec(&request).unwrap();
                bytes.push(b'\n');
                stream.write_all(&bytes).await.unwrap();
                received.push(read_line(&mut stream).await);
            }
            (client, received)
        }));
    }

    for task in tasks {
        let (client, received) = task.await.unwrap();
        assert_eq!(received.len(), 3);
        for (i, response) in received.iter().enumerate() {
            assert_eq!(response["sessionId"], format!("c{client}-{}", i + 1), "responses crossed clients");
            assert_eq!(response["status"], "ok");
        }
    }
}

#[tokio::test]
async fn frame_bisected_mid_utf8_decodes_once() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(paths.daemon_socket()).await.unwrap();
    let request = json!({"type": "handshake_request", "sessionId": "frag-☃"});
    let mut bytes = serde_json::to_vec(&request).unwrap();
    bytes.push(b'\n');

    // Bisect inside the snowman's three-byte sequence.
    let split = bytes.windows(3).position(|w| w == "☃".as_bytes()).unwrap() + 1;
    stream.write_all(&bytes[..split]).await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    stream.write_all(&bytes[split..]).await.unwrap();

    let response = read_line(&mut stream).await;
    assert_eq!(response["type"], "handshake_response");
    assert_eq!(response["sessionId"], "frag-☃");
    assert_eq!(response["status"], "ok");
}

#[tokio::test]
async fn command_without_worker_fails_with_command_shape() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(paths.daemon_socket()).await.unwrap();
    stream
        .write_all(b"{\"type\":\"cdp_call_request\",\"sessionId\":\"x\",\"method\":\"Page.enable\"}\n")
        .await
        .unwrap();

    let response = read_line(&mut stream).await;
    assert_eq!(response["type"], "cdp_call_response");
    assert_eq!(response["status"], "error");
    assert!(response["error"].as_str().unwrap().contains("no active worker"));
}

#[tokio::test]
async fn malformed_line_is_skipped_and_next_request_served() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(paths.daemon_socket()).await.unwrap();
    stream
        .write_all(b"{oops not json\n\n   \n{\"type\":\"handshake_request\",\"sessionId\":\"ok\"}\n")
        .await
        .unwrap();

    let response = read_line(&mut stream).await;
    assert_eq!(response["sessionId"], "ok");
    assert_eq!(response["status"], "ok");
}

#[tokio::test]
async fn second_daemon_refuses_to_start() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let err = Daemon::start(paths.clone(), DaemonConfig::default()).await.unwrap_err();
    assert!(err.to_string().contains("already running"));
}

#[tokio::test]
async fn stop_without_session_is_no_session_error() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(paths.daemon_socket()).await.unwrap();
    stream.write_all(b"{\"type\":\"stop_session_request\",\"sessionId\":\"s\"}\n").await.unwrap();

    let response = read_line(&mut stream).await;
    assert_eq!(response["status"], "error");
    assert_eq!(response["code"], "NO_SESSION");
}

#[tokio::test]
async fn client_sent_response_frames_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let (paths, _daemon) = start_daemon(&dir).await;

    let mut stream = UnixStream::connect(paths.daemon_socket()).await.unwrap();
    stream
        .write_all(
            b"{\"type\":\"dom_query_response\",\"sessionId\":\"x\"}\n{\"type\":\"handshake_request\",\"sessionId\":\"after\"}\n",
        )
        .await
        .unwrap();

    // Only the handshake is answered; the response frame vanished.
    let response = read_line(&mut stream).await;
    assert_eq!(response["type"], "handshake_response");
    assert_eq!(response["sessionId"], "after");
}
