//! One-shot daemon client: connect, write one request line, read one
//! response line.

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use bdg_core::SessionPaths;

use crate::error::{CliError, Result};

/// Session id echoed back by the daemon on every response.
pub fn session_id() -> String {
    format!("cli-{}", std::process::id())
}

/// Sends `request` to the daemon; `Ok(None)` means the daemon is not
/// reachable (socket missing or refusing).
pub async fn try_request(paths: &SessionPaths, request: &Value) -> Result<Option<Value>> {
    let stream = match UnixStream::connect(paths.daemon_socket()).await {
        Ok(stream) => stream,
        Err(err) if is_not_running(&err) => return Ok(None),
        Err(err) => return Err(CliError::Io(err)),
    };
    let response = send_on_stream(stream, request).await?;
    Ok(Some(response))
}

/// Like [`try_request`] but an unreachable daemon is an error.
pub async fn request(paths: &SessionPaths, request: &Value) -> Result<Value> {
    try_request(paths, request).await?.ok_or(CliError::DaemonNotRunning)
}

fn is_not_running(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotFound | std::io::ErrorKind::ConnectionRefused
    )
}

async fn send_on_stream(mut stream: UnixStream, request: &Value) -> Result<Value> {
    let mut payload = serde_json::to_vec(request)?;
    payload.push(b'\n');
    stream.write_all(&payload).await?;
    stream.flush().await?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    reader.read_line(&mut line).await?;
    if line.trim().is_empty() {
        return Err(CliError::DaemonError("daemon closed the connection without responding".into()));
    }
    Ok(serde_json::from_str(&line)?)
}
