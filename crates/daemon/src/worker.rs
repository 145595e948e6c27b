//! Worker child supervision: spawn, ready handshake, stdio pumps, exit
//! fanout.
//!
//! The daemon and worker are the same executable; the child is launched as
//! `<exe> worker --config <json>` with piped stdio. Exactly one
//! `worker_ready` frame must arrive on stdout before the command loop is
//! considered live; the first frame of any other shape is a failure.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bdg_core::process::{KillSignal, kill_pid};
use bdg_protocol::{
    JsonlDecoder, TargetSummary, WORKER_READY_TYPE, WorkerReady, encode_frame,
};

use crate::router;
use crate::server::SharedState;

/// The daemon's view of an attached worker.
#[derive(Debug, Clone)]
pub struct WorkerLink {
    pub pid: u32,
    pub chrome_pid: Option<u32>,
    pub port: u16,
    pub target: TargetSummary,
    pub stdin_tx: mpsc::UnboundedSender<Value>,
}

/// Failure modes of a session start, each mapped to a wire error code.
#[derive(Debug, thiserror::Error)]
pub enum StartError {
    #[error("failed to spawn worker process: {0}")]
    Spawn(String),

    #[error("worker exited before reporting ready{0}")]
    CrashedBeforeReady(String),

    #[error("worker produced an unexpected first message: {0}")]
    MalformedReady(String),

    #[error("timed out waiting for the worker ready message")]
    ReadyTimeout,
}

impl StartError {
    pub fn code(&self) -> bdg_protocol::ErrorCode {
        use bdg_protocol::ErrorCode;
        match self {
            StartError::Spawn(_) | StartError::CrashedBeforeReady(_) => ErrorCode::WorkerStartFailed,
            StartError::MalformedReady(_) => ErrorCode::DaemonError,
            StartError::ReadyTimeout => ErrorCode::CdpTimeout,
        }
    }
}

/// Spawns the worker, waits for its ready frame, installs the link into
/// daemon state, and starts the stdio pump and exit-watcher tasks.
pub async fn spawn_worker(
    state: &SharedState,
    worker_config: Value,
    ready_timeout: Duration,
) -> Result<WorkerReady, StartError> {
    let exe = std::env::current_exe().map_err(|err| StartError::Spawn(err.to_string()))?;

    let mut child = tokio::process::Command::new(&exe)
        .arg("worker")
        .arg("--config")
        .arg(worker_config.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .map_err(|err| StartError::Spawn(err.to_string()))?;

    let pid = child.id().ok_or_else(|| StartError::Spawn("child has no pid".into()))?;
    let mut stdin = child.stdin.take().ok_or_else(|| StartError::Spawn("child stdin unavailable".into()))?;
    let mut stdout = child.stdout.take().ok_or_else(|| StartError::Spawn("child stdout unavailable".into()))?;

    let mut decoder = JsonlDecoder::new();
    let ready = match tokio::time::timeout(ready_timeout, read_ready(&mut stdout, &mut decoder, &mut child)).await
    {
        Ok(Ok(ready)) => ready,
        Ok(Err(err)) => {
            kill_pid(pid, KillSignal::Term);
            return Err(err);
        }
        Err(_) => {
            kill_pid(pid, KillSignal::Term);
            return Err(StartError::ReadyTimeout);
        }
    };
    info!(target = "bdg.daemon", pid, port = ready.port, "worker ready");

    // Writer task: the daemon is the only writer on the worker's stdin.
    let (stdin_tx, mut stdin_rx) = mpsc::unbounded_channel::<Value>();
    tokio::spawn(async move {
        while let Some(message) = stdin_rx.recv().await {
            let bytes = match encode_frame(&message) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(target = "bdg.daemon", error = %err, "failed to encode worker request");
                    continue;
                }
            };
            if stdin.write_all(&bytes).await.is_err() || stdin.flush().await.is_err() {
                debug!(target = "bdg.daemon", "worker stdin closed");
                break;
            }
        }
    });

    // Response pump: every stdout frame goes through response correlation.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 16 * 1024];
            loop {
                match stdout.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => {
                        for frame in decoder.feed(&buf[..n]) {
                            router::handle_worker_frame(&state, frame).await;
                        }
                    }
                }
            }
        });
    }

    // Exit watcher: flush every pending request with the uniform error.
    {
        let state = state.clone();
        tokio::spawn(async move {
            let status = child.wait().await;
            warn!(target = "bdg.daemon", pid, ?status, "worker exited");
            router::handle_worker_exit(&state, pid).await;
        });
    }

    let link = WorkerLink {
        pid,
        chrome_pid: ready.chrome_pid,
        port: ready.port,
        target: ready.target.clone(),
        stdin_tx,
    };
    state.lock().await.worker = Some(link);

    Ok(ready)
}

async fn read_ready(
    stdout: &mut tokio::process::ChildStdout,
    decoder: &mut JsonlDecoder,
    child: &mut tokio::process::Child,
) -> Result<WorkerReady, StartError> {
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stdout.read(&mut buf).await.map_err(|err| StartError::Spawn(err.to_string()))?;
        if n == 0 {
            let detail = match child.try_wait() {
                Ok(Some(status)) => format!(" (status: {status})"),
                _ => String::new(),
            };
            return Err(StartError::CrashedBeforeReady(detail));
        }

        if let Some(frame) = decoder.feed(&buf[..n]).into_iter().next() {
            if frame.get("type").and_then(Value::as_str) != Some(WORKER_READY_TYPE) {
                return Err(StartError::MalformedReady(
                    frame.get("type").and_then(Value::as_str).unwrap_or("<untyped>").to_string(),
                ));
            }
            return serde_json::from_value::<WorkerReady>(frame)
                .map_err(|err| StartError::MalformedReady(err.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdg_protocol::ErrorCode;

    #[test]
    fn start_errors_map_to_distinct_codes() {
        assert_eq!(StartError::Spawn("x".into()).code(), ErrorCode::WorkerStartFailed);
        assert_eq!(StartError::CrashedBeforeReady(String::new()).code(), ErrorCode::WorkerStartFailed);
        assert_eq!(StartError::MalformedReady("x".into()).code(), ErrorCode::DaemonError);
        assert_eq!(StartError::ReadyTimeout.code(), ErrorCode::CdpTimeout);
    }
}
