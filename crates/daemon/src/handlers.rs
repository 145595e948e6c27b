//! Daemon-terminated request handlers: handshake, status, peek, session
//! start and stop.

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use bdg_core::process::{KillSignal, kill_pid, pid_is_alive};
use bdg_core::session::live_worker_pid;
use bdg_core::{SessionMetadata, pidfile};
use bdg_protocol::{ClientFrame, CommandName, ErrorCode};

use crate::router::{ResponseShape, forward_to_worker};
use crate::server::SharedState;
use crate::worker::spawn_worker;

const DAEMON_GREETING: &str = concat!("bdg daemon ", env!("CARGO_PKG_VERSION"));

pub fn handshake(reply: &mpsc::UnboundedSender<Value>, frame: &ClientFrame) {
    let _ = reply.send(json!({
        "type": "handshake_response",
        "sessionId": frame.session_id,
        "status": "ok",
        "message": DAEMON_GREETING,
    }));
}

/// Local daemon data, enriched with live worker activity when a worker is
/// attached. A worker timeout degrades to the local data (see the deadline
/// path in the router).
pub async fn status(state: &SharedState, reply: &mpsc::UnboundedSender<Value>, frame: &ClientFrame) {
    let guard = state.lock().await;
    let mut base = json!({
        "daemonPid": std::process::id(),
        "startTime": guard.started_at,
        "socketPath": guard.paths.daemon_socket().display().to_string(),
    });

    if let Some(pid) = live_worker_pid(&guard.paths) {
        base["sessionPid"] = json!(pid);
        if let Some(metadata) = SessionMetadata::load(&guard.paths) {
            base["session"] = redacted_metadata(&metadata);
        }
    }

    let attached = guard.worker.is_some();
    drop(guard);

    if attached {
        forward_to_worker(
            state,
            reply,
            CommandName::WorkerStatus,
            ResponseShape::StatusEnriched,
            &frame.session_id,
            Map::new(),
            Some(base),
        )
        .await;
    } else {
        let _ = reply.send(json!({
            "type": "status_response",
            "sessionId": frame.session_id,
            "status": "ok",
            "data": base,
        }));
    }
}

/// The WebSocket URL can embed tokens; it never leaves the daemon.
fn redacted_metadata(metadata: &SessionMetadata) -> Value {
    let mut value = serde_json::to_value(metadata).unwrap_or_else(|_| json!({}));
    if let Some(object) = value.as_object_mut() {
        object.remove("browserWsUrl");
    }
    value
}

pub async fn peek(state: &SharedState, reply: &mpsc::UnboundedSender<Value>, frame: &ClientFrame) {
    let attached = state.lock().await.worker.is_some();
    if !attached {
        let _ = reply.send(json!({
            "type": "peek_response",
            "sessionId": frame.session_id,
            "status": "error",
            "error": "no active worker process",
        }));
        return;
    }

    let mut params = Map::new();
    let last_n = frame.body.get("lastN").cloned().unwrap_or(json!(10));
    params.insert("lastN".into(), last_n);

    forward_to_worker(
        state,
        reply,
        CommandName::WorkerPeek,
        ResponseShape::PeekPreview,
        &frame.session_id,
        params,
        None,
    )
    .await;
}

pub async fn start_session(state: &SharedState, reply: &mpsc::UnboundedSender<Value>, frame: &ClientFrame) {
    let (paths, ready_timeout, attached) = {
        let guard = state.lock().await;
        (guard.paths.clone(), guard.config.ready_timeout, guard.worker.is_some())
    };

    // Exclusive ownership: one live session per daemon.
    let existing_pid = live_worker_pid(&paths).or_else(|| {
        if attached { Some(0) } else { None }
    });
    if let Some(pid) = existing_pid {
        let metadata = SessionMetadata::load(&paths);
        let mut data = json!({});
        if let Some(meta) = &metadata {
            data = json!({
                "workerPid": meta.worker_pid,
                "url": meta.url,
                "startTime": meta.start_time,
                "duration": meta.duration_ms(chrono::Utc::now()),
            });
        } else if pid != 0 {
            data = json!({ "workerPid": pid });
        }
        let _ = reply.send(json!({
            "type": "start_session_response",
            "sessionId": frame.session_id,
            "status": "error",
            "code": ErrorCode::SessionAlreadyRunning,
            "error": "a session is already running; stop it first",
            "data": data,
        }));
        return;
    }

    let config = frame.params();

    let url_ok = config.get("url").and_then(Value::as_str).is_some_and(|u| !u.trim().is_empty());
    if !url_ok {
        let _ = reply.send(json!({
            "type": "start_session_response",
            "sessionId": frame.session_id,
            "status": "error",
            "code": ErrorCode::DaemonError,
            "error": "url is required to start a session",
        }));
        return;
    }

    match spawn_worker(state, Value::Object(config), ready_timeout).await {
        Ok(ready) => {
            info!(target = "bdg.daemon", worker_pid = ready.worker_pid, "session started");
            let _ = reply.send(json!({
                "type": "start_session_response",
                "sessionId": frame.session_id,
                "status": "ok",
                "data": {
                    "workerPid": ready.worker_pid,
                    "chromePid": ready.chrome_pid,
                    "port": ready.port,
                    "target": ready.target,
                },
            }));
        }
        Err(err) => {
            warn!(target = "bdg.daemon", error = %err, "session start failed");
            let _ = reply.send(json!({
                "type": "start_session_response",
                "sessionId": frame.session_id,
                "status": "error",
                "code": err.code(),
                "error": err.to_string(),
            }));
        }
    }
}

pub async fn stop_session(state: &SharedState, reply: &mpsc::UnboundedSender<Value>, frame: &ClientFrame) {
    let mut guard = state.lock().await;
    let paths = guard.paths.clone();

    let worker_pid = live_worker_pid(&paths).or_else(|| guard.worker.as_ref().map(|w| w.pid));
    let Some(worker_pid) = worker_pid else {
        let _ = reply.send(json!({
            "type": "stop_session_response",
            "sessionId": frame.session_id,
            "status": "error",
            "code": ErrorCode::NoSession,
            "error": "no active session",
        }));
        return;
    };

    // Remember the browser pid before anything is torn down; the CLI may
    // need it for emergency cleanup if the worker dies mid-shutdown.
    let chrome_pid = SessionMetadata::load(&paths)
        .and_then(|m| m.chrome_pid)
        .or_else(|| pidfile::read_pid(&paths.chrome_pid()))
        .or_else(|| guard.worker.as_ref().and_then(|w| w.chrome_pid));

    let delivered = kill_pid(worker_pid, KillSignal::Term);
    if !delivered && pid_is_alive(worker_pid) {
        let _ = reply.send(json!({
            "type": "stop_session_response",
            "sessionId": frame.session_id,
            "status": "error",
            "code": ErrorCode::SessionKillFailed,
            "error": format!("failed to signal worker process {worker_pid}"),
        }));
        return;
    }

    // The worker removes these itself on SIGTERM; doing it here too covers
    // a worker that dies before its cleanup runs.
    pidfile::remove_quiet(&paths.worker_pid());
    SessionMetadata::clear(&paths);

    guard.worker = None;
    drop(guard);
    info!(target = "bdg.daemon", worker_pid, "session stopped");

    let mut data = json!({});
    if let Some(pid) = chrome_pid {
        data["chromePid"] = json!(pid);
    }
    let _ = reply.send(json!({
        "type": "stop_session_response",
        "sessionId": frame.session_id,
        "status": "ok",
        "data": data,
    }));
}
