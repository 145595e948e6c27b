//! Frame routing and response transformation.
//!
//! Client frames are routed raw: a recognized command type is forwarded to
//! the worker (envelope rewritten, parameters untouched), local types go to
//! their handlers, anything else is logged and dropped. Worker responses
//! come back through here and are reshaped into the client-facing form
//! recorded on the pending entry.

use serde_json::{Map, Value, json};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use bdg_core::pidfile;
use bdg_protocol::{
    ClientFrame, CommandName, WORKER_EXITED_ERROR, WorkerResponse,
};

use crate::handlers;
use crate::pending::PendingEntry;
use crate::server::SharedState;

/// Which client-facing shape a pending worker request resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseShape {
    /// The client sent the command itself: `<name>_response`.
    Generic,
    /// Daemon-initiated `worker_status` enriching a `status_request`.
    StatusEnriched,
    /// Daemon-initiated `worker_peek` answering a `peek_request`.
    PeekPreview,
}

impl ResponseShape {
    /// Wire `type` of the client response.
    fn response_type(self, command: CommandName) -> String {
        match self {
            ResponseShape::Generic => command.response_type(),
            ResponseShape::StatusEnriched => "status_response".into(),
            ResponseShape::PeekPreview => "peek_response".into(),
        }
    }
}

/// Entry point for every decoded frame from a client socket.
pub async fn handle_client_frame(
    state: &SharedState,
    reply: &mpsc::UnboundedSender<Value>,
    frame: Value,
) {
    let Some(frame) = ClientFrame::parse(frame) else {
        debug!(target = "bdg.daemon", "dropping invalid client frame");
        return;
    };

    if frame.is_response() {
        // One-way contract: clients never send responses.
        debug!(target = "bdg.daemon", wire_type = %frame.wire_type, "dropping client response frame");
        return;
    }

    if let Some(command) = frame.command() {
        let params = frame.params();
        forward_to_worker(state, reply, command, ResponseShape::Generic, &frame.session_id, params, None)
            .await;
        return;
    }

    match frame.wire_type.as_str() {
        "handshake_request" => handlers::handshake(reply, &frame),
        "status_request" => handlers::status(state, reply, &frame).await,
        "peek_request" => handlers::peek(state, reply, &frame).await,
        "start_session_request" => handlers::start_session(state, reply, &frame).await,
        "stop_session_request" => handlers::stop_session(state, reply, &frame).await,
        other => {
            debug!(target = "bdg.daemon", wire_type = other, "dropping unknown request type");
        }
    }
}

/// Registers a pending entry, arms its deadline, and writes the request to
/// the worker's stdin.
pub async fn forward_to_worker(
    state: &SharedState,
    reply: &mpsc::UnboundedSender<Value>,
    command: CommandName,
    shape: ResponseShape,
    session_id: &str,
    params: Map<String, Value>,
    base_data: Option<Value>,
) {
    let mut guard = state.lock().await;

    let Some(worker_stdin) = guard.worker.as_ref().map(|w| w.stdin_tx.clone()) else {
        let _ = reply.send(error_response(shape, command, session_id, "no active worker process"));
        return;
    };

    let request_id = guard.ids.next();
    let timeout = command.forward_timeout();

    let timer = tokio::spawn(deadline_task(state.clone(), request_id.clone(), timeout));
    let entry =
        PendingEntry::new(reply.clone(), session_id.to_string(), command, shape, base_data, timer);
    guard.pending.insert(request_id.clone(), entry);

    let mut message = params;
    message.insert("type".into(), Value::String(command.request_type()));
    message.insert("requestId".into(), Value::String(request_id.clone()));

    if worker_stdin.send(Value::Object(message)).is_err() {
        // Write failure: cancel the deadline, drop the entry, fail now.
        if let Some(entry) = guard.pending.remove(&request_id) {
            let _ = entry.reply.send(error_response(
                entry.shape,
                entry.command,
                &entry.session_id,
                "failed to write to worker process",
            ));
        }
    }
}

async fn deadline_task(state: SharedState, request_id: String, timeout: std::time::Duration) {
    tokio::time::sleep(timeout).await;

    let mut guard = state.lock().await;
    // remove() aborts this very task; safe because everything after is
    // synchronous, so cancellation cannot land before the reply is sent.
    let Some(entry) = guard.pending.remove(&request_id) else {
        return;
    };
    drop(guard);

    debug!(target = "bdg.daemon", request_id = %request_id, command = %entry.command, "worker request timed out");

    let message = match (entry.shape, &entry.base_data) {
        // A status probe that times out degrades to the local data.
        (ResponseShape::StatusEnriched, Some(base)) => json!({
            "type": "status_response",
            "sessionId": entry.session_id,
            "status": "ok",
            "data": base,
        }),
        _ => error_response(
            entry.shape,
            entry.command,
            &entry.session_id,
            &format!("worker did not respond within {} seconds", timeout.as_secs()),
        ),
    };
    let _ = entry.reply.send(message);
}

/// Entry point for every decoded frame from the worker's stdout.
pub async fn handle_worker_frame(state: &SharedState, frame: Value) {
    let response: WorkerResponse = match serde_json::from_value(frame) {
        Ok(response) => response,
        Err(err) => {
            debug!(target = "bdg.daemon", error = %err, "dropping unparseable worker frame");
            return;
        }
    };

    let mut guard = state.lock().await;
    let Some(entry) = guard.pending.remove(&response.request_id) else {
        // Deadline already fired, or the id was never ours.
        debug!(target = "bdg.daemon", request_id = %response.request_id, "worker response with no pending entry");
        return;
    };
    let paths = guard.paths.clone();
    drop(guard);

    let message = transform_response(&entry, response, &paths);
    let _ = entry.reply.send(message);
}

/// Fails every pending request with the uniform worker-exit error and
/// detaches the link.
pub async fn handle_worker_exit(state: &SharedState, pid: u32) {
    let mut guard = state.lock().await;
    if guard.worker.as_ref().is_some_and(|w| w.pid == pid) {
        guard.worker = None;
    }
    let entries = guard.pending.clear();
    drop(guard);

    if !entries.is_empty() {
        warn!(target = "bdg.daemon", count = entries.len(), "failing pending requests after worker exit");
    }
    for entry in entries {
        let _ = entry.reply.send(error_response(
            entry.shape,
            entry.command,
            &entry.session_id,
            WORKER_EXITED_ERROR,
        ));
    }
}

fn transform_response(entry: &PendingEntry, response: WorkerResponse, paths: &bdg_core::SessionPaths) -> Value {
    match entry.shape {
        ResponseShape::Generic => {
            let mut message = json!({
                "type": entry.command.response_type(),
                "sessionId": entry.session_id,
                "status": if response.success { "ok" } else { "error" },
            });
            if let Some(data) = response.data {
                message["data"] = data;
            }
            if let Some(error) = response.error {
                message["error"] = Value::String(error);
            }
            message
        }
        ResponseShape::StatusEnriched => {
            if response.success {
                let mut data = entry.base_data.clone().unwrap_or_else(|| json!({}));
                if let (Some(base), Some(Value::Object(worker))) = (data.as_object_mut(), &response.data) {
                    for (key, value) in worker {
                        base.insert(key.clone(), value.clone());
                    }
                }
                json!({
                    "type": "status_response",
                    "sessionId": entry.session_id,
                    "status": "ok",
                    "data": data,
                })
            } else {
                let error = response.error.unwrap_or_else(|| "worker status failed".into());
                match &entry.base_data {
                    Some(base) => json!({
                        "type": "status_response",
                        "sessionId": entry.session_id,
                        "status": "error",
                        "data": base,
                        "error": error,
                    }),
                    None => json!({
                        "type": "status_response",
                        "sessionId": entry.session_id,
                        "status": "error",
                        "error": error,
                    }),
                }
            }
        }
        ResponseShape::PeekPreview => {
            if response.success {
                let preview = peek_preview(response.data.as_ref().unwrap_or(&Value::Null));
                let mut data = json!({ "preview": preview });
                // Re-read rather than trust stale link state.
                if let Some(pid) = pidfile::read_pid(&paths.worker_pid()) {
                    data["sessionPid"] = json!(pid);
                }
                json!({
                    "type": "peek_response",
                    "sessionId": entry.session_id,
                    "status": "ok",
                    "data": data,
                })
            } else {
                error_response(
                    entry.shape,
                    entry.command,
                    &entry.session_id,
                    &response.error.unwrap_or_else(|| "worker peek failed".into()),
                )
            }
        }
    }
}

/// Reshapes the worker's peek payload into the output-document form the
/// client renders: always-partial, empty collections omitted.
fn peek_preview(data: &Value) -> Value {
    let mut preview = json!({
        "version": data.get("version").cloned().unwrap_or_else(|| json!("1.0")),
        "success": true,
        "startTime": data.get("startTime").cloned().unwrap_or(Value::Null),
        "duration": data.get("duration").cloned().unwrap_or(json!(0)),
        "target": data.get("target").cloned().unwrap_or_else(|| json!({"url": "", "title": ""})),
        "partial": true,
        "data": {},
    });

    for key in ["network", "console"] {
        if let Some(items) = data.get(key).and_then(Value::as_array) {
            if !items.is_empty() {
                preview["data"][key] = json!(items);
            }
        }
    }
    if let Some(kinds) = data.get("activeTelemetry") {
        preview["activeTelemetry"] = kinds.clone();
    }
    preview
}

fn error_response(shape: ResponseShape, command: CommandName, session_id: &str, error: &str) -> Value {
    json!({
        "type": shape.response_type(command),
        "sessionId": session_id,
        "status": "error",
        "error": error,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bdg_core::SessionPaths;
    use tokio::task::JoinHandle;

    fn idle_timer() -> JoinHandle<()> {
        tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
        })
    }

    fn entry(shape: ResponseShape, command: CommandName, base: Option<Value>) -> (PendingEntry, mpsc::UnboundedReceiver<Value>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (PendingEntry::new(tx, "cli-1".into(), command, shape, base, idle_timer()), rx)
    }

    fn paths() -> SessionPaths {
        SessionPaths::with_base(std::env::temp_dir().join("bdg-router-tests-nonexistent"))
    }

    #[tokio::test]
    async fn generic_success_rewrites_envelope() {
        let (entry, _rx) = entry(ResponseShape::Generic, CommandName::DomQuery, None);
        let response = WorkerResponse::ok(CommandName::DomQuery, "r1", json!({"count": 2}));
        let message = transform_response(&entry, response, &paths());
        assert_eq!(message["type"], "dom_query_response");
        assert_eq!(message["sessionId"], "cli-1");
        assert_eq!(message["status"], "ok");
        assert_eq!(message["data"]["count"], 2);
    }

    #[tokio::test]
    async fn generic_failure_carries_error_string() {
        let (entry, _rx) = entry(ResponseShape::Generic, CommandName::CdpCall, None);
        let response = WorkerResponse::err(CommandName::CdpCall, "r1", "boom");
        let message = transform_response(&entry, response, &paths());
        assert_eq!(message["status"], "error");
        assert_eq!(message["error"], "boom");
        assert!(message.get("data").is_none());
    }

    #[tokio::test]
    async fn status_merge_overlays_worker_data_on_base() {
        let base = json!({"daemonPid": 7, "socketPath": "/x"});
        let (entry, _rx) = entry(ResponseShape::StatusEnriched, CommandName::WorkerStatus, Some(base));
        let response = WorkerResponse::ok(
            CommandName::WorkerStatus,
            "r1",
            json!({"duration": 500, "activity": {"networkRequestsCaptured": 3}}),
        );
        let message = transform_response(&entry, response, &paths());
        assert_eq!(message["type"], "status_response");
        assert_eq!(message["data"]["daemonPid"], 7);
        assert_eq!(message["data"]["duration"], 500);
        assert_eq!(message["data"]["activity"]["networkRequestsCaptured"], 3);
    }

    #[tokio::test]
    async fn status_failure_with_base_sends_base_and_error() {
        let base = json!({"daemonPid": 7});
        let (entry, _rx) = entry(ResponseShape::StatusEnriched, CommandName::WorkerStatus, Some(base));
        let response = WorkerResponse::err(CommandName::WorkerStatus, "r1", "store locked");
        let message = transform_response(&entry, response, &paths());
        assert_eq!(message["status"], "error");
        assert_eq!(message["data"]["daemonPid"], 7);
        assert_eq!(message["error"], "store locked");
    }

    #[tokio::test]
    async fn peek_success_builds_partial_preview() {
        let (entry, _rx) = entry(ResponseShape::PeekPreview, CommandName::WorkerPeek, None);
        let response = WorkerResponse::ok(
            CommandName::WorkerPeek,
            "r1",
            json!({
                "version": "1.0",
                "startTime": "2026-03-04T12:00:00Z",
                "duration": 900,
                "target": {"url": "https://example.com", "title": "Example"},
                "activeTelemetry": ["network", "console"],
                "network": [{"id": "n1"}, {"id": "n2"}],
                "console": [],
            }),
        );
        let message = transform_response(&entry, response, &paths());
        assert_eq!(message["type"], "peek_response");
        assert_eq!(message["status"], "ok");
        let preview = &message["data"]["preview"];
        assert_eq!(preview["partial"], true);
        assert_eq!(preview["data"]["network"].as_array().unwrap().len(), 2);
        assert!(preview["data"].get("console").is_none(), "empty console must be omitted");
        assert_eq!(preview["target"]["title"], "Example");
    }

    #[tokio::test]
    async fn peek_failure_is_a_peek_shaped_error() {
        let (entry, _rx) = entry(ResponseShape::PeekPreview, CommandName::WorkerPeek, None);
        let response = WorkerResponse::err(CommandName::WorkerPeek, "r1", "nope");
        let message = transform_response(&entry, response, &paths());
        assert_eq!(message["type"], "peek_response");
        assert_eq!(message["status"], "error");
        assert_eq!(message["error"], "nope");
    }

    #[test]
    fn worker_exit_error_shapes_follow_command_kind() {
        let generic = error_response(ResponseShape::Generic, CommandName::CdpCall, "s", WORKER_EXITED_ERROR);
        assert_eq!(generic["type"], "cdp_call_response");
        let status = error_response(ResponseShape::StatusEnriched, CommandName::WorkerStatus, "s", WORKER_EXITED_ERROR);
        assert_eq!(status["type"], "status_response");
        let peek = error_response(ResponseShape::PeekPreview, CommandName::WorkerPeek, "s", WORKER_EXITED_ERROR);
        assert_eq!(peek["type"], "peek_response");
    }
}
