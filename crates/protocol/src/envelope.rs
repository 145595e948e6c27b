//! Message envelopes for both IPC hops.
//!
//! Client frames are routed on their raw JSON form (the daemon never
//! interprets command parameters), so the client side of the protocol is a
//! thin extraction layer over `serde_json::Value`. The daemon/worker hop is
//! fully typed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::commands::{CommandName, TargetSummary};

/// Error codes carried on start/stop responses. Command failures use
/// free-form `error` strings instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    SessionAlreadyRunning,
    WorkerStartFailed,
    CdpTimeout,
    NoSession,
    SessionKillFailed,
    DaemonError,
}

/// Routing fields extracted from a decoded client frame.
///
/// A frame must be an object with a string `type` and a `sessionId`;
/// anything else is dropped by the daemon.
#[derive(Debug, Clone)]
pub struct ClientFrame {
    pub wire_type: String,
    pub session_id: String,
    pub body: Map<String, Value>,
}

impl ClientFrame {
    pub fn parse(value: Value) -> Option<Self> {
        let Value::Object(body) = value else {
            return None;
        };
        let wire_type = body.get("type")?.as_str()?.to_string();
        let session_id = body.get("sessionId")?.as_str()?.to_string();
        Some(Self { wire_type, session_id, body })
    }

    /// The command this frame forwards to the worker, if it is one.
    pub fn command(&self) -> Option<CommandName> {
        CommandName::from_request_type(&self.wire_type)
    }

    /// Clients must never send `*_response` frames; the contract is one-way.
    pub fn is_response(&self) -> bool {
        self.wire_type.ends_with("_response")
    }

    /// The frame's parameters: everything except the envelope fields.
    pub fn params(&self) -> Map<String, Value> {
        let mut params = self.body.clone();
        params.remove("type");
        params.remove("sessionId");
        params
    }
}

/// Worker-to-daemon response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    #[serde(rename = "type")]
    pub wire_type: String,
    pub request_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WorkerResponse {
    pub fn ok(command: CommandName, request_id: impl Into<String>, data: Value) -> Self {
        Self {
            wire_type: command.response_type(),
            request_id: request_id.into(),
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(command: CommandName, request_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            wire_type: command.response_type(),
            request_id: request_id.into(),
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// The single readiness frame the worker prints on stdout before entering
/// its command loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReady {
    #[serde(rename = "type")]
    pub wire_type: String,
    pub request_id: String,
    pub worker_pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_pid: Option<u32>,
    pub port: u16,
    pub target: TargetSummary,
}

pub const WORKER_READY_TYPE: &str = "worker_ready";
pub const WORKER_READY_REQUEST_ID: &str = "ready";

impl WorkerReady {
    pub fn new(worker_pid: u32, chrome_pid: Option<u32>, port: u16, target: TargetSummary) -> Self {
        Self {
            wire_type: WORKER_READY_TYPE.into(),
            request_id: WORKER_READY_REQUEST_ID.into(),
            worker_pid,
            chrome_pid,
            port,
            target,
        }
    }
}

/// Uniform error message sent to every client whose request was in flight
/// when the worker died.
pub const WORKER_EXITED_ERROR: &str = "worker process exited before responding";
