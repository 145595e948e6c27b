//! Telemetry record shapes and the session output document.
//!
//! These types cross the wire in `worker_peek`/`worker_details` responses
//! and land on disk in `session-output.json`, so they live in the protocol
//! crate even though the store that accumulates them is worker-private.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::{TargetSummary, TelemetryKind};

/// Schema version stamped on every built output document.
pub const OUTPUT_VERSION: &str = "1.0";

/// One captured network request. Appended on request-will-be-sent and
/// mutated in place as response/loading events arrive; never removed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequestRecord {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_headers: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    pub navigation_id: u64,
}

/// The trimmed view of a network request exposed by `worker_peek`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRequestSummary {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub method: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime: Option<String>,
}

impl From<&NetworkRequestRecord> for NetworkRequestSummary {
    fn from(record: &NetworkRequestRecord) -> Self {
        Self {
            id: record.id.clone(),
            timestamp: record.timestamp,
            method: record.method.clone(),
            url: record.url.clone(),
            status: record.status,
            mime: record.mime.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleMessageRecord {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub args: Vec<Value>,
    pub navigation_id: u64,
}

/// A main-frame navigation. Id 0 is seeded at worker start with an empty
/// URL; the id advances once per subsequent navigation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationEvent {
    pub id: u64,
    pub url: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomSnapshot {
    pub url: String,
    pub title: String,
    #[serde(rename = "outerHTML")]
    pub outer_html: String,
}

/// A browser debugging target as listed by the remote endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_socket_debugger_url: Option<String>,
}

impl TargetInfo {
    pub fn summary(&self) -> TargetSummary {
        TargetSummary { url: self.url.clone(), title: self.title.clone() }
    }
}

/// The structured telemetry document built by the worker: written to
/// `session-output.json` on shutdown and reshaped by the daemon for peek
/// previews. Empty collections are omitted from `data`; `target` and
/// `version` are always present.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BdgOutput {
    pub version: String,
    pub success: bool,
    pub start_time: DateTime<Utc>,
    pub duration: u64,
    pub target: TargetSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    pub data: OutputData,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputData {
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub network: Vec<NetworkRequestRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub console: Vec<ConsoleMessageRecord>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub navigations: Vec<NavigationEvent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dom: Option<DomSnapshot>,
}

/// Worker-side payload of a `worker_peek` response; the daemon reshapes this
/// into the client-facing preview.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeekData {
    pub version: String,
    pub start_time: DateTime<Utc>,
    pub duration: u64,
    pub target: TargetSummary,
    pub active_telemetry: Vec<TelemetryKind>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub network: Vec<NetworkRequestSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub console: Vec<ConsoleMessageRecord>,
}
