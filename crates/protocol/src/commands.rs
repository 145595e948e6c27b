//! The closed set of worker commands and their parameter/result shapes.
//!
//! Every command is a pair of typed shapes; the worker-side registry maps a
//! [`CommandName`] to its handler, and the daemon forwards the raw frame
//! without ever deserializing the parameters.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Names of the commands the worker executes against the browser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandName {
    DomQuery,
    DomGet,
    DomHighlight,
    DomScreenshot,
    WorkerPeek,
    WorkerDetails,
    WorkerStatus,
    CdpCall,
}

impl CommandName {
    pub const ALL: [CommandName; 8] = [
        CommandName::DomQuery,
        CommandName::DomGet,
        CommandName::DomHighlight,
        CommandName::DomScreenshot,
        CommandName::WorkerPeek,
        CommandName::WorkerDetails,
        CommandName::WorkerStatus,
        CommandName::CdpCall,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::DomQuery => "dom_query",
            CommandName::DomGet => "dom_get",
            CommandName::DomHighlight => "dom_highlight",
            CommandName::DomScreenshot => "dom_screenshot",
            CommandName::WorkerPeek => "worker_peek",
            CommandName::WorkerDetails => "worker_details",
            CommandName::WorkerStatus => "worker_status",
            CommandName::CdpCall => "cdp_call",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.as_str() == name)
    }

    /// Wire `type` of the daemon-to-worker request envelope.
    pub fn request_type(self) -> String {
        format!("{}_request", self.as_str())
    }

    /// Wire `type` of the worker-to-daemon response envelope.
    pub fn response_type(self) -> String {
        format!("{}_response", self.as_str())
    }

    /// Maps an inbound `<name>_request` wire type back to the command.
    pub fn from_request_type(wire_type: &str) -> Option<Self> {
        wire_type.strip_suffix("_request").and_then(Self::parse)
    }

    /// Deadline the daemon arms when forwarding this command.
    ///
    /// Peek and status are interactive reads and fail fast; everything else
    /// may involve a browser round trip.
    pub fn forward_timeout(self) -> Duration {
        match self {
            CommandName::WorkerPeek | CommandName::WorkerStatus => Duration::from_secs(5),
            _ => Duration::from_secs(10),
        }
    }
}

impl fmt::Display for CommandName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Telemetry collector kinds a session can activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryKind {
    Network,
    Console,
    Dom,
}

impl TelemetryKind {
    pub const DEFAULT: [TelemetryKind; 3] =
        [TelemetryKind::Network, TelemetryKind::Console, TelemetryKind::Dom];
}

/// One of `nodeId` / `index` / `selector`, resolved uniformly by the worker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRef {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomQueryParams {
    pub selector: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomQueryResult {
    pub selector: String,
    pub count: usize,
    pub nodes: Vec<QueryNode>,
}

/// One match from `dom_query`; `index` is 1-based and doubles as the key in
/// the persisted query cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryNode {
    pub index: usize,
    pub node_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preview: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomHighlightParams {
    #[serde(flatten)]
    pub target: NodeRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nth: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomHighlightResult {
    pub highlighted: usize,
    pub node_ids: Vec<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomGetParams {
    #[serde(flatten)]
    pub target: NodeRef,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nth: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomGetResult {
    pub nodes: Vec<NodeDetail>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDetail {
    pub node_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attributes: Option<BTreeMap<String, String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub classes: Option<Vec<String>>,
    #[serde(rename = "outerHTML", skip_serializing_if = "Option::is_none")]
    pub outer_html: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageFormat::Png => f.write_str("png"),
            ImageFormat::Jpeg => f.write_str("jpeg"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomScreenshotParams {
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<ImageFormat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub full_page: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomScreenshotResult {
    pub path: String,
    pub format: ImageFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u32>,
    pub width: u64,
    pub height: u64,
    pub size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    pub full_page: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Viewport {
    pub width: u64,
    pub height: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerPeekParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_n: Option<usize>,
}

/// Maximum window `worker_peek` will return; larger requests are clamped.
pub const PEEK_MAX: usize = 100;
/// Window used when the client does not name one.
pub const PEEK_DEFAULT: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemType {
    Network,
    Console,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDetailsParams {
    pub item_type: ItemType,
    /// Network: the request id string. Console: a 0-based integer index,
    /// accepted as a number or numeric string.
    pub id: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStatusResult {
    pub start_time: DateTime<Utc>,
    pub duration: u64,
    pub target: TargetSummary,
    pub active_telemetry: Vec<TelemetryKind>,
    pub activity: ActivitySummary,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitySummary {
    pub network_requests_captured: usize,
    pub console_messages_captured: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_network_request_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_console_message_at: Option<DateTime<Utc>>,
}

/// Target URL and title as carried in status, peek, and built output.
/// Always present; fields are empty strings until the target is known.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
    pub url: String,
    pub title: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdpCallParams {
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}
