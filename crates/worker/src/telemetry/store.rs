//! The in-worker telemetry accumulator.
//!
//! One store per session, private to the worker. Collectors append records
//! as CDP events arrive; command handlers answer peek/detail/status queries
//! from it; cleanup builds the final output document. Everything is
//! serialized by the scheduler, so a plain mutex is enough.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use bdg_protocol::{
    ActivitySummary, BdgOutput, ConsoleMessageRecord, DomSnapshot, NavigationEvent,
    NetworkRequestRecord, NetworkRequestSummary, OUTPUT_VERSION, OutputData, PeekData,
    TargetInfo, TargetSummary, TelemetryKind,
};

pub type SharedStore = Arc<Mutex<TelemetryStore>>;

pub fn shared_store() -> SharedStore {
    Arc::new(Mutex::new(TelemetryStore::new()))
}

#[derive(Debug)]
pub struct TelemetryStore {
    network: Vec<NetworkRequestRecord>,
    console: Vec<ConsoleMessageRecord>,
    navigations: Vec<NavigationEvent>,
    dom: Option<DomSnapshot>,
    target: Option<TargetInfo>,
    active: Vec<TelemetryKind>,
    start_time: DateTime<Utc>,
}

impl TelemetryStore {
    pub fn new() -> Self {
        let mut store = Self {
            network: Vec::new(),
            console: Vec::new(),
            navigations: Vec::new(),
            dom: None,
            target: None,
            active: Vec::new(),
            start_time: Utc::now(),
        };
        store.reset();
        store
    }

    /// Clears every buffer and seeds navigation id 0 with an empty URL.
    pub fn reset(&mut self) {
        self.network.clear();
        self.console.clear();
        self.navigations.clear();
        self.navigations.push(NavigationEvent { id: 0, url: String::new(), timestamp: Utc::now() });
        self.dom = None;
        self.target = None;
        self.active.clear();
        self.start_time = Utc::now();
    }

    pub fn reset_session_start(&mut self) {
        self.start_time = Utc::now();
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.start_time
    }

    pub fn duration_ms(&self) -> u64 {
        (Utc::now() - self.start_time).num_milliseconds().max(0) as u64
    }

    pub fn set_target_info(&mut self, target: TargetInfo) {
        self.target = Some(target);
    }

    pub fn target_info(&self) -> Option<&TargetInfo> {
        self.target.as_ref()
    }

    /// Refreshes URL/title after the initial navigation settles.
    pub fn refresh_target(&mut self, url: String, title: String) {
        if let Some(target) = self.target.as_mut() {
            target.url = url;
            target.title = title;
        }
    }

    pub fn set_dom_snapshot(&mut self, snapshot: DomSnapshot) {
        self.dom = Some(snapshot);
    }

    pub fn activate(&mut self, kind: TelemetryKind) {
        if !self.active.contains(&kind) {
            self.active.push(kind);
        }
    }

    pub fn active_telemetry(&self) -> Vec<TelemetryKind> {
        self.active.clone()
    }

    /// The id records are stamped with at the moment they are observed.
    pub fn current_navigation_id(&self) -> u64 {
        self.navigations.last().map(|n| n.id).unwrap_or(0)
    }

    /// Advances the navigation sequence; returns the new id.
    pub fn record_navigation(&mut self, url: String) -> u64 {
        let id = self.current_navigation_id() + 1;
        self.navigations.push(NavigationEvent { id, url, timestamp: Utc::now() });
        id
    }

    pub fn network_started(
        &mut self,
        id: String,
        method: String,
        url: String,
        request_headers: Option<BTreeMap<String, String>>,
    ) {
        let navigation_id = self.current_navigation_id();
        self.network.push(NetworkRequestRecord {
            id,
            timestamp: Utc::now(),
            method,
            url,
            status: None,
            mime: None,
            request_headers,
            response_headers: None,
            body: None,
            failure: None,
            navigation_id,
        });
    }

    pub fn network_response(
        &mut self,
        id: &str,
        status: u32,
        mime: Option<String>,
        response_headers: Option<BTreeMap<String, String>>,
    ) {
        if let Some(record) = self.network.iter_mut().rev().find(|r| r.id == id) {
            record.status = Some(status);
            record.mime = mime;
            record.response_headers = response_headers;
        }
    }

    pub fn network_body(&mut self, id: &str, body: String) {
        if let Some(record) = self.network.iter_mut().rev().find(|r| r.id == id) {
            record.body = Some(body);
        }
    }

    pub fn network_failed(&mut self, id: &str, error_text: String) {
        if let Some(record) = self.network.iter_mut().rev().find(|r| r.id == id) {
            record.failure = Some(error_text);
        }
    }

    pub fn console_message(&mut self, level: String, text: String, args: Vec<serde_json::Value>) {
        let navigation_id = self.current_navigation_id();
        self.console.push(ConsoleMessageRecord {
            timestamp: Utc::now(),
            level,
            text,
            args,
            navigation_id,
        });
    }

    pub fn network_len(&self) -> usize {
        self.network.len()
    }

    pub fn console_len(&self) -> usize {
        self.console.len()
    }

    /// Full record lookup by request id, for `worker_details`. Historical:
    /// navigation staleness is deliberately not consulted.
    pub fn network_detail(&self, id: &str) -> Option<&NetworkRequestRecord> {
        self.network.iter().find(|r| r.id == id)
    }

    /// Full record lookup by 0-based console index, for `worker_details`.
    pub fn console_detail(&self, index: usize) -> Option<&ConsoleMessageRecord> {
        self.console.get(index)
    }

    fn target_summary(&self) -> TargetSummary {
        self.target.as_ref().map(|t| t.summary()).unwrap_or_default()
    }

    /// The last `n` of each stream, insertion order preserved.
    pub fn peek(&self, n: usize) -> PeekData {
        let network = self
            .network
            .iter()
            .skip(self.network.len().saturating_sub(n))
            .map(NetworkRequestSummary::from)
            .collect();
        let console = self
            .console
            .iter()
            .skip(self.console.len().saturating_sub(n))
            .cloned()
            .collect();

        PeekData {
            version: OUTPUT_VERSION.into(),
            start_time: self.start_time,
            duration: self.duration_ms(),
            target: self.target_summary(),
            active_telemetry: self.active_telemetry(),
            network,
            console,
        }
    }

    pub fn activity(&self) -> ActivitySummary {
        ActivitySummary {
            network_requests_captured: self.network.len(),
            console_messages_captured: self.console.len(),
            last_network_request_at: self.network.last().map(|r| r.timestamp),
            last_console_message_at: self.console.last().map(|r| r.timestamp),
        }
    }

    /// Builds the structured output document. Arrays keep append order;
    /// empty collections are omitted by the serializer.
    pub fn build_output(&self, partial: bool) -> BdgOutput {
        BdgOutput {
            version: OUTPUT_VERSION.into(),
            success: true,
            start_time: self.start_time,
            duration: self.duration_ms(),
            target: self.target_summary(),
            partial: partial.then_some(true),
            data: OutputData {
                network: self.network.clone(),
                console: self.console.clone(),
                navigations: self.navigations.clone(),
                dom: self.dom.clone(),
            },
        }
    }
}

impl Default for TelemetryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_network(store: &mut TelemetryStore, id: &str, url: &str) {
        store.network_started(id.into(), "GET".into(), url.into(), None);
    }

    #[test]
    fn reset_seeds_navigation_zero() {
        let store = TelemetryStore::new();
        assert_eq!(store.current_navigation_id(), 0);
        let output = store.build_output(false);
        assert_eq!(output.data.navigations.len(), 1);
        assert_eq!(output.data.navigations[0].url, "");
    }

    #[test]
    fn navigation_ids_are_strictly_monotone() {
        let mut store = TelemetryStore::new();
        assert_eq!(store.record_navigation("https://a".into()), 1);
        assert_eq!(store.record_navigation("https://b".into()), 2);
        assert_eq!(store.current_navigation_id(), 2);
    }

    #[test]
    fn records_are_stamped_with_current_navigation() {
        let mut store = TelemetryStore::new();
        push_network(&mut store, "r1", "https://a/1");
        store.record_navigation("https://b".into());
        push_network(&mut store, "r2", "https://b/1");
        store.console_message("log".into(), "hi".into(), vec![]);

        let output = store.build_output(false);
        assert_eq!(output.data.network[0].navigation_id, 0);
        assert_eq!(output.data.network[1].navigation_id, 1);
        assert_eq!(output.data.console[0].navigation_id, 1);
    }

    #[test]
    fn output_preserves_append_order() {
        let mut store = TelemetryStore::new();
        for i in 0..5 {
            push_network(&mut store, &format!("r{i}"), "https://x");
        }
        let output = store.build_output(false);
        let ids: Vec<_> = output.data.network.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r0", "r1", "r2", "r3", "r4"]);
    }

    #[test]
    fn response_and_body_mutate_existing_record() {
        let mut store = TelemetryStore::new();
        push_network(&mut store, "r1", "https://x/app.js");
        store.network_response("r1", 200, Some("text/javascript".into()), None);
        store.network_body("r1", "var x;".into());
        store.network_failed("r-unknown", "net::ERR".into());

        let record = store.network_detail("r1").unwrap();
        assert_eq!(record.status, Some(200));
        assert_eq!(record.body.as_deref(), Some("var x;"));
        assert!(record.failure.is_none());
        assert_eq!(store.network_len(), 1);
    }

    #[test]
    fn peek_returns_last_n_in_order() {
        let mut store = TelemetryStore::new();
        for i in 0..20 {
            push_network(&mut store, &format!("r{i}"), "https://x");
        }
        let peek = store.peek(3);
        let ids: Vec<_> = peek.network.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["r17", "r18", "r19"]);
        assert!(peek.console.is_empty());
    }

    #[test]
    fn partial_marker_tracks_argument() {
        let store = TelemetryStore::new();
        assert_eq!(store.build_output(true).partial, Some(true));
        assert_eq!(store.build_output(false).partial, None);
    }

    #[test]
    fn empty_arrays_are_omitted_from_serialized_data() {
        let mut store = TelemetryStore::new();
        store.console_message("warn".into(), "only console".into(), vec![]);
        let value = serde_json::to_value(store.build_output(false)).unwrap();
        assert!(value["data"].get("network").is_none());
        assert_eq!(value["data"]["console"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn activity_reports_counts_and_latest_timestamps() {
        let mut store = TelemetryStore::new();
        assert_eq!(store.activity().network_requests_captured, 0);
        assert!(store.activity().last_console_message_at.is_none());

        push_network(&mut store, "r1", "https://x");
        store.console_message("error".into(), "boom".into(), vec![]);
        let activity = store.activity();
        assert_eq!(activity.network_requests_captured, 1);
        assert_eq!(activity.console_messages_captured, 1);
        assert!(activity.last_network_request_at.is_some());
    }

    #[test]
    fn activate_is_idempotent_and_ordered() {
        let mut store = TelemetryStore::new();
        store.activate(TelemetryKind::Console);
        store.activate(TelemetryKind::Network);
        store.activate(TelemetryKind::Console);
        assert_eq!(store.active_telemetry(), vec![TelemetryKind::Console, TelemetryKind::Network]);
    }
}
