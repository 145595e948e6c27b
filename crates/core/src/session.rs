//! Session metadata and query-cache documents.
//!
//! `session.json` exists iff the worker PID file points at a live process;
//! the worker writes it late in startup and removes it in cleanup. The
//! query cache persists the positional node-id mapping of the most recent
//! `dom_query` so later commands can refer to matches by 1-based index.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bdg_protocol::TelemetryKind;

use crate::error::Result;
use crate::paths::SessionPaths;
use crate::pidfile;

/// On-disk record of the one active session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMetadata {
    pub daemon_pid: Option<u32>,
    pub worker_pid: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_pid: Option<u32>,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_ws_url: Option<String>,
    pub url: String,
    pub start_time: DateTime<Utc>,
    pub active_telemetry: Vec<TelemetryKind>,
}

impl SessionMetadata {
    pub fn load(paths: &SessionPaths) -> Option<Self> {
        pidfile::read_json(&paths.session_metadata())
    }

    pub fn save(&self, paths: &SessionPaths) -> Result<()> {
        pidfile::write_json(&paths.session_metadata(), self)
    }

    pub fn clear(paths: &SessionPaths) {
        pidfile::remove_quiet(&paths.session_metadata());
    }

    /// Milliseconds elapsed since the session started.
    pub fn duration_ms(&self, now: DateTime<Utc>) -> u64 {
        (now - self.start_time).num_milliseconds().max(0) as u64
    }
}

/// Positional node-id mapping persisted by `dom_query`.
///
/// Node ids die with the page: `navigation_id` records which page load the
/// mapping belongs to, so index references can be refused once the page has
/// navigated away.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryCache {
    pub selector: String,
    pub node_ids: Vec<i64>,
    pub navigation_id: u64,
    pub captured_at: DateTime<Utc>,
}

impl QueryCache {
    pub fn new(selector: impl Into<String>, node_ids: Vec<i64>, navigation_id: u64) -> Self {
        Self { selector: selector.into(), node_ids, navigation_id, captured_at: Utc::now() }
    }

    pub fn load(paths: &SessionPaths) -> Option<Self> {
        pidfile::read_json(&paths.query_cache())
    }

    pub fn save(&self, paths: &SessionPaths) -> Result<()> {
        pidfile::write_json(&paths.query_cache(), self)
    }

    /// Looks up a cached node id by 1-based index.
    pub fn node_at(&self, index: i64) -> Option<i64> {
        if index < 1 {
            return None;
        }
        self.node_ids.get((index - 1) as usize).copied()
    }
}

/// Reads `daemon.pid` and probes the process: the daemon is running iff the
/// file parses and the pid answers signal 0.
pub fn daemon_is_running(paths: &SessionPaths) -> bool {
    match pidfile::read_pid(&paths.daemon_pid()) {
        Some(pid) => crate::process::pid_is_alive(pid),
        None => false,
    }
}

/// Reads `session.pid` and probes the worker process.
pub fn live_worker_pid(paths: &SessionPaths) -> Option<u32> {
    let pid = pidfile::read_pid(&paths.worker_pid())?;
    crate::process::pid_is_alive(pid).then_some(pid)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch() -> (tempfile::TempDir, SessionPaths) {
        let dir = tempfile::tempdir().unwrap();
        let paths = SessionPaths::with_base(dir.path());
        (dir, paths)
    }

    #[test]
    fn metadata_round_trip() {
        let (_dir, paths) = scratch();
        let meta = SessionMetadata {
            daemon_pid: Some(100),
            worker_pid: 200,
            chrome_pid: Some(300),
            port: 9222,
            target_id: Some("T1".into()),
            browser_ws_url: Some("ws://127.0.0.1:9222/devtools/page/T1".into()),
            url: "https://example.com".into(),
            start_time: Utc::now(),
            active_telemetry: vec![TelemetryKind::Network, TelemetryKind::Console],
        };
        meta.save(&paths).unwrap();

        let loaded = SessionMetadata::load(&paths).unwrap();
        assert_eq!(loaded.worker_pid, 200);
        assert_eq!(loaded.active_telemetry, meta.active_telemetry);

        SessionMetadata::clear(&paths);
        assert!(SessionMetadata::load(&paths).is_none());
    }

    #[test]
    fn query_cache_uses_one_based_indices() {
        let cache = QueryCache::new("div", vec![11, 22, 33], 1);
        assert_eq!(cache.node_at(1), Some(11));
        assert_eq!(cache.node_at(3), Some(33));
        assert_eq!(cache.node_at(0), None);
        assert_eq!(cache.node_at(4), None);
        assert_eq!(cache.node_at(-2), None);
    }

    #[test]
    fn daemon_probe_requires_live_pid() {
        let (_dir, paths) = scratch();
        assert!(!daemon_is_running(&paths));

        pidfile::write_pid(&paths.daemon_pid(), std::process::id()).unwrap();
        assert!(daemon_is_running(&paths));

        // A pid that cannot exist reads as not running.
        pidfile::write_pid(&paths.daemon_pid(), u32::MAX - 1).unwrap();
        assert!(!daemon_is_running(&paths));
    }
}
