//! Re-entrant worker teardown.
//!
//! Cleanup can be triggered from several places (signal, auto-stop timer,
//! browser disconnect, fatal error); an atomic flag ensures only the first
//! trigger runs the body. The browser pid is persisted before anything else
//! so an external `kill` still works if teardown dies halfway.

use std::sync::Mutex as StdMutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use bdg_cdp::{BrowserHandle, CdpConnection};
use bdg_core::process::{KillSignal, kill_tree, pid_is_alive};
use bdg_core::{SessionMetadata, SessionPaths, pidfile};
use bdg_protocol::{DomSnapshot, TelemetryKind};

use crate::config::WorkerConfig;
use crate::telemetry::collectors::run_collector_cleanups;
use crate::telemetry::{CollectorCleanup, SharedStore};

const BROWSER_KILL_GRACE: Duration = Duration::from_secs(5);
const BROWSER_KILL_POLL: Duration = Duration::from_millis(500);
const CLEANUP_STEP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupReason {
    Normal,
    Crash,
    Timeout,
}

/// Shared state of one worker process.
pub struct WorkerContext {
    pub paths: SessionPaths,
    pub config: WorkerConfig,
    pub connection: CdpConnection,
    pub store: SharedStore,
    pub browser: StdMutex<Option<BrowserHandle>>,
    pub collectors: StdMutex<Vec<CollectorCleanup>>,
    cleanup_started: AtomicBool,
}

impl WorkerContext {
    pub fn new(
        paths: SessionPaths,
        config: WorkerConfig,
        connection: CdpConnection,
        store: SharedStore,
        browser: Option<BrowserHandle>,
        collectors: Vec<CollectorCleanup>,
    ) -> Self {
        Self {
            paths,
            config,
            connection,
            store,
            browser: StdMutex::new(browser),
            collectors: StdMutex::new(collectors),
            cleanup_started: AtomicBool::new(false),
        }
    }

    pub fn cleanup_has_run(&self) -> bool {
        self.cleanup_started.load(Ordering::SeqCst)
    }
}

/// Runs the teardown sequence once; later triggers return immediately.
pub async fn run_cleanup(ctx: &WorkerContext, reason: CleanupReason) {
    if ctx.cleanup_started.swap(true, Ordering::SeqCst) {
        debug!(target = "bdg.worker", ?reason, "cleanup already running, ignoring trigger");
        return;
    }
    info!(target = "bdg.worker", ?reason, "cleaning up session");

    let browser_pid = ctx.browser.lock().unwrap_or_else(|p| p.into_inner()).as_ref().map(|b| b.pid());
    if let Some(pid) = browser_pid {
        if let Err(err) = pidfile::write_pid(&ctx.paths.chrome_pid(), pid) {
            warn!(target = "bdg.worker", error = %err, "failed to cache browser pid");
        }
    }

    let dom_active = ctx.store.lock().active_telemetry().contains(&TelemetryKind::Dom);
    if reason == CleanupReason::Normal && dom_active {
        match tokio::time::timeout(CLEANUP_STEP_TIMEOUT, capture_dom_snapshot(&ctx.connection)).await {
            Ok(Ok(snapshot)) => ctx.store.lock().set_dom_snapshot(snapshot),
            Ok(Err(err)) => debug!(target = "bdg.worker", error = %err, "final DOM capture failed"),
            Err(_) => debug!(target = "bdg.worker", "final DOM capture timed out"),
        }
    }

    let cleanups = ctx.collectors.lock().unwrap_or_else(|p| p.into_inner()).clone();
    if tokio::time::timeout(CLEANUP_STEP_TIMEOUT, run_collector_cleanups(&ctx.connection, &cleanups))
        .await
        .is_err()
    {
        debug!(target = "bdg.worker", "collector cleanup timed out");
    }

    ctx.connection.close().await;

    let handle = ctx.browser.lock().unwrap_or_else(|p| p.into_inner()).take();
    if let Some(mut handle) = handle {
        kill_browser(&mut handle).await;
    }

    let output = ctx.store.lock().build_output(reason != CleanupReason::Normal);
    if let Err(err) = pidfile::write_json(&ctx.paths.session_output(), &output) {
        warn!(target = "bdg.worker", error = %err, "failed to write session output");
    }

    pidfile::remove_quiet(&ctx.paths.worker_pid());
    SessionMetadata::clear(&ctx.paths);
    info!(target = "bdg.worker", ?reason, "cleanup complete");
}

/// TERM through the handle, poll for death, escalate to a group SIGKILL.
async fn kill_browser(handle: &mut BrowserHandle) {
    let pid = handle.pid();
    handle.kill();

    let mut waited = Duration::ZERO;
    while waited < BROWSER_KILL_GRACE {
        if !pid_is_alive(pid) {
            debug!(target = "bdg.worker", pid, "browser exited");
            return;
        }
        tokio::time::sleep(BROWSER_KILL_POLL).await;
        waited += BROWSER_KILL_POLL;
    }

    kill_tree(pid, KillSignal::Kill);
    tokio::time::sleep(BROWSER_KILL_POLL).await;
    if pid_is_alive(pid) {
        warn!(target = "bdg.worker", pid, "browser survived SIGKILL");
    }
}

async fn capture_dom_snapshot(connection: &CdpConnection) -> crate::error::Result<DomSnapshot> {
    let result = connection
        .send_command(
            "Runtime.evaluate",
            json!({
                "expression": "JSON.stringify({url: location.href, title: document.title, \
                               html: document.documentElement ? document.documentElement.outerHTML : ''})",
                "returnByValue": true,
            }),
        )
        .await?;

    let raw = result["result"]["value"]
        .as_str()
        .ok_or_else(|| crate::error::WorkerError::NotFound("page returned no DOM data".into()))?;
    let parsed: serde_json::Value = serde_json::from_str(raw)?;

    Ok(DomSnapshot {
        url: parsed["url"].as_str().unwrap_or_default().to_string(),
        title: parsed["title"].as_str().unwrap_or_default().to_string(),
        outer_html: parsed["html"].as_str().unwrap_or_default().to_string(),
    })
}
