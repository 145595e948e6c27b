//! Worker process entry: startup sequence and the stdin command loop.
//!
//! Stdout carries exactly one `worker_ready` frame followed by command
//! responses; logs go to stderr. Command handlers are serialized on the
//! read loop, so at most one runs at a time, in arrival order.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use bdg_cdp::{BrowserHandle, CdpConnection, LaunchOptions, launch_browser, list_targets, pick_page_target};
use bdg_core::{SessionMetadata, SessionPaths, pidfile};
use bdg_protocol::{CommandName, JsonlDecoder, TargetInfo, WorkerReady, WorkerResponse, encode_frame};

use crate::cleanup::{CleanupReason, WorkerContext, run_cleanup};
use crate::commands::{self, CommandContext};
use crate::config::WorkerConfig;
use crate::error::{Result, WorkerError};
use crate::telemetry::{activate_collectors, shared_store};

const PAGE_READY_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs the worker to completion. `Err` means crash cleanup already ran and
/// the process should exit non-zero.
pub async fn run(config: WorkerConfig) -> Result<()> {
    let paths = SessionPaths::resolve();
    paths.ensure()?;
    pidfile::write_pid(&paths.worker_pid(), std::process::id())?;

    match start_session(&config, &paths).await {
        Ok((ctx, crash_rx)) => command_loop(ctx, crash_rx).await,
        Err(err) => {
            // Startup died before the context existed; remove what we own.
            pidfile::remove_quiet(&paths.worker_pid());
            SessionMetadata::clear(&paths);
            Err(err)
        }
    }
}

/// Startup sequence: acquire a target, connect, activate telemetry before
/// navigating, navigate, wait for readiness, persist metadata, emit the
/// ready frame.
async fn start_session(
    config: &WorkerConfig,
    paths: &SessionPaths,
) -> Result<(Arc<WorkerContext>, mpsc::UnboundedReceiver<()>)> {
    let store = shared_store();

    let (browser, target, ws_url) = acquire_target(config, paths).await?;
    let chrome_pid = browser.as_ref().map(|b| b.pid());

    connect_and_prepare(config, paths, &store, browser, target, ws_url, chrome_pid).await
}

#[allow(clippy::too_many_arguments)]
async fn connect_and_prepare(
    config: &WorkerConfig,
    paths: &SessionPaths,
    store: &crate::telemetry::SharedStore,
    browser: Option<BrowserHandle>,
    target: TargetInfo,
    ws_url: String,
    chrome_pid: Option<u32>,
) -> Result<(Arc<WorkerContext>, mpsc::UnboundedReceiver<()>)> {
    // Any failure past this point must not leak a launched browser.
    let mut browser = browser;
    macro_rules! bail_killing_browser {
        ($expr:expr) => {
            match $expr {
                Ok(value) => value,
                Err(err) => {
                    if let Some(handle) = browser.as_mut() {
                        handle.kill();
                    }
                    let output = store.lock().build_output(true);
                    let _ = pidfile::write_json(&paths.session_output(), &output);
                    return Err(err.into());
                }
            }
        };
    }

    let (crash_tx, crash_rx) = mpsc::unbounded_channel();
    let hook: bdg_cdp::DisconnectHook = Box::new(move || {
        let _ = crash_tx.send(());
    });
    let connection = bail_killing_browser!(CdpConnection::connect(&ws_url, Some(hook)).await);

    store.lock().set_target_info(target.clone());

    // Collectors must be live before the first navigation or the initial
    // page-load burst never reaches the store.
    let kinds = config.active_telemetry();
    let collectors =
        bail_killing_browser!(activate_collectors(&connection, store, &kinds, config.max_body_size).await);

    let mut load_events = connection.subscribe("Page.loadEventFired").await;
    bail_killing_browser!(connection.send_command("Page.navigate", json!({"url": config.url})).await);

    if tokio::time::timeout(PAGE_READY_TIMEOUT, load_events.recv()).await.is_err() {
        debug!(target = "bdg.worker", "load event did not fire in time, continuing");
    }

    refresh_target_info(&connection, store).await;

    let metadata = SessionMetadata {
        daemon_pid: Some(std::os::unix::process::parent_id()),
        worker_pid: std::process::id(),
        chrome_pid,
        port: config.port,
        target_id: Some(target.id.clone()),
        browser_ws_url: Some(ws_url),
        url: config.url.clone(),
        start_time: Utc::now(),
        active_telemetry: kinds,
    };
    bail_killing_browser!(metadata.save(paths));

    // Session duration counts from readiness, not from launch overhead.
    store.lock().reset_session_start();

    let target_summary = store.lock().target_info().map(|t| t.summary()).unwrap_or_default();
    let ready = WorkerReady::new(std::process::id(), chrome_pid, config.port, target_summary);
    let ready_bytes = bail_killing_browser!(encode_frame(&ready));
    let mut stdout = tokio::io::stdout();
    bail_killing_browser!(stdout.write_all(&ready_bytes).await);
    bail_killing_browser!(stdout.flush().await);
    info!(target = "bdg.worker", port = config.port, url = %config.url, "worker ready");

    let ctx = Arc::new(WorkerContext::new(
        paths.clone(),
        config.clone(),
        connection,
        store.clone(),
        browser,
        collectors,
    ));
    Ok((ctx, crash_rx))
}

async fn acquire_target(
    config: &WorkerConfig,
    paths: &SessionPaths,
) -> Result<(Option<BrowserHandle>, TargetInfo, String)> {
    if let Some(ws_url) = &config.browser_ws_url {
        // External endpoint: nothing to launch, synthesize minimal target info.
        let target = TargetInfo {
            id: "external".into(),
            kind: "page".into(),
            url: String::new(),
            title: String::new(),
            web_socket_debugger_url: Some(ws_url.clone()),
        };
        return Ok((None, target, ws_url.clone()));
    }

    let options = LaunchOptions {
        port: config.port,
        headless: config.headless,
        user_data_dir: config.user_data_dir.clone(),
    };
    let (handle, _endpoint) = launch_browser(&options).await?;
    pidfile::write_pid(&paths.chrome_pid(), handle.pid())?;

    let targets = list_targets(config.port).await?;
    let target = pick_page_target(targets, config.port)?;
    let ws_url = target.web_socket_debugger_url.clone().ok_or_else(|| {
        WorkerError::Startup(format!("target {} exposes no WebSocket debugger URL", target.id))
    })?;

    Ok((Some(handle), target, ws_url))
}

/// Picks up the post-redirect URL and title, best-effort.
async fn refresh_target_info(connection: &CdpConnection, store: &crate::telemetry::SharedStore) {
    let result = connection
        .send_command(
            "Runtime.evaluate",
            json!({
                "expression": "JSON.stringify({url: location.href, title: document.title})",
                "returnByValue": true,
            }),
        )
        .await;

    if let Ok(value) = result {
        if let Some(raw) = value["result"]["value"].as_str() {
            if let Ok(parsed) = serde_json::from_str::<Value>(raw) {
                store.lock().refresh_target(
                    parsed["url"].as_str().unwrap_or_default().to_string(),
                    parsed["title"].as_str().unwrap_or_default().to_string(),
                );
            }
        }
    }
}

async fn command_loop(ctx: Arc<WorkerContext>, mut crash_rx: mpsc::UnboundedReceiver<()>) -> Result<()> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|err| WorkerError::Startup(format!("failed to install SIGTERM handler: {err}")))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|err| WorkerError::Startup(format!("failed to install SIGINT handler: {err}")))?;

    // Absolute deadline: receiving commands does not push auto-stop out.
    let auto_stop_deadline =
        ctx.config.timeout.map(|secs| tokio::time::Instant::now() + Duration::from_secs(secs));

    let command_ctx = CommandContext {
        connection: ctx.connection.clone(),
        store: ctx.store.clone(),
        paths: ctx.paths.clone(),
    };

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();
    let mut decoder = JsonlDecoder::new();
    let mut buf = vec![0u8; 16 * 1024];

    loop {
        let auto_stop_sleep = async {
            match auto_stop_deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            read = stdin.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        // Daemon side of the pipe is gone.
                        warn!(target = "bdg.worker", "stdin closed, treating as supervisor loss");
                        run_cleanup(&ctx, CleanupReason::Crash).await;
                        return Err(WorkerError::Startup("daemon pipe closed".into()));
                    }
                    Ok(n) => {
                        for frame in decoder.feed(&buf[..n]) {
                            handle_frame(&command_ctx, frame, &mut stdout).await;
                        }
                    }
                    Err(err) => {
                        warn!(target = "bdg.worker", error = %err, "stdin read failed");
                        run_cleanup(&ctx, CleanupReason::Crash).await;
                        return Err(WorkerError::Io(err));
                    }
                }
            }
            _ = sigterm.recv() => {
                info!(target = "bdg.worker", "received SIGTERM, shutting down");
                run_cleanup(&ctx, CleanupReason::Normal).await;
                return Ok(());
            }
            _ = sigint.recv() => {
                info!(target = "bdg.worker", "received SIGINT, shutting down");
                run_cleanup(&ctx, CleanupReason::Normal).await;
                return Ok(());
            }
            _ = auto_stop_sleep => {
                info!(target = "bdg.worker", "auto-stop timer fired");
                run_cleanup(&ctx, CleanupReason::Timeout).await;
                return Ok(());
            }
            _ = crash_rx.recv() => {
                warn!(target = "bdg.worker", "browser connection lost");
                run_cleanup(&ctx, CleanupReason::Crash).await;
                return Err(WorkerError::Startup("browser connection lost".into()));
            }
        }
    }
}

/// Decodes one request frame, dispatches it, and writes the response.
///
/// Unknown commands are logged and dropped (no response). A handler panic
/// still produces a failure response; nothing here exits the process.
async fn handle_frame(ctx: &CommandContext, frame: Value, stdout: &mut tokio::io::Stdout) {
    let Some(object) = frame.as_object() else {
        debug!(target = "bdg.worker", "dropping non-object frame");
        return;
    };
    let Some(wire_type) = object.get("type").and_then(Value::as_str) else {
        debug!(target = "bdg.worker", "dropping frame without type");
        return;
    };
    let Some(request_id) = object.get("requestId").and_then(Value::as_str).map(str::to_string) else {
        debug!(target = "bdg.worker", wire_type, "dropping frame without requestId");
        return;
    };
    let Some(command) = CommandName::from_request_type(wire_type) else {
        warn!(target = "bdg.worker", wire_type, "unknown command, dropping");
        return;
    };

    let mut params = object.clone();
    params.remove("type");
    params.remove("requestId");

    let outcome = AssertUnwindSafe(commands::execute(ctx, command, Value::Object(params)))
        .catch_unwind()
        .await;

    let response = match outcome {
        Ok(Ok(data)) => WorkerResponse::ok(command, &request_id, data),
        Ok(Err(err)) => WorkerResponse::err(command, &request_id, err.to_string()),
        Err(_) => {
            warn!(target = "bdg.worker", command = %command, "command handler panicked");
            WorkerResponse::err(command, &request_id, "internal error: command handler panicked")
        }
    };

    match encode_frame(&response) {
        Ok(bytes) => {
            if let Err(err) = stdout.write_all(&bytes).await {
                warn!(target = "bdg.worker", error = %err, "failed to write response");
            }
            let _ = stdout.flush().await;
        }
        Err(err) => {
            warn!(target = "bdg.worker", error = %err, "failed to encode response");
        }
    }
}
