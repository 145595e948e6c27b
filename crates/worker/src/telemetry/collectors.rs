//! Telemetry collectors: CDP event subscriptions feeding the store.
//!
//! Collectors must be activated before the first navigation or the
//! page-load burst is lost. Each collector is a subscription task plus a
//! disable command to run at cleanup; one failing cleanup never
//! short-circuits the rest.

use std::collections::BTreeMap;

use serde_json::{Value, json};
use tracing::{debug, warn};

use bdg_cdp::CdpConnection;
use bdg_protocol::TelemetryKind;

use crate::error::Result;
use crate::telemetry::store::SharedStore;

/// Disable step recorded per activated collector.
#[derive(Debug, Clone)]
pub struct CollectorCleanup {
    pub name: &'static str,
    pub disable_method: &'static str,
}

/// Enables the requested CDP domains and spawns the event pumps.
///
/// Navigation tracking is always on: every record is stamped with the
/// navigation id current at observation time, so the sequence must advance
/// even when only one collector kind is requested.
pub async fn activate_collectors(
    connection: &CdpConnection,
    store: &SharedStore,
    kinds: &[TelemetryKind],
    max_body_size: Option<u64>,
) -> Result<Vec<CollectorCleanup>> {
    let mut cleanups = Vec::new();

    spawn_navigation_tracker(connection, store).await?;
    cleanups.push(CollectorCleanup { name: "navigation", disable_method: "Page.disable" });

    for kind in kinds {
        match kind {
            TelemetryKind::Network => {
                spawn_network_collector(connection, store, max_body_size).await?;
                cleanups.push(CollectorCleanup { name: "network", disable_method: "Network.disable" });
            }
            TelemetryKind::Console => {
                spawn_console_collector(connection, store).await?;
                cleanups.push(CollectorCleanup { name: "console", disable_method: "Runtime.disable" });
            }
            // DOM telemetry has no event stream; it is a shutdown snapshot.
            TelemetryKind::Dom => {}
        }
        store.lock().activate(*kind);
    }

    Ok(cleanups)
}

/// Runs every collector's disable command, tolerating individual failures.
pub async fn run_collector_cleanups(connection: &CdpConnection, cleanups: &[CollectorCleanup]) {
    for cleanup in cleanups {
        if let Err(err) = connection.send_command(cleanup.disable_method, json!({})).await {
            warn!(target = "bdg.worker", collector = cleanup.name, error = %err, "collector cleanup failed");
        }
    }
}

async fn spawn_navigation_tracker(connection: &CdpConnection, store: &SharedStore) -> Result<()> {
    let mut events = connection.subscribe("Page.frameNavigated").await;
    connection.send_command("Page.enable", json!({})).await?;

    let store = store.clone();
    tokio::spawn(async move {
        while let Some(params) = events.recv().await {
            let frame = &params["frame"];
            // Child frames carry parentId; only main-frame navigations advance the id.
            if frame.get("parentId").is_some_and(|p| !p.is_null()) {
                continue;
            }
            let url = frame["url"].as_str().unwrap_or_default().to_string();
            let id = store.lock().record_navigation(url.clone());
            debug!(target = "bdg.worker", id, %url, "navigation");
        }
    });

    Ok(())
}

async fn spawn_network_collector(
    connection: &CdpConnection,
    store: &SharedStore,
    max_body_size: Option<u64>,
) -> Result<()> {
    let mut started = connection.subscribe("Network.requestWillBeSent").await;
    let mut responded = connection.subscribe("Network.responseReceived").await;
    let mut finished = connection.subscribe("Network.loadingFinished").await;
    let mut failed = connection.subscribe("Network.loadingFailed").await;
    connection.send_command("Network.enable", json!({})).await?;

    {
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(params) = started.recv().await {
                let id = params["requestId"].as_str().unwrap_or_default().to_string();
                let request = &params["request"];
                store.lock().network_started(
                    id,
                    request["method"].as_str().unwrap_or("GET").to_string(),
                    request["url"].as_str().unwrap_or_default().to_string(),
                    header_map(&request["headers"]),
                );
            }
        });
    }

    {
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(params) = responded.recv().await {
                let id = params["requestId"].as_str().unwrap_or_default().to_string();
                let response = &params["response"];
                store.lock().network_response(
                    &id,
                    response["status"].as_u64().unwrap_or(0) as u32,
                    response["mimeType"].as_str().map(str::to_string),
                    header_map(&response["headers"]),
                );
            }
        });
    }

    {
        let store = store.clone();
        let connection = connection.clone();
        tokio::spawn(async move {
            while let Some(params) = finished.recv().await {
                let Some(id) = params["requestId"].as_str().map(str::to_string) else {
                    continue;
                };
                let Some(cap) = max_body_size else {
                    continue;
                };
                match connection.send_command("Network.getResponseBody", json!({"requestId": id})).await {
                    Ok(result) => {
                        if let Some(body) = result["body"].as_str() {
                            store.lock().network_body(&id, truncate_body(body, cap as usize));
                        }
                    }
                    Err(err) => {
                        debug!(target = "bdg.worker", request = %id, error = %err, "body fetch failed");
                    }
                }
            }
        });
    }

    {
        let store = store.clone();
        tokio::spawn(async move {
            while let Some(params) = failed.recv().await {
                if let Some(id) = params["requestId"].as_str() {
                    let error_text = params["errorText"].as_str().unwrap_or("loading failed").to_string();
                    store.lock().network_failed(id, error_text);
                }
            }
        });
    }

    Ok(())
}

async fn spawn_console_collector(connection: &CdpConnection, store: &SharedStore) -> Result<()> {
    let mut events = connection.subscribe("Runtime.consoleAPICalled").await;
    connection.send_command("Runtime.enable", json!({})).await?;

    let store = store.clone();
    tokio::spawn(async move {
        while let Some(params) = events.recv().await {
            let level = params["type"].as_str().unwrap_or("log").to_string();
            let args: Vec<Value> = params["args"].as_array().cloned().unwrap_or_default();
            let text = console_text(&args);
            store.lock().console_message(level, text, args);
        }
    });

    Ok(())
}

fn truncate_body(body: &str, cap: usize) -> String {
    if body.len() <= cap {
        return body.to_string();
    }
    let mut cut = cap;
    while !body.is_char_boundary(cut) {
        cut -= 1;
    }
    body[..cut].to_string()
}

fn header_map(value: &Value) -> Option<BTreeMap<String, String>> {
    let object = value.as_object()?;
    Some(
        object
            .iter()
            .map(|(k, v)| (k.clone(), v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())))
            .collect(),
    )
}

/// Renders console arguments the way the DevTools console does: primitive
/// values verbatim, objects by their description.
fn console_text(args: &[Value]) -> String {
    args.iter()
        .map(|arg| {
            if let Some(value) = arg.get("value") {
                match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }
            } else if let Some(description) = arg.get("description").and_then(Value::as_str) {
                description.to_string()
            } else {
                arg["type"].as_str().unwrap_or("object").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
