//! HTTP probing of the remote-debugging endpoint.
//!
//! The endpoint may answer on any loopback address depending on how the
//! browser bound its debug port, so every probe walks the loopback hosts
//! and reports each host's failure when none of them answers.

use std::time::Duration;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use bdg_protocol::TargetInfo;

use crate::error::{CdpError, Result};

const LOOPBACK_HOSTS: [&str; 3] = ["127.0.0.1", "localhost", "[::1]"];
const PROBE_TIMEOUT: Duration = Duration::from_millis(500);

/// Debugger metadata served at `/json/version`.
#[derive(Debug, Deserialize)]
pub struct DebuggerEndpoint {
    #[serde(rename = "webSocketDebuggerUrl")]
    pub ws_url: String,
    #[serde(rename = "Browser")]
    pub product: Option<String>,
}

async fn get_json<T: DeserializeOwned>(port: u16, path: &str) -> Result<T> {
    let client = reqwest::Client::builder()
        .timeout(PROBE_TIMEOUT)
        .build()
        .map_err(|err| CdpError::Endpoint(format!("probe client setup failed: {err}")))?;

    let mut failures = Vec::with_capacity(LOOPBACK_HOSTS.len());
    for host in LOOPBACK_HOSTS {
        let url = format!("http://{host}:{port}{path}");
        match probe_once::<T>(&client, &url).await {
            Ok(value) => return Ok(value),
            Err(cause) => failures.push(format!("{host}: {cause}")),
        }
    }

    Err(CdpError::Endpoint(format!(
        "{path} did not answer on port {port} ({})",
        failures.join("; ")
    )))
}

async fn probe_once<T: DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> std::result::Result<T, String> {
    let response = client
        .get(url)
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .map_err(|err| err.to_string())?;
    response.json().await.map_err(|err| format!("bad payload: {err}"))
}

/// Resolves debugger metadata from `/json/version` on `port`.
pub async fn fetch_version(port: u16) -> Result<DebuggerEndpoint> {
    get_json(port, "/json/version").await
}

/// Lists debugging targets from `/json/list` on `port`.
pub async fn list_targets(port: u16) -> Result<Vec<TargetInfo>> {
    get_json(port, "/json/list").await
}

/// Picks the first `page`-type target, or explains what was found instead.
pub fn pick_page_target(targets: Vec<TargetInfo>, port: u16) -> Result<TargetInfo> {
    let total = targets.len();
    match targets.into_iter().find(|t| t.kind == "page") {
        Some(target) => Ok(target),
        None => Err(CdpError::Endpoint(format!(
            "no page target on port {port}: endpoint listed {total} target(s), none of type \"page\"; \
             the browser may still be starting, or only extension/service-worker targets exist"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(kind: &str, id: &str) -> TargetInfo {
        TargetInfo {
            id: id.into(),
            kind: kind.into(),
            url: format!("https://example.com/{id}"),
            title: id.into(),
            web_socket_debugger_url: Some(format!("ws://127.0.0.1:9222/devtools/page/{id}")),
        }
    }

    #[test]
    fn first_page_target_wins() {
        let picked = pick_page_target(
            vec![target("background_page", "B"), target("page", "P1"), target("page", "P2")],
            9222,
        )
        .unwrap();
        assert_eq!(picked.id, "P1");
    }

    #[test]
    fn missing_page_target_names_causes() {
        let err = pick_page_target(vec![target("service_worker", "S")], 9222).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("9222"));
        assert!(message.contains("1 target(s)"));
    }

    #[test]
    fn endpoint_parses_version_shape() {
        let endpoint: DebuggerEndpoint = serde_json::from_str(
            r#"{"Browser": "Chrome/130.0.0.0", "webSocketDebuggerUrl": "ws://127.0.0.1:9222/devtools/browser/x"}"#,
        )
        .unwrap();
        assert!(endpoint.ws_url.starts_with("ws://"));
        assert_eq!(endpoint.product.as_deref(), Some("Chrome/130.0.0.0"));
    }

    #[tokio::test]
    async fn closed_port_reports_every_loopback_host() {
        // Bind-then-drop to get a port nothing is listening on.
        let port = {
            let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };

        let err = fetch_version(port).await.unwrap_err();
        let message = err.to_string();
        assert!(message.contains("/json/version"));
        assert!(message.contains("127.0.0.1"));
        assert!(message.contains("[::1]"));
    }
}
