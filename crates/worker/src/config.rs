//! Worker configuration, parsed from the single JSON argument the daemon
//! passes on the command line.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use bdg_protocol::TelemetryKind;

pub const DEFAULT_DEBUG_PORT: u16 = 9222;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerConfig {
    pub url: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Auto-stop after this many seconds; absent means run until stopped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    /// Telemetry kinds to activate; absent means network+console+dom.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub telemetry: Option<Vec<TelemetryKind>>,
    /// Activate every telemetry kind, overriding the `telemetry` list.
    #[serde(default)]
    pub include_all: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data_dir: Option<PathBuf>,
    /// Cap on captured response-body bytes; absent disables body capture.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_body_size: Option<u64>,
    #[serde(default)]
    pub headless: bool,
    /// Attach to an existing endpoint instead of launching a browser.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browser_ws_url: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_DEBUG_PORT
}

impl WorkerConfig {
    pub fn parse(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    pub fn active_telemetry(&self) -> Vec<TelemetryKind> {
        if self.include_all {
            return TelemetryKind::DEFAULT.to_vec();
        }
        let mut kinds = self.telemetry.clone().unwrap_or_else(|| TelemetryKind::DEFAULT.to_vec());
        kinds.sort();
        kinds.dedup();
        kinds
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_fills_defaults() {
        let config = WorkerConfig::parse(r#"{"url": "https://example.com"}"#).unwrap();
        assert_eq!(config.port, 9222);
        assert!(!config.headless);
        assert!(!config.include_all);
        assert_eq!(
            config.active_telemetry(),
            vec![TelemetryKind::Network, TelemetryKind::Console, TelemetryKind::Dom]
        );
    }

    #[test]
    fn explicit_telemetry_is_deduped() {
        let config = WorkerConfig::parse(
            r#"{"url": "u", "telemetry": ["console", "console", "network"]}"#,
        )
        .unwrap();
        assert_eq!(config.active_telemetry(), vec![TelemetryKind::Network, TelemetryKind::Console]);
    }

    #[test]
    fn include_all_overrides_the_kinds_list() {
        let config =
            WorkerConfig::parse(r#"{"url": "u", "telemetry": ["console"], "includeAll": true}"#).unwrap();
        assert_eq!(
            config.active_telemetry(),
            vec![TelemetryKind::Network, TelemetryKind::Console, TelemetryKind::Dom]
        );
    }

    #[test]
    fn full_config_round_trips() {
        let config = WorkerConfig::parse(
            r#"{
                "url": "https://example.com",
                "port": 9333,
                "timeout": 120,
                "telemetry": ["network"],
                "includeAll": true,
                "maxBodySize": 65536,
                "headless": true,
                "browserWsUrl": "ws://127.0.0.1:9333/devtools/page/T"
            }"#,
        )
        .unwrap();
        assert_eq!(config.port, 9333);
        assert_eq!(config.timeout, Some(120));
        assert!(config.include_all);
        assert_eq!(config.max_body_size, Some(65536));
        assert!(config.browser_ws_url.is_some());
    }
}
