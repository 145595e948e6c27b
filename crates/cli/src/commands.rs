//! Command dispatch: thin orchestration over the daemon client plus the
//! daemon/worker process entry points.

use std::time::Duration;

use anyhow::anyhow;
use serde_json::{Value, json};
use tracing::{debug, warn};

use bdg_core::process::{KillSignal, kill_pid, kill_tree, pid_is_alive};
use bdg_core::session::daemon_is_running;
use bdg_core::{SessionPaths, pidfile};
use bdg_daemon::{Daemon, DaemonConfig};
use bdg_worker::WorkerConfig;

use crate::cli::{Commands, DaemonAction};
use crate::client;
use crate::error::{CliError, Result};

pub async fn dispatch(command: Commands) -> Result<()> {
    let paths = SessionPaths::resolve();

    match command {
        Commands::Daemon { action } => daemon_command(action, paths).await,
        Commands::Start {
            url,
            port,
            headless,
            user_data_dir,
            timeout,
            browser_ws_url,
            include_all,
            max_body_size,
        } => {
            ensure_daemon(&paths).await?;
            let mut request = json!({
                "type": "start_session_request",
                "sessionId": client::session_id(),
                "url": url,
                "port": port,
                "headless": headless,
                "includeAll": include_all,
            });
            if let Some(dir) = user_data_dir {
                request["userDataDir"] = json!(dir);
            }
            if let Some(secs) = timeout {
                request["timeout"] = json!(secs);
            }
            if let Some(ws) = browser_ws_url {
                request["browserWsUrl"] = json!(ws);
            }
            if let Some(bytes) = max_body_size {
                request["maxBodySize"] = json!(bytes);
            }
            let response = client::request(&paths, &request).await?;
            finish(response)
        }
        Commands::Stop => {
            let request = json!({
                "type": "stop_session_request",
                "sessionId": client::session_id(),
            });
            let response = client::request(&paths, &request).await?;

            // The worker normally kills the browser itself; the returned
            // pid lets us catch a browser orphaned by a dying worker.
            if let Some(chrome_pid) = response["data"]["chromePid"].as_u64() {
                let chrome_pid = chrome_pid as u32;
                tokio::time::sleep(Duration::from_secs(6)).await;
                if pid_is_alive(chrome_pid) {
                    warn!(target = "bdg", chrome_pid, "browser still alive after stop, killing");
                    kill_tree(chrome_pid, KillSignal::Kill);
                }
            }
            finish(response)
        }
        Commands::Status => {
            let request = json!({
                "type": "status_request",
                "sessionId": client::session_id(),
            });
            match client::try_request(&paths, &request).await? {
                Some(response) => finish(response),
                None => {
                    print_value(&json!({"running": false, "message": "daemon not running"}));
                    Ok(())
                }
            }
        }
        Commands::Peek { last } => {
            let request = json!({
                "type": "peek_request",
                "sessionId": client::session_id(),
                "lastN": last,
            });
            let response = client::request(&paths, &request).await?;
            finish(response)
        }
        Commands::Worker { config } => {
            let config = WorkerConfig::parse(&config)
                .map_err(|err| CliError::Anyhow(anyhow!("invalid worker config: {err}")))?;
            bdg_worker::run(config).await.map_err(|err| CliError::Anyhow(anyhow!(err)))
        }
    }
}

async fn daemon_command(action: DaemonAction, paths: SessionPaths) -> Result<()> {
    match action {
        DaemonAction::Start { foreground } => {
            if foreground {
                let daemon = Daemon::start(paths, DaemonConfig::default())
                    .await
                    .map_err(|err| CliError::Anyhow(anyhow!(err)))?;
                return daemon.run().await.map_err(|err| CliError::Anyhow(anyhow!(err)));
            }

            spawn_background_daemon(&paths).await?;
            print_value(&json!({
                "started": true,
                "pid": pidfile::read_pid(&paths.daemon_pid()),
                "socket": paths.daemon_socket(),
            }));
            Ok(())
        }
        DaemonAction::Stop => {
            let Some(pid) = pidfile::read_pid(&paths.daemon_pid()) else {
                print_value(&json!({"stopped": false, "message": "daemon not running"}));
                return Ok(());
            };
            kill_pid(pid, KillSignal::Term);
            for _ in 0..20 {
                if !pid_is_alive(pid) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            print_value(&json!({"stopped": !pid_is_alive(pid), "pid": pid}));
            Ok(())
        }
        DaemonAction::Status => {
            let request = json!({
                "type": "handshake_request",
                "sessionId": client::session_id(),
            });
            match client::try_request(&paths, &request).await? {
                Some(response) => {
                    print_value(&json!({
                        "running": true,
                        "pid": pidfile::read_pid(&paths.daemon_pid()),
                        "message": response["message"],
                    }));
                }
                None => print_value(&json!({"running": false})),
            }
            Ok(())
        }
    }
}

/// Spawns the daemon as a detached copy of this executable and waits for
/// its socket to answer a handshake.
async fn spawn_background_daemon(paths: &SessionPaths) -> Result<()> {
    if daemon_is_running(paths) {
        debug!(target = "bdg", "daemon already running");
        return Ok(());
    }

    let exe = std::env::current_exe()
        .map_err(|err| CliError::Anyhow(anyhow!("failed to resolve executable path: {err}")))?;
    std::process::Command::new(&exe)
        .args(["daemon", "start", "--foreground"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|err| CliError::Anyhow(anyhow!("failed to spawn daemon: {err}")))?;

    let request = json!({"type": "handshake_request", "sessionId": client::session_id()});
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if client::try_request(paths, &request).await?.is_some() {
            return Ok(());
        }
    }
    Err(CliError::Anyhow(anyhow!("daemon failed to start")))
}

async fn ensure_daemon(paths: &SessionPaths) -> Result<()> {
    spawn_background_daemon(paths).await
}

/// Prints the response and maps an error status onto the exit path.
fn finish(response: Value) -> Result<()> {
    print_value(&response);
    if response["status"] == "error" {
        let message = response["error"].as_str().unwrap_or("unknown error").to_string();
        return Err(CliError::DaemonError(message));
    }
    Ok(())
}

fn print_value(value: &Value) {
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{text}"),
        Err(_) => println!("{value}"),
    }
}
