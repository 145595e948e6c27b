//! Managed browser launch behind the `pid` + `kill` contract.
//!
//! The worker only ever sees a [`BrowserHandle`]; whether it wraps a child
//! we spawned or a pid attached from an external endpoint is invisible to
//! the rest of the stack.

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use tracing::debug;

use bdg_core::process::{KillSignal, kill_tree, port_available};

use crate::error::{CdpError, Result};
use crate::http::{DebuggerEndpoint, fetch_version};

const BROWSER_CANDIDATES: [&str; 6] = [
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
    "chrome",
    "msedge",
];

/// How long a freshly spawned browser gets to open its debug endpoint.
const STARTUP_WINDOW: Duration = Duration::from_millis(1600);
const STARTUP_POLL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub port: u16,
    pub headless: bool,
    pub user_data_dir: Option<PathBuf>,
}

/// Handle to the browser process: a pid and a way to kill its tree.
#[derive(Debug)]
pub struct BrowserHandle {
    pid: u32,
    child: Option<Child>,
}

impl BrowserHandle {
    /// Wraps an already-running browser we did not spawn (external
    /// WebSocket URL sessions). `kill` still works through the pid.
    pub fn attached(pid: u32) -> Self {
        Self { pid, child: None }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Sends SIGTERM to the browser's process group.
    pub fn kill(&mut self) {
        kill_tree(self.pid, KillSignal::Term);
        if let Some(child) = self.child.as_mut() {
            // Reap if it already exited so no zombie lingers.
            let _ = child.try_wait();
        }
    }
}

/// Locates a Chrome-family executable on PATH.
pub fn find_browser_executable() -> Option<PathBuf> {
    BROWSER_CANDIDATES.iter().find_map(|name| which::which(name).ok())
}

/// Launches a managed browser and waits for its debugging endpoint.
///
/// The child goes into its own process group so teardown can signal the
/// whole tree. The endpoint is polled until the startup window closes; a
/// child that dies first short-circuits the wait.
pub async fn launch_browser(options: &LaunchOptions) -> Result<(BrowserHandle, DebuggerEndpoint)> {
    if !port_available(options.port) {
        return Err(CdpError::Launch(format!(
            "port {} is already in use; pass the running browser's WebSocket URL instead",
            options.port
        )));
    }

    let executable = find_browser_executable().ok_or_else(|| {
        CdpError::Launch(
            "could not find a Chrome/Chromium executable on PATH; install one or pass an external \
             WebSocket URL"
                .into(),
        )
    })?;

    let mut cmd = Command::new(&executable);
    cmd.arg(format!("--remote-debugging-port={}", options.port))
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    if options.headless {
        cmd.arg("--headless=new");
    }
    if let Some(dir) = &options.user_data_dir {
        cmd.arg(format!("--user-data-dir={}", dir.display()));
    }

    #[cfg(unix)]
    std::os::unix::process::CommandExt::process_group(&mut cmd, 0);

    let mut child = cmd
        .spawn()
        .map_err(|err| CdpError::Launch(format!("failed to launch {}: {err}", executable.display())))?;
    let pid = child.id();
    debug!(target = "bdg.cdp", pid, port = options.port, headless = options.headless, "browser spawned");

    match await_endpoint(&mut child, options.port).await {
        Ok(endpoint) => Ok((BrowserHandle { pid, child: Some(child) }, endpoint)),
        Err(err) => {
            kill_tree(pid, KillSignal::Term);
            let _ = child.wait();
            Err(err)
        }
    }
}

/// Polls the debug endpoint until it answers or the startup window closes.
/// Checks the child before each probe so a crashed browser fails with its
/// exit status instead of a connection error.
async fn await_endpoint(child: &mut Child, port: u16) -> Result<DebuggerEndpoint> {
    let deadline = tokio::time::Instant::now() + STARTUP_WINDOW;
    loop {
        if let Ok(Some(status)) = child.try_wait() {
            return Err(CdpError::Launch(format!(
                "browser exited during startup (status: {status}); if its default profile is \
                 locked by another instance, retry with a dedicated user data directory"
            )));
        }

        tokio::time::sleep(STARTUP_POLL).await;

        let probe = fetch_version(port).await;
        match probe {
            Ok(endpoint) => return Ok(endpoint),
            Err(err) if tokio::time::Instant::now() >= deadline => {
                return Err(CdpError::Launch(format!(
                    "browser is running but its debug endpoint never opened: {err}"
                )));
            }
            Err(err) => {
                debug!(target = "bdg.cdp", port, error = %err, "endpoint not ready yet");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attached_handle_reports_pid() {
        let handle = BrowserHandle::attached(4321);
        assert_eq!(handle.pid(), 4321);
    }

    #[cfg(unix)]
    #[test]
    fn kill_terminates_an_attached_process() {
        let child = Command::new("sleep").arg("30").spawn().unwrap();
        let pid = child.id();
        let mut handle = BrowserHandle { pid, child: Some(child) };
        assert!(bdg_core::process::pid_is_alive(pid));
        handle.kill();
        std::thread::sleep(Duration::from_millis(200));
        // Reap so liveness reflects reality rather than a zombie entry.
        if let Some(mut child) = handle.child.take() {
            let _ = child.wait();
        }
        assert!(!bdg_core::process::pid_is_alive(pid));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dead_child_short_circuits_the_endpoint_wait() {
        // A child that exits immediately; the wait must report its status
        // rather than polling out the whole startup window.
        let mut child = Command::new("true").spawn().unwrap();
        std::thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        let err = await_endpoint(&mut child, 1).await.unwrap_err();
        assert!(err.to_string().contains("exited during startup"));
        assert!(started.elapsed() < STARTUP_WINDOW);
    }
}
