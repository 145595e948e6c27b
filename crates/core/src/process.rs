//! Cross-platform process liveness and kill primitives.
//!
//! POSIX teardown prefers the process group (`kill(-pid, sig)`) so the
//! browser's helper processes die with it, falling back to the single pid.
//! Windows has no group equivalent; `taskkill /T /F` covers the tree.

use std::time::Duration;

use tracing::{debug, warn};

/// Returns `true` when a process with `pid` appears alive on this platform.
pub fn pid_is_alive(pid: u32) -> bool {
    #[cfg(unix)]
    {
        if pid == 0 {
            return false;
        }

        // Signal 0 probes without delivering; EPERM still means alive.
        let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
        if rc == 0 {
            return true;
        }
        std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
    }

    #[cfg(windows)]
    {
        let filter = format!("PID eq {pid}");
        if let Ok(output) = std::process::Command::new("tasklist")
            .args(["/FI", &filter, "/FO", "CSV", "/NH"])
            .output()
        {
            if output.status.success() {
                let stdout = String::from_utf8_lossy(&output.stdout);
                return tasklist_has_pid(stdout.as_ref(), pid);
            }
        }

        pid == std::process::id()
    }

    #[cfg(not(any(unix, windows)))]
    {
        pid == std::process::id()
    }
}

/// Signals to terminate with; mapped to TERM/KILL on POSIX and `taskkill`
/// severity on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillSignal {
    Term,
    Kill,
}

/// Signals a single process, without touching its group.
pub fn kill_pid(pid: u32, signal: KillSignal) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        let sig = match signal {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
        };
        unsafe { libc::kill(pid as libc::pid_t, sig) == 0 }
    }

    #[cfg(windows)]
    {
        let _ = signal;
        std::process::Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/F"])
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = signal;
        false
    }
}

/// Signals `pid`, preferring its process group on POSIX.
///
/// Returns `true` when the signal was delivered to at least one process.
pub fn kill_tree(pid: u32, signal: KillSignal) -> bool {
    if pid == 0 {
        return false;
    }

    #[cfg(unix)]
    {
        let sig = match signal {
            KillSignal::Term => libc::SIGTERM,
            KillSignal::Kill => libc::SIGKILL,
        };

        let group = unsafe { libc::kill(-(pid as libc::pid_t), sig) };
        if group == 0 {
            return true;
        }
        debug!(target = "bdg.process", pid, "group kill failed, falling back to pid");
        unsafe { libc::kill(pid as libc::pid_t, sig) == 0 }
    }

    #[cfg(windows)]
    {
        let _ = signal;
        match std::process::Command::new("taskkill")
            .args(["/pid", &pid.to_string(), "/T", "/F"])
            .output()
        {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr);
                // "not found" means the tree is already gone.
                if stderr.contains("not found") {
                    true
                } else {
                    warn!(target = "bdg.process", pid, %stderr, "taskkill failed");
                    false
                }
            }
            Err(err) => {
                warn!(target = "bdg.process", pid, error = %err, "taskkill could not run");
                false
            }
        }
    }

    #[cfg(not(any(unix, windows)))]
    {
        let _ = signal;
        false
    }
}

/// Terminates `pid` and waits for it to die: TERM, poll every 500 ms for up
/// to `grace`, then KILL the group. Returns `false` if the process survived
/// even SIGKILL.
pub async fn terminate_and_wait(pid: u32, grace: Duration) -> bool {
    if !pid_is_alive(pid) {
        return true;
    }

    kill_tree(pid, KillSignal::Term);

    let poll = Duration::from_millis(500);
    let mut waited = Duration::ZERO;
    while waited < grace {
        tokio::time::sleep(poll).await;
        waited += poll;
        if !pid_is_alive(pid) {
            return true;
        }
    }

    debug!(target = "bdg.process", pid, "still alive after TERM grace, escalating");
    kill_tree(pid, KillSignal::Kill);
    tokio::time::sleep(poll).await;

    if pid_is_alive(pid) {
        warn!(target = "bdg.process", pid, "process survived SIGKILL");
        return false;
    }
    true
}

/// Returns `true` when `port` can be bound on localhost.
pub fn port_available(port: u16) -> bool {
    std::net::TcpListener::bind(("127.0.0.1", port)).is_ok()
}

#[cfg(any(test, windows))]
#[allow(dead_code)]
fn tasklist_has_pid(output: &str, pid: u32) -> bool {
    let pid_str = pid.to_string();
    output.lines().any(|line| {
        let line = line.trim();
        if !line.starts_with('"') {
            return false;
        }

        line.trim_matches('"')
            .split("\",\"")
            .nth(1)
            .is_some_and(|field| field.trim() == pid_str.as_str())
    })
}
