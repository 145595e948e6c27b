//! On-disk layout of the per-user session directory.
//!
//! Every file the daemon and worker touch lives under one base directory so
//! external cleanup only has to know a single path. The base resolves from
//! `BDG_SESSION_DIR`, then `~/.bdg`, then the system temp dir.

use std::path::{Path, PathBuf};

pub const DAEMON_SOCKET_FILE: &str = "daemon.sock";
pub const DAEMON_PID_FILE: &str = "daemon.pid";
pub const DAEMON_LOCK_FILE: &str = "daemon.lock";
pub const WORKER_PID_FILE: &str = "session.pid";
pub const SESSION_METADATA_FILE: &str = "session.json";
pub const CHROME_PID_FILE: &str = "chrome.pid";
pub const SESSION_OUTPUT_FILE: &str = "session-output.json";
pub const QUERY_CACHE_FILE: &str = "query-cache.json";

/// Resolved session directory and the paths of every file inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPaths {
    base: PathBuf,
}

impl SessionPaths {
    /// Resolves the conventional per-user base directory.
    pub fn resolve() -> Self {
        if let Ok(dir) = std::env::var("BDG_SESSION_DIR") {
            if !dir.is_empty() {
                return Self { base: PathBuf::from(dir) };
            }
        }

        if let Some(home) = dirs::home_dir() {
            return Self { base: home.join(".bdg") };
        }

        Self { base: std::env::temp_dir().join("bdg") }
    }

    /// Uses an explicit base directory (tests, alternate profiles).
    pub fn with_base(base: impl Into<PathBuf>) -> Self {
        Self { base: base.into() }
    }

    /// Creates the session directory if absent.
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn daemon_socket(&self) -> PathBuf {
        self.base.join(DAEMON_SOCKET_FILE)
    }

    pub fn daemon_pid(&self) -> PathBuf {
        self.base.join(DAEMON_PID_FILE)
    }

    pub fn daemon_lock(&self) -> PathBuf {
        self.base.join(DAEMON_LOCK_FILE)
    }

    pub fn worker_pid(&self) -> PathBuf {
        self.base.join(WORKER_PID_FILE)
    }

    pub fn session_metadata(&self) -> PathBuf {
        self.base.join(SESSION_METADATA_FILE)
    }

    pub fn chrome_pid(&self) -> PathBuf {
        self.base.join(CHROME_PID_FILE)
    }

    pub fn session_output(&self) -> PathBuf {
        self.base.join(SESSION_OUTPUT_FILE)
    }

    pub fn query_cache(&self) -> PathBuf {
        self.base.join(QUERY_CACHE_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_stable() {
        let paths = SessionPaths::with_base("/tmp/bdg-test");
        assert_eq!(paths.daemon_socket(), PathBuf::from("/tmp/bdg-test/daemon.sock"));
        assert_eq!(paths.worker_pid(), PathBuf::from("/tmp/bdg-test/session.pid"));
        assert_eq!(paths.query_cache(), PathBuf::from("/tmp/bdg-test/query-cache.json"));
    }
}
