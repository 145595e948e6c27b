//! Advisory lock serializing daemon startup.
//!
//! Held from before the socket bind until `daemon.pid` is durable, so two
//! concurrent `daemon start` invocations cannot race on the socket path.

use std::fs::{File, OpenOptions};
use std::path::Path;

use fs2::FileExt;

use crate::error::{Result, StateError};

/// Exclusive advisory lock on `daemon.lock`; released on drop.
#[derive(Debug)]
pub struct StartupLock {
    file: File,
}

impl StartupLock {
    pub fn acquire(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).truncate(false).open(path)?;
        file.try_lock_exclusive().map_err(|_| StateError::LockBusy { path: path.to_path_buf() })?;
        Ok(Self { file })
    }

    /// Explicit release once startup is durable; drop does the same.
    pub fn release(self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

impl Drop for StartupLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_while_held() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("daemon.lock");

        let lock = StartupLock::acquire(&path).unwrap();
        assert!(matches!(StartupLock::acquire(&path), Err(StateError::LockBusy { .. })));

        lock.release();
        StartupLock::acquire(&path).unwrap();
    }
}
