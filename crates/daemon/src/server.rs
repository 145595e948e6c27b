//! Daemon server: startup, the accept loop, and per-connection plumbing.
//!
//! Startup is serialized by the advisory lock: acquire, refuse if a live
//! daemon owns the pid file, clear any stale socket, bind, write the pid
//! atomically, release. Bind failure is fatal.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

use bdg_core::process::{KillSignal, kill_pid, terminate_and_wait};
use bdg_core::session::daemon_is_running;
use bdg_core::{SessionPaths, StartupLock, pidfile};
use bdg_protocol::{JsonlDecoder, encode_frame};

use crate::error::{DaemonError, Result};
use crate::pending::{PendingRequests, RequestIds};
use crate::router;
use crate::worker::WorkerLink;

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    /// How long a spawned worker gets to report ready.
    pub ready_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self { ready_timeout: Duration::from_secs(15) }
    }
}

#[derive(Debug)]
pub struct DaemonState {
    pub paths: SessionPaths,
    pub config: DaemonConfig,
    pub started_at: DateTime<Utc>,
    pub pending: PendingRequests,
    pub ids: RequestIds,
    pub worker: Option<WorkerLink>,
}

pub type SharedState = Arc<Mutex<DaemonState>>;

#[derive(Debug)]
pub struct Daemon {
    state: SharedState,
    listener: UnixListener,
}

impl Daemon {
    /// Binds the socket and makes the daemon discoverable. Holding the
    /// startup lock across bind+pid-write keeps two concurrent starts from
    /// racing on the socket path.
    pub async fn start(paths: SessionPaths, config: DaemonConfig) -> Result<Self> {
        paths.ensure()?;
        let lock = StartupLock::acquire(&paths.daemon_lock())?;

        if daemon_is_running(&paths) {
            let pid = pidfile::read_pid(&paths.daemon_pid()).unwrap_or(0);
            return Err(DaemonError::AlreadyRunning(pid));
        }

        // A dead daemon leaves its socket file behind; bind needs it gone.
        pidfile::remove_quiet(&paths.daemon_socket());

        let socket_path = paths.daemon_socket();
        let listener = UnixListener::bind(&socket_path)
            .map_err(|source| DaemonError::Bind { path: socket_path.clone(), source })?;

        pidfile::write_pid(&paths.daemon_pid(), std::process::id())?;
        lock.release();
        info!(target = "bdg.daemon", socket = %socket_path.display(), "daemon listening");

        let state = Arc::new(Mutex::new(DaemonState {
            paths,
            config,
            started_at: Utc::now(),
            pending: PendingRequests::new(),
            ids: RequestIds::new(),
            worker: None,
        }));

        Ok(Self { state, listener })
    }

    /// Accepts connections until a termination signal arrives, then tears
    /// the stack down.
    pub async fn run(self) -> Result<()> {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, _)) => {
                            tokio::spawn(serve_connection(self.state.clone(), stream));
                        }
                        Err(err) => {
                            warn!(target = "bdg.daemon", error = %err, "accept failed");
                        }
                    }
                }
                _ = sigterm.recv() => {
                    info!(target = "bdg.daemon", "received SIGTERM, shutting down");
                    break;
                }
                _ = sigint.recv() => {
                    info!(target = "bdg.daemon", "received SIGINT, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops accepting, disposes the worker (the whole stack goes down with
    /// the daemon), and removes the socket and pid files.
    pub async fn shutdown(self) {
        drop(self.listener);

        let mut guard = self.state.lock().await;
        let worker = guard.worker.take();
        let paths = guard.paths.clone();
        drop(guard);

        if let Some(worker) = worker {
            info!(target = "bdg.daemon", pid = worker.pid, "terminating worker");
            kill_pid(worker.pid, KillSignal::Term);
            if !terminate_and_wait(worker.pid, std::time::Duration::from_secs(5)).await {
                warn!(target = "bdg.daemon", pid = worker.pid, "worker did not exit cleanly");
            }
        }

        pidfile::remove_quiet(&paths.daemon_socket());
        pidfile::remove_quiet(&paths.daemon_pid());
        info!(target = "bdg.daemon", "daemon stopped");
    }
}

/// One task per client socket: a writer draining the reply channel and a
/// read loop feeding the router. Pending entries hold reply-channel clones,
/// so a response that outlives the socket is written best-effort and the
/// failure is logged.
pub async fn serve_connection(state: SharedState, stream: UnixStream) {
    let (mut read_half, mut write_half) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<Value>();

    tokio::spawn(async move {
        while let Some(message) = reply_rx.recv().await {
            let bytes = match encode_frame(&message) {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(target = "bdg.daemon", error = %err, "failed to encode client response");
                    continue;
                }
            };
            if let Err(err) = write_half.write_all(&bytes).await {
                debug!(target = "bdg.daemon", error = %err, "client write failed (socket closed?)");
                continue;
            }
            let _ = write_half.flush().await;
        }
    });

    let mut decoder = JsonlDecoder::new();
    let mut buf = vec![0u8; 8 * 1024];
    loop {
        match read_half.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                for frame in decoder.feed(&buf[..n]) {
                    router::handle_client_frame(&state, &reply_tx, frame).await;
                }
            }
            Err(err) => {
                debug!(target = "bdg.daemon", error = %err, "client read failed");
                break;
            }
        }
    }
}
