//! The bdg daemon.
//!
//! One long-lived process per user: it owns the Unix socket, accepts
//! short-lived CLI clients, answers local requests (handshake, status,
//! peek, session start/stop), and forwards everything else to the worker
//! child, correlating responses by request id with per-request deadlines.

pub mod error;
pub mod handlers;
pub mod pending;
pub mod router;
pub mod server;
pub mod worker;

pub use error::{DaemonError, Result};
pub use server::{Daemon, DaemonConfig};
