//! Session state, on-disk layout, and process lifecycle helpers.
//!
//! Everything that touches the per-user session directory lives here:
//! path constants, atomic PID-file writes, the daemon startup lock, the
//! session metadata and query-cache documents, and the cross-platform
//! process liveness/kill primitives the daemon and worker share.

pub mod error;
pub mod lock;
pub mod paths;
pub mod pidfile;
pub mod process;
pub mod session;

pub use error::{Result, StateError};
pub use lock::StartupLock;
pub use paths::SessionPaths;
pub use session::{QueryCache, SessionMetadata};
