//! The bdg worker runtime.
//!
//! The worker is the process that owns the browser: it launches or attaches
//! to a debugging endpoint, activates telemetry collectors before the first
//! navigation, reads JSONL command requests from stdin, and emits responses
//! on stdout. Its stderr carries logs; stdout is protocol-only.

pub mod cleanup;
pub mod commands;
pub mod config;
pub mod error;
pub mod resolve;
pub mod runtime;
pub mod telemetry;

pub use config::WorkerConfig;
pub use error::{Result, WorkerError};
pub use runtime::run;
