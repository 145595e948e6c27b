//! Chrome DevTools Protocol facade.
//!
//! The worker consumes this crate as its typed view of the browser: a
//! WebSocket transport, a request/response correlation layer with event
//! subscription, HTTP probing of the debugging endpoint, and the browser
//! launch contract (a handle exposing `pid` and `kill`).

pub mod connection;
pub mod error;
pub mod http;
pub mod launcher;

pub use connection::{CdpConnection, DisconnectHook};
pub use error::{CdpError, Result};
pub use http::{DebuggerEndpoint, fetch_version, list_targets, pick_page_target};
pub use launcher::{BrowserHandle, LaunchOptions, find_browser_executable, launch_browser};
