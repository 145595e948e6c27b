//! Wire types for the bdg client/daemon/worker protocol.
//!
//! This crate contains the serde-serializable types used on both IPC hops
//! (CLI client to daemon over the Unix socket, daemon to worker over child
//! stdio) plus the newline-delimited JSON codec that frames them. These
//! types represent the "protocol layer" - the shapes of data as they appear
//! on the wire.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization and
//!   name/timeout lookups
//! * Stable: Changes only when the wire protocol changes
//!
//! The daemon never interprets command parameters; it routes raw frames by
//! their `type` field and rewrites envelopes. The worker deserializes the
//! typed parameter shapes defined here.

pub mod codec;
pub mod commands;
pub mod envelope;
pub mod output;

pub use codec::*;
pub use commands::*;
pub use envelope::*;
pub use output::*;
