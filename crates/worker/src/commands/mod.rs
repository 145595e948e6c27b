//! Worker-side command registry.
//!
//! One table from command name to handler; every handler deserializes its
//! typed parameters, validates synchronously before any browser round trip,
//! and returns a typed result. Failures become `success:false` responses at
//! the run-loop layer; they never take the worker down.

pub mod diagnostics;
pub mod dom;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use bdg_cdp::CdpConnection;
use bdg_core::SessionPaths;
use bdg_protocol::CommandName;

use crate::error::{Result, WorkerError};
use crate::telemetry::SharedStore;

/// Everything a handler may touch.
pub struct CommandContext {
    pub connection: CdpConnection,
    pub store: SharedStore,
    pub paths: SessionPaths,
}

fn params<P: DeserializeOwned>(raw: Value) -> Result<P> {
    serde_json::from_value(raw).map_err(|err| WorkerError::invalid(format!("invalid parameters: {err}")))
}

fn to_value<T: Serialize>(value: T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Dispatches one decoded command through the registry.
pub async fn execute(ctx: &CommandContext, name: CommandName, raw: Value) -> Result<Value> {
    match name {
        CommandName::DomQuery => to_value(dom::query(ctx, params(raw)?).await?),
        CommandName::DomGet => to_value(dom::get(ctx, params(raw)?).await?),
        CommandName::DomHighlight => to_value(dom::highlight(ctx, params(raw)?).await?),
        CommandName::DomScreenshot => to_value(dom::screenshot(ctx, params(raw)?).await?),
        CommandName::WorkerPeek => to_value(diagnostics::peek(ctx, params(raw)?)),
        CommandName::WorkerDetails => to_value(diagnostics::details(ctx, params(raw)?)?),
        CommandName::WorkerStatus => to_value(diagnostics::status(ctx)),
        CommandName::CdpCall => diagnostics::cdp_call(ctx, params(raw)?).await,
    }
}
