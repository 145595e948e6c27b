//! Telemetry queries and the raw CDP passthrough.

use serde_json::{Value, json};

use bdg_protocol::{
    CdpCallParams, ItemType, PEEK_DEFAULT, PEEK_MAX, PeekData, WorkerDetailsParams,
    WorkerPeekParams, WorkerStatusResult,
};

use crate::commands::CommandContext;
use crate::error::{Result, WorkerError};

pub fn peek(ctx: &CommandContext, params: WorkerPeekParams) -> PeekData {
    let n = params.last_n.unwrap_or(PEEK_DEFAULT).min(PEEK_MAX);
    ctx.store.lock().peek(n)
}

/// Full-record lookup. Historical: these never fail for navigation
/// staleness, only for ids that were never captured.
pub fn details(ctx: &CommandContext, params: WorkerDetailsParams) -> Result<Value> {
    let store = ctx.store.lock();
    match params.item_type {
        ItemType::Network => {
            let id = params
                .id
                .as_str()
                .map(str::to_string)
                .or_else(|| params.id.as_u64().map(|n| n.to_string()))
                .ok_or_else(|| WorkerError::invalid("network id must be a request id string"))?;
            let record = store
                .network_detail(&id)
                .ok_or_else(|| WorkerError::NotFound(format!("no network request with id \"{id}\"")))?;
            Ok(json!({ "item": record }))
        }
        ItemType::Console => {
            let total = store.console_len();
            let index = console_index(&params.id).ok_or_else(|| {
                WorkerError::invalid(format!(
                    "console id must be an integer index (0..{})",
                    total.saturating_sub(1)
                ))
            })?;
            let record = store.console_detail(index).ok_or_else(|| {
                WorkerError::NotFound(if total == 0 {
                    "no console messages captured yet".to_string()
                } else {
                    format!("console index {index} out of range (0..{})", total - 1)
                })
            })?;
            Ok(json!({ "item": record }))
        }
    }
}

fn console_index(id: &Value) -> Option<usize> {
    match id {
        Value::Number(n) => n.as_u64().map(|n| n as usize),
        Value::String(s) => s.trim().parse::<usize>().ok(),
        _ => None,
    }
}

pub fn status(ctx: &CommandContext) -> WorkerStatusResult {
    let store = ctx.store.lock();
    WorkerStatusResult {
        start_time: store.start_time(),
        duration: store.duration_ms(),
        target: store.target_info().map(|t| t.summary()).unwrap_or_default(),
        active_telemetry: store.active_telemetry(),
        activity: store.activity(),
    }
}

/// Opaque passthrough to the browser; params default to an empty object.
pub async fn cdp_call(ctx: &CommandContext, params: CdpCallParams) -> Result<Value> {
    if params.method.trim().is_empty() {
        return Err(WorkerError::invalid("method must not be empty"));
    }
    let result = ctx
        .connection
        .send_command(&params.method, params.params.unwrap_or_else(|| json!({})))
        .await?;
    Ok(json!({ "result": result }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::shared_store;
    use bdg_core::SessionPaths;

    fn ctx_with_store() -> (tempfile::TempDir, CommandContext) {
        let dir = tempfile::tempdir().unwrap();
        let (out_tx, _out_rx) = tokio::sync::mpsc::unbounded_channel();
        let (_in_tx, in_rx) = tokio::sync::mpsc::unbounded_channel();
        let ctx = CommandContext {
            connection: bdg_cdp::CdpConnection::from_channels(out_tx, in_rx, None),
            store: shared_store(),
            paths: SessionPaths::with_base(dir.path()),
        };
        (dir, ctx)
    }

    #[tokio::test]
    async fn peek_clamps_at_the_maximum_window() {
        let (_dir, ctx) = ctx_with_store();
        {
            let mut store = ctx.store.lock();
            for i in 0..150 {
                store.network_started(format!("r{i}"), "GET".into(), "https://x".into(), None);
            }
        }
        let data = peek(&ctx, WorkerPeekParams { last_n: Some(5000) });
        assert_eq!(data.network.len(), PEEK_MAX);
        assert_eq!(data.network.first().unwrap().id, "r50");

        let data = peek(&ctx, WorkerPeekParams { last_n: None });
        assert_eq!(data.network.len(), PEEK_DEFAULT);
    }

    #[tokio::test]
    async fn network_details_by_request_id() {
        let (_dir, ctx) = ctx_with_store();
        ctx.store.lock().network_started("req-7".into(), "POST".into(), "https://x/api".into(), None);

        let item = details(
            &ctx,
            WorkerDetailsParams { item_type: ItemType::Network, id: json!("req-7") },
        )
        .unwrap();
        assert_eq!(item["item"]["method"], "POST");

        let err = details(
            &ctx,
            WorkerDetailsParams { item_type: ItemType::Network, id: json!("missing") },
        )
        .unwrap_err();
        assert!(err.to_string().contains("missing"));
    }

    #[tokio::test]
    async fn console_details_validates_the_index() {
        let (_dir, ctx) = ctx_with_store();
        ctx.store.lock().console_message("log".into(), "first".into(), vec![]);
        ctx.store.lock().console_message("warn".into(), "second".into(), vec![]);

        // Numeric and numeric-string ids both resolve.
        let item =
            details(&ctx, WorkerDetailsParams { item_type: ItemType::Console, id: json!(1) }).unwrap();
        assert_eq!(item["item"]["text"], "second");
        let item =
            details(&ctx, WorkerDetailsParams { item_type: ItemType::Console, id: json!("0") }).unwrap();
        assert_eq!(item["item"]["text"], "first");

        let err = details(&ctx, WorkerDetailsParams { item_type: ItemType::Console, id: json!("abc") })
            .unwrap_err();
        assert!(err.to_string().contains("integer index"));

        let err = details(&ctx, WorkerDetailsParams { item_type: ItemType::Console, id: json!(-1) })
            .unwrap_err();
        assert!(err.to_string().contains("integer index"));

        let err = details(&ctx, WorkerDetailsParams { item_type: ItemType::Console, id: json!(9) })
            .unwrap_err();
        assert!(err.to_string().contains("out of range (0..1)"));
    }

    #[tokio::test]
    async fn status_reflects_store_activity() {
        let (_dir, ctx) = ctx_with_store();
        ctx.store.lock().console_message("log".into(), "hello".into(), vec![]);
        let result = status(&ctx);
        assert_eq!(result.activity.console_messages_captured, 1);
        assert_eq!(result.target.url, "");
    }

    #[tokio::test]
    async fn cdp_call_requires_a_method() {
        let (_dir, ctx) = ctx_with_store();
        let err = cdp_call(&ctx, CdpCallParams { method: " ".into(), params: None }).await.unwrap_err();
        assert!(matches!(err, WorkerError::InvalidParams(_)));
    }
}
