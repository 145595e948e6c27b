//! Uniform element-reference resolution for DOM commands.
//!
//! Precedence is fixed: an explicit `nodeId` wins, then a 1-based `index`
//! into the persisted query cache, then a CSS selector evaluated live.
//! Historical telemetry lookups never come through here; only live-DOM
//! references can fail for staleness.

use serde_json::json;

use bdg_cdp::CdpConnection;
use bdg_core::{QueryCache, SessionPaths};
use bdg_protocol::NodeRef;

use crate::error::{Result, WorkerError};

/// How a multi-match selector collapses to the final node set.
#[derive(Debug, Clone, Copy, Default)]
pub struct Selection {
    /// Keep every match instead of collapsing to one.
    pub all: bool,
    /// 1-based pick among the matches; `first` is the default.
    pub nth: Option<i64>,
}

pub async fn resolve_nodes(
    connection: &CdpConnection,
    paths: &SessionPaths,
    target: &NodeRef,
    selection: Selection,
    current_navigation: u64,
) -> Result<Vec<i64>> {
    if let Some(node_id) = target.node_id {
        return Ok(vec![node_id]);
    }

    if let Some(index) = target.index {
        let cache = QueryCache::load(paths).ok_or_else(|| {
            WorkerError::CacheMiss("no cached query result; run dom_query first".into())
        })?;
        // Node ids from an earlier page load are dead handles.
        if cache.navigation_id != current_navigation {
            return Err(WorkerError::CacheMiss(format!(
                "cached query for \"{}\" is stale (the page has navigated since); run dom_query again",
                cache.selector
            )));
        }
        let node_id = cache.node_at(index).ok_or_else(|| {
            WorkerError::invalid(format!(
                "index {index} is out of range; the last query ({}) matched {} node(s)",
                cache.selector,
                cache.node_ids.len()
            ))
        })?;
        return Ok(vec![node_id]);
    }

    let Some(selector) = target.selector.as_deref() else {
        return Err(WorkerError::invalid("one of nodeId, index, or selector is required"));
    };

    let matches = query_selector_all(connection, selector).await?;
    if matches.is_empty() {
        return Err(WorkerError::NoMatch(selector.to_string()));
    }

    if selection.all {
        return Ok(matches);
    }

    match selection.nth {
        Some(nth) => {
            if nth < 1 || nth as usize > matches.len() {
                return Err(WorkerError::invalid(format!(
                    "nth {nth} is out of range; selector \"{selector}\" matched {} node(s)",
                    matches.len()
                )));
            }
            Ok(vec![matches[(nth - 1) as usize]])
        }
        None => Ok(vec![matches[0]]),
    }
}

/// Runs `selector` against the current document root.
pub async fn query_selector_all(connection: &CdpConnection, selector: &str) -> Result<Vec<i64>> {
    let document = connection.send_command("DOM.getDocument", json!({"depth": 0})).await?;
    let root = document["root"]["nodeId"]
        .as_i64()
        .ok_or_else(|| WorkerError::invalid("browser returned no document root".to_string()))?;

    let result = connection
        .send_command("DOM.querySelectorAll", json!({"nodeId": root, "selector": selector}))
        .await?;

    Ok(result["nodeIds"]
        .as_array()
        .map(|ids| ids.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default())
}
