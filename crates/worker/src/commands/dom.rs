//! DOM inspection and capture commands.

use std::path::PathBuf;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::{Value, json};
use tracing::debug;

use bdg_core::{QueryCache, pidfile};
use bdg_protocol::{
    DomGetParams, DomGetResult, DomHighlightParams, DomHighlightResult, DomQueryParams,
    DomQueryResult, DomScreenshotParams, DomScreenshotResult, ImageFormat, NodeDetail, QueryNode,
    Viewport,
};

use crate::commands::CommandContext;
use crate::error::{Result, WorkerError};
use crate::resolve::{Selection, query_selector_all, resolve_nodes};

/// Matches beyond this many still land in the cache, but are returned
/// without per-node detail to bound describe round trips.
const DESCRIBE_CAP: usize = 50;

const PREVIEW_MAX: usize = 120;

pub async fn query(ctx: &CommandContext, params: DomQueryParams) -> Result<DomQueryResult> {
    if params.selector.trim().is_empty() {
        return Err(WorkerError::invalid("selector must not be empty"));
    }

    let node_ids = query_selector_all(&ctx.connection, &params.selector).await?;

    let mut nodes = Vec::with_capacity(node_ids.len());
    for (i, node_id) in node_ids.iter().enumerate() {
        let index = i + 1;
        if i >= DESCRIBE_CAP {
            nodes.push(QueryNode { index, node_id: *node_id, tag: None, classes: None, preview: None });
            continue;
        }
        let described = describe_node(ctx, *node_id).await.unwrap_or_default();
        nodes.push(QueryNode {
            index,
            node_id: *node_id,
            preview: Some(preview_of(&described)),
            tag: described.tag,
            classes: described.classes,
        });
    }

    let navigation = ctx.store.lock().current_navigation_id();
    QueryCache::new(&params.selector, node_ids, navigation).save(&ctx.paths)?;

    Ok(DomQueryResult { selector: params.selector, count: nodes.len(), nodes })
}

pub async fn get(ctx: &CommandContext, params: DomGetParams) -> Result<DomGetResult> {
    let selection = Selection { all: params.all.unwrap_or(false), nth: params.nth };
    let navigation = ctx.store.lock().current_navigation_id();
    let node_ids =
        resolve_nodes(&ctx.connection, &ctx.paths, &params.target, selection, navigation).await?;

    let mut nodes = Vec::with_capacity(node_ids.len());
    for node_id in node_ids {
        let described = describe_node(ctx, node_id).await?;
        let outer = ctx
            .connection
            .send_command("DOM.getOuterHTML", json!({"nodeId": node_id}))
            .await
            .ok()
            .and_then(|r| r["outerHTML"].as_str().map(str::to_string));
        nodes.push(NodeDetail {
            node_id,
            tag: described.tag,
            attributes: described.attributes,
            classes: described.classes,
            outer_html: outer,
        });
    }

    Ok(DomGetResult { nodes })
}

pub async fn highlight(ctx: &CommandContext, params: DomHighlightParams) -> Result<DomHighlightResult> {
    if let Some(opacity) = params.opacity {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(WorkerError::invalid(format!("opacity {opacity} must be between 0 and 1")));
        }
    }

    // A bare selector highlights every match; first/nth collapse to one.
    let narrow = params.first.unwrap_or(false) || params.nth.is_some();
    let selection = Selection { all: !narrow, nth: params.nth };
    let navigation = ctx.store.lock().current_navigation_id();
    let node_ids =
        resolve_nodes(&ctx.connection, &ctx.paths, &params.target, selection, navigation).await?;

    let color = params.color.as_deref().unwrap_or("#ff3333");
    let opacity = params.opacity.unwrap_or(1.0);

    let mut highlighted = 0usize;
    for node_id in &node_ids {
        match apply_outline(ctx, *node_id, color, opacity).await {
            Ok(()) => highlighted += 1,
            Err(err) => {
                debug!(target = "bdg.worker", node_id, error = %err, "highlight failed for node");
            }
        }
    }

    if highlighted == 0 {
        return Err(WorkerError::NotFound("no node could be highlighted".into()));
    }

    Ok(DomHighlightResult { highlighted, node_ids })
}

pub async fn screenshot(ctx: &CommandContext, params: DomScreenshotParams) -> Result<DomScreenshotResult> {
    if params.path.trim().is_empty() {
        return Err(WorkerError::invalid("path must not be empty"));
    }
    let format = params.format.unwrap_or(ImageFormat::Png);
    if let Some(quality) = params.quality {
        if format != ImageFormat::Jpeg {
            return Err(WorkerError::invalid("quality only applies to jpeg format"));
        }
        if quality > 100 {
            return Err(WorkerError::invalid(format!("quality {quality} must be between 0 and 100")));
        }
    }
    let full_page = params.full_page.unwrap_or(true);

    let path = absolutize(&params.path);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let metrics = ctx.connection.send_command("Page.getLayoutMetrics", json!({})).await?;

    let mut capture = json!({
        "format": format.to_string(),
        "captureBeyondViewport": full_page,
    });
    if let Some(quality) = params.quality {
        capture["quality"] = json!(quality);
    }
    let shot = ctx.connection.send_command("Page.captureScreenshot", capture).await?;
    let encoded = shot["data"]
        .as_str()
        .ok_or_else(|| WorkerError::NotFound("browser returned no screenshot data".into()))?;
    let bytes = BASE64
        .decode(encoded)
        .map_err(|err| WorkerError::NotFound(format!("invalid screenshot payload: {err}")))?;

    pidfile::write_atomic(&path, &bytes)?;

    let viewport = viewport_of(&metrics);
    let (width, height) = if full_page {
        (
            metrics["cssContentSize"]["width"].as_f64().unwrap_or(0.0) as u64,
            metrics["cssContentSize"]["height"].as_f64().unwrap_or(0.0) as u64,
        )
    } else {
        viewport.map(|v| (v.width, v.height)).unwrap_or((0, 0))
    };

    Ok(DomScreenshotResult {
        path: path.display().to_string(),
        format,
        quality: params.quality,
        width,
        height,
        size: bytes.len() as u64,
        viewport: (!full_page).then_some(viewport).flatten(),
        full_page,
    })
}

#[derive(Debug, Default)]
struct DescribedNode {
    tag: Option<String>,
    attributes: Option<std::collections::BTreeMap<String, String>>,
    classes: Option<Vec<String>>,
}

async fn describe_node(ctx: &CommandContext, node_id: i64) -> Result<DescribedNode> {
    let result = ctx.connection.send_command("DOM.describeNode", json!({"nodeId": node_id})).await?;
    let node = &result["node"];

    let tag = node["nodeName"].as_str().map(|n| n.to_ascii_lowercase());

    // Attributes arrive as a flat [name, value, name, value, ...] array.
    let attributes = node["attributes"].as_array().map(|flat| {
        flat.chunks_exact(2)
            .filter_map(|pair| {
                Some((pair[0].as_str()?.to_string(), pair[1].as_str().unwrap_or_default().to_string()))
            })
            .collect::<std::collections::BTreeMap<_, _>>()
    });

    let classes = attributes.as_ref().and_then(|attrs| {
        attrs.get("class").map(|c| c.split_whitespace().map(str::to_string).collect::<Vec<_>>())
    });

    Ok(DescribedNode { tag, attributes, classes })
}

fn preview_of(node: &DescribedNode) -> String {
    let tag = node.tag.as_deref().unwrap_or("node");
    let mut preview = format!("<{tag}");
    if let Some(attrs) = &node.attributes {
        if let Some(id) = attrs.get("id") {
            preview.push_str(&format!(" id=\"{id}\""));
        }
        if let Some(class) = attrs.get("class") {
            preview.push_str(&format!(" class=\"{class}\""));
        }
    }
    preview.push('>');
    if preview.len() > PREVIEW_MAX {
        let mut cut = PREVIEW_MAX;
        while !preview.is_char_boundary(cut) {
            cut -= 1;
        }
        preview.truncate(cut);
        preview.push('…');
    }
    preview
}

async fn apply_outline(ctx: &CommandContext, node_id: i64, color: &str, opacity: f64) -> Result<()> {
    let resolved = ctx.connection.send_command("DOM.resolveNode", json!({"nodeId": node_id})).await?;
    let object_id = resolved["object"]["objectId"]
        .as_str()
        .ok_or_else(|| WorkerError::NotFound(format!("node {node_id} could not be resolved")))?;

    ctx.connection
        .send_command(
            "Runtime.callFunctionOn",
            json!({
                "objectId": object_id,
                "functionDeclaration":
                    "function(color, opacity) { this.style.outline = '3px solid ' + color; this.style.opacity = String(opacity); }",
                "arguments": [{"value": color}, {"value": opacity}],
            }),
        )
        .await?;
    Ok(())
}

fn absolutize(path: &str) -> PathBuf {
    let path = PathBuf::from(path);
    if path.is_absolute() {
        path
    } else {
        std::env::current_dir().map(|cwd| cwd.join(&path)).unwrap_or(path)
    }
}

fn viewport_of(metrics: &Value) -> Option<Viewport> {
    let viewport = metrics.get("cssVisualViewport")?;
    Some(Viewport {
        width: viewport["clientWidth"].as_f64()? as u64,
        height: viewport["clientHeight"].as_f64()? as u64,
    })
}
