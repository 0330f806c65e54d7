//! The `browser` tool: one action per call, each mapped onto a driver verb.

use async_trait::async_trait;
use browser_agent_core::state::BrowserSessionInfo;
use browser_agent_core::{Error, Result, StateUpdate, ThreadId};
use chrono::Local;
use serde_json::{json, Value};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use super::driver::args;
use super::output::BrowserToolOutput;
use super::session::CloseOutcome;
use super::stream::wait_for_stream_ready;
use super::BrowserRuntime;
use crate::{opt_str_param, str_param, Tool, ToolContext, ToolOutcome, ToolSchema};

const ACTIONS: &[&str] = &[
    "navigate",
    "snapshot",
    "click",
    "fill",
    "type",
    "press_key",
    "screenshot",
    "scroll",
    "close",
    "back",
    "forward",
    "reload",
    "get_info",
    "console",
];

const INFO_TYPES: &[&str] = &["text", "html", "value", "attr", "title", "url", "count"];
const STREAM_POLL: Duration = Duration::from_millis(100);
const DEFAULT_SCROLL: i64 = 500;

pub struct BrowserTool;

#[async_trait]
impl Tool for BrowserTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "browser",
            description: "Drive this thread's browser session. Start with 'navigate', then 'snapshot' to list interactive elements with @refs (@e1, @e2...), then act on refs with 'click', 'fill', 'type' or 'press_key'. Refs may change after any page update, so snapshot again before the next interaction.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {
                        "type": "string",
                        "enum": ACTIONS,
                        "description": "navigate=open url; snapshot=list elements; click/fill/type=act on ref; press_key=keyboard key; screenshot=save page image; scroll=up/down/top/bottom; close=end session; back/forward/reload=history; get_info=read text/html/value/attr/title/url/count; console=browser logs"
                    },
                    "url": {"type": "string", "description": "URL for 'navigate'"},
                    "ref": {"type": "string", "description": "Element ref from snapshot, e.g. '@e1'"},
                    "text": {"type": "string", "description": "Text for 'fill' (clears first) or 'type' (appends)"},
                    "key": {"type": "string", "description": "Key for 'press_key', e.g. 'Enter', 'Tab', 'Escape'"},
                    "interactive_only": {"type": "boolean", "description": "Snapshot only interactive elements (default: true)"},
                    "filename": {"type": "string", "description": "Screenshot file name (saved under artifacts/screenshots)"},
                    "direction": {"type": "string", "enum": ["up", "down", "top", "bottom"]},
                    "amount": {"type": "integer", "description": "Scroll pixels for up/down (default: 500)"},
                    "info_type": {"type": "string", "enum": INFO_TYPES, "description": "What 'get_info' returns"}
                },
                "required": ["action"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        let action = str_param(params, "action")?;
        if !ACTIONS.contains(&action) {
            return Err(Error::Validation(format!("Unknown browser action: {}", action)));
        }
        let needs: &[&str] = match action {
            "navigate" => &["url"],
            "click" => &["ref"],
            "fill" | "type" => &["ref", "text"],
            "press_key" => &["key"],
            "scroll" => &["direction"],
            "get_info" => &["info_type"],
            _ => &[],
        };
        for name in needs {
            str_param(params, name)?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let rt = ctx.browser()?.clone();
        let thread = &ctx.thread_id;
        let action = str_param(&params, "action")?;

        let (text, update) = match action {
            "navigate" => navigate(&rt, thread, str_param(&params, "url")?).await,
            "close" => close(&rt, thread).await,
            other => (dispatch(&rt, thread, other, &params).await?, StateUpdate::default()),
        };
        Ok(ToolOutcome::with_update(text, update))
    }
}

async fn navigate(rt: &BrowserRuntime, thread: &ThreadId, url: &str) -> (String, StateUpdate) {
    rt.ensure_reaper();
    rt.janitor().cleanup(false).await;

    let opened = rt.registry().open(thread).await;
    let result = rt.registry().execute(thread, &args(&["open", url]), true).await;
    if !result.success {
        if opened.newly_opened {
            rt.registry().abandon(thread).await;
        }
        return (format!("Failed to navigate: {}", result.error_text()), StateUpdate::default());
    }

    let session = opened.session;
    let stream_url = session.stream_url();
    let ready = wait_for_stream_ready(
        session.stream_port,
        Duration::from_secs(rt.config().stream_ready_timeout_secs),
        STREAM_POLL,
    )
    .await;
    if !ready {
        warn!(thread_id = %thread, port = session.stream_port, "Stream not ready within timeout; navigation succeeded");
    }
    info!(thread_id = %thread.short(), stream_url = %stream_url, "Browser navigated");

    let saved = save_full(
        rt,
        &format!("Navigated to {}\nStream URL: {}\nStream ready: {}", url, stream_url, ready),
        "navigate",
        thread,
    );
    let output = attach(
        BrowserToolOutput::new(
            format!("Navigated to {}", url),
            format!("Page loaded. Browser stream available at {}", stream_url),
            "Take browser_snapshot to see available elements and their @refs",
        ),
        saved,
    );
    let update = StateUpdate {
        browser_session: Some(BrowserSessionInfo {
            session_id: session.session_id,
            stream_url: Some(stream_url),
            is_active: true,
        }),
        ..Default::default()
    };
    (output.to_string(), update)
}

async fn close(rt: &BrowserRuntime, thread: &ThreadId) -> (String, StateUpdate) {
    let text = match rt.close_thread(thread).await {
        CloseOutcome::Closed(result) if result.success => "Browser session closed successfully".to_string(),
        CloseOutcome::Closed(result) => format!("Failed to close browser: {}", result.error_text()),
        CloseOutcome::AlreadyClosed => "Browser session already closed".to_string(),
        CloseOutcome::StillActive => "Browser session still active".to_string(),
    };
    let update = StateUpdate {
        browser_session: Some(BrowserSessionInfo {
            session_id: thread.to_string(),
            stream_url: None,
            is_active: false,
        }),
        ..Default::default()
    };
    (text, update)
}

async fn dispatch(rt: &BrowserRuntime, thread: &ThreadId, action: &str, params: &Value) -> Result<String> {
    let registry = rt.registry();
    let text = match action {
        "snapshot" => {
            let interactive = params.get("interactive_only").and_then(|v| v.as_bool()).unwrap_or(true);
            let mut parts = args(&["snapshot", "--json"]);
            if interactive {
                parts.push("-i".to_string());
            }
            let result = registry.execute(thread, &parts, false).await;
            if !result.success {
                return Ok(format!("Failed to get snapshot: {}", result.error_text()));
            }
            snapshot_output(rt, thread, &result.output)
        }
        "click" => {
            let r = str_param(params, "ref")?;
            let result = registry.execute(thread, &args(&["click", r]), false).await;
            if !result.success {
                return Ok(format!("Failed to click {}: {}", r, result.error_text()));
            }
            let saved = save_full(rt, &result.output, "click", thread);
            attach(
                BrowserToolOutput::new(
                    format!("Clicked {}", r),
                    "Click successful. Page state may have changed.",
                    "Take browser_snapshot to see updated elements (refs may have changed)",
                ),
                saved,
            )
            .to_string()
        }
        "fill" => {
            let (r, text) = (str_param(params, "ref")?, str_param(params, "text")?);
            let result = registry.execute(thread, &args(&["fill", r, text]), false).await;
            if result.success {
                format!("Successfully filled {} with text", r)
            } else {
                format!("Failed to fill {}: {}", r, result.error_text())
            }
        }
        "type" => {
            let (r, text) = (str_param(params, "ref")?, str_param(params, "text")?);
            let result = registry.execute(thread, &args(&["type", r, text]), false).await;
            if result.success {
                format!("Successfully typed into {}", r)
            } else {
                format!("Failed to type into {}: {}", r, result.error_text())
            }
        }
        "press_key" => {
            let key = str_param(params, "key")?;
            let result = registry.execute(thread, &args(&["press", key]), false).await;
            if result.success {
                format!("Successfully pressed {}", key)
            } else {
                format!("Failed to press {}: {}", key, result.error_text())
            }
        }
        "screenshot" => screenshot(rt, thread, opt_str_param(params, "filename")).await?,
        "scroll" => {
            let direction = str_param(params, "direction")?;
            let amount = params.get("amount").and_then(|v| v.as_i64()).unwrap_or(DEFAULT_SCROLL);
            scroll(rt, thread, direction, amount).await
        }
        "back" | "forward" | "reload" => {
            let result = registry.execute(thread, &args(&[action]), false).await;
            match (action, result.success) {
                ("back", true) => "Successfully navigated back in browser history".to_string(),
                ("forward", true) => "Successfully navigated forward in browser history".to_string(),
                ("reload", true) => "Successfully reloaded the page".to_string(),
                ("back", false) => format!("Failed to navigate back: {}", result.error_text()),
                ("forward", false) => format!("Failed to navigate forward: {}", result.error_text()),
                _ => format!("Failed to reload page: {}", result.error_text()),
            }
        }
        "get_info" => {
            let info_type = str_param(params, "info_type")?;
            let mut parts = args(&["get", info_type]);
            if let Some(r) = opt_str_param(params, "ref") {
                parts.push(r.to_string());
            }
            let result = registry.execute(thread, &parts, false).await;
            if !result.success {
                return Ok(format!("Failed to get {}: {}", info_type, result.error_text()));
            }
            rt.spill()
                .handle(result.output.trim(), &format!("get_{}", info_type), thread)?
        }
        "console" => {
            let result = registry.execute(thread, &args(&["console"]), false).await;
            if !result.success {
                return Ok(format!("Failed to get console logs: {}", result.error_text()));
            }
            rt.spill()
                .handle(&format!("Console logs:\n{}", result.output), "console", thread)?
        }
        other => return Err(Error::Validation(format!("Unknown browser action: {}", other))),
    };
    Ok(text)
}

fn snapshot_output(rt: &BrowserRuntime, thread: &ThreadId, raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(data) => {
            let count = match &data {
                Value::Array(items) => items.len().to_string(),
                _ => "unknown".to_string(),
            };
            let pretty = serde_json::to_string_pretty(&data).unwrap_or_else(|_| raw.to_string());
            let saved = save_full(rt, &pretty, "snapshot", thread);
            attach(
                BrowserToolOutput::new(
                    "Captured DOM snapshot",
                    format!("Found {} interactive elements. Elements have @refs like @e1, @e2.", count),
                    "Use @refs to interact: click @e1, fill @e2 with text",
                ),
                saved,
            )
            .to_string()
        }
        Err(_) => {
            let saved = save_full(rt, raw, "snapshot", thread);
            attach(
                BrowserToolOutput::new(
                    "Captured DOM snapshot",
                    "Snapshot captured but not in JSON format",
                    "Use read_file to examine full snapshot content",
                ),
                saved,
            )
            .to_string()
        }
    }
}

async fn screenshot(rt: &BrowserRuntime, thread: &ThreadId, filename: Option<&str>) -> Result<String> {
    let dir = rt.paths().screenshots_dir();
    std::fs::create_dir_all(&dir)?;
    let name = screenshot_name(filename);
    let path = dir.join(&name);
    let path_text = path.display().to_string();

    let result = rt
        .registry()
        .execute(thread, &args(&["screenshot", &path_text]), false)
        .await;
    Ok(if result.success {
        format!("Screenshot saved to {}", path_text)
    } else {
        format!("Failed to take screenshot: {}", result.error_text())
    })
}

/// File name component only, `.png` forced.
fn screenshot_name(filename: Option<&str>) -> String {
    let base = filename
        .and_then(|f| Path::new(f).file_name())
        .and_then(|f| f.to_str())
        .filter(|f| !f.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("screenshot_{}.png", Local::now().format("%Y%m%d_%H%M%S")));
    if base.ends_with(".png") {
        base
    } else {
        format!("{}.png", base)
    }
}

async fn scroll(rt: &BrowserRuntime, thread: &ThreadId, direction: &str, amount: i64) -> String {
    let script = match direction {
        "top" => "window.scrollTo(0, 0)".to_string(),
        "bottom" => "window.scrollTo(0, document.body.scrollHeight)".to_string(),
        "down" => format!("window.scrollBy(0, {})", amount),
        "up" => format!("window.scrollBy(0, -{})", amount),
        other => return format!("Invalid direction: {}. Use: up, down, top, bottom", other),
    };
    let result = rt.registry().execute(thread, &args(&["eval", &script]), false).await;
    if !result.success {
        return format!("Failed to scroll: {}", result.error_text());
    }

    let body = if result.output.is_empty() {
        format!("Scrolled {}", direction)
    } else {
        result.output.clone()
    };
    let saved = save_full(rt, &body, "scroll", thread);
    let action = match direction {
        "up" | "down" => format!("Scrolled {} {}px", direction, amount),
        _ => format!("Scrolled {}", direction),
    };
    attach(
        BrowserToolOutput::new(
            action,
            "Page scrolled successfully. New content may have loaded.",
            "Take browser_snapshot to see newly visible elements",
        ),
        saved,
    )
    .to_string()
}

fn save_full(rt: &BrowserRuntime, content: &str, kind: &str, thread: &ThreadId) -> Option<String> {
    match rt.spill().save(content, kind, thread) {
        Ok(path) => Some(rt.paths().display_relative(&path)),
        Err(e) => {
            warn!(error = %e, kind, "Failed to save full browser output");
            None
        }
    }
}

fn attach(output: BrowserToolOutput, saved: Option<String>) -> BrowserToolOutput {
    match saved {
        Some(path) => output.with_full_output(path),
        None => output,
    }
}
