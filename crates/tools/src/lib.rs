pub mod browser;
pub mod exec;
pub mod fs;
pub mod human_loop;
pub mod present_file;
pub mod registry;
pub mod spawn;
pub mod todos;

use async_trait::async_trait;
use browser_agent_core::{Config, Error, InterruptKind, InterruptRequest, Paths, Result, StateUpdate, ThreadId};
use serde_json::Value;
use std::sync::Arc;

pub use browser::BrowserRuntime;
pub use registry::ToolRegistry;
pub use spawn::{Delegation, DelegationRequest, DelegationResult, SpawnHandle};

/// Truncate a string to at most `max_chars` bytes, respecting UTF-8 char boundaries.
pub fn safe_truncate(s: &str, max_chars: usize) -> &str {
    if s.len() <= max_chars {
        return s;
    }
    let mut end = max_chars;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

pub(crate) fn str_param<'a>(params: &'a Value, name: &str) -> Result<&'a str> {
    params
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Validation(format!("Missing required parameter: {}", name)))
}

pub(crate) fn opt_str_param<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params.get(name).and_then(|v| v.as_str()).filter(|s| !s.is_empty())
}

/// Render a human's answer for the model: strings verbatim, anything else as JSON.
pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Value,
}

/// Result content plus the state changes the call wants recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    pub content: Value,
    pub update: StateUpdate,
}

/// A tool either finishes or asks to be suspended until a human answers.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutcome {
    Completed(ToolOutput),
    Suspended(InterruptRequest),
}

impl ToolOutcome {
    pub fn completed(content: impl Into<Value>) -> Self {
        ToolOutcome::Completed(ToolOutput {
            content: content.into(),
            update: StateUpdate::default(),
        })
    }

    pub fn with_update(content: impl Into<Value>, update: StateUpdate) -> Self {
        ToolOutcome::Completed(ToolOutput {
            content: content.into(),
            update,
        })
    }

    pub fn suspend(kind: InterruptKind, payload: Value) -> Self {
        ToolOutcome::Suspended(InterruptRequest::new(kind, payload))
    }

    pub fn is_suspended(&self) -> bool {
        matches!(self, ToolOutcome::Suspended(_))
    }

    /// Text content of a completed call. Suspended calls have none.
    pub fn content_text(&self) -> Option<String> {
        match self {
            ToolOutcome::Completed(output) => Some(value_text(&output.content)),
            ToolOutcome::Suspended(_) => None,
        }
    }
}

#[derive(Clone)]
pub struct ToolContext {
    pub thread_id: ThreadId,
    pub tool_call_id: String,
    pub paths: Paths,
    pub config: Arc<Config>,
    pub browser: Option<Arc<BrowserRuntime>>,
    pub spawner: Option<Arc<dyn SpawnHandle>>,
    /// Sub-agent id when running under delegation.
    pub owner: Option<String>,
    /// The human's answer when a previously suspended call is re-invoked.
    pub resume: Option<Value>,
}

impl ToolContext {
    pub fn new(thread_id: ThreadId, paths: Paths, config: Arc<Config>) -> Self {
        Self {
            thread_id,
            tool_call_id: String::new(),
            paths,
            config,
            browser: None,
            spawner: None,
            owner: None,
            resume: None,
        }
    }

    pub fn browser(&self) -> Result<&Arc<BrowserRuntime>> {
        self.browser
            .as_ref()
            .ok_or_else(|| Error::Tool("browser runtime is not available".to_string()))
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn schema(&self) -> ToolSchema;
    fn validate(&self, params: &Value) -> Result<()>;
    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome>;
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn context() -> (tempfile::TempDir, ToolContext) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().join(".browser-agent"));
        paths.ensure_dirs().unwrap();
        let ctx = ToolContext::new(ThreadId::from("thread-test-1"), paths, Arc::new(Config::default()));
        (dir, ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_safe_truncate_char_boundary() {
        assert_eq!(safe_truncate("hello", 10), "hello");
        assert_eq!(safe_truncate("héllo", 2), "h");
    }

    #[test]
    fn test_outcome_helpers() {
        let done = ToolOutcome::completed("ok");
        assert_eq!(done.content_text().as_deref(), Some("ok"));
        let waiting = ToolOutcome::suspend(InterruptKind::Approval, json!({"question": "?"}));
        assert!(waiting.is_suspended());
        assert!(waiting.content_text().is_none());
    }
}
