use browser_agent_core::{Error, Result};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::browser::BrowserTool;
use crate::exec::BashTool;
use crate::fs::{EditFileTool, LsTool, ReadFileTool, WriteFileTool};
use crate::human_loop::{RequestConfirmationTool, RequestCredentialsTool, RequestGuidanceTool};
use crate::present_file::PresentFileTool;
use crate::spawn::TaskTool;
use crate::todos::WriteTodosTool;
use crate::{Tool, ToolContext, ToolOutcome};

#[derive(Clone)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Everything the main agent can call, including delegation.
    pub fn with_defaults() -> Self {
        let mut registry = Self::subagent_defaults();
        registry.register(Arc::new(TaskTool));
        registry
    }

    /// The main agent's tools minus `task`; sub-agents never delegate further.
    pub fn subagent_defaults() -> Self {
        let mut registry = Self::new();

        registry.register(Arc::new(BrowserTool));
        registry.register(Arc::new(BashTool));

        registry.register(Arc::new(ReadFileTool));
        registry.register(Arc::new(WriteFileTool));
        registry.register(Arc::new(EditFileTool));
        registry.register(Arc::new(LsTool));

        registry.register(Arc::new(WriteTodosTool));
        registry.register(Arc::new(PresentFileTool));

        // Human-in-the-loop
        registry.register(Arc::new(RequestGuidanceTool));
        registry.register(Arc::new(RequestCredentialsTool));
        registry.register(Arc::new(RequestConfirmationTool));

        registry
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let schema = tool.schema();
        debug!(name = schema.name, "Registering tool");
        self.tools.insert(schema.name.to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Schemas in the function-calling format, sorted by name so prompts are stable.
    pub fn schemas(&self) -> Vec<Value> {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        names
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|tool| {
                let schema = tool.schema();
                json!({
                    "type": "function",
                    "function": {
                        "name": schema.name,
                        "description": schema.description,
                        "parameters": schema.parameters
                    }
                })
            })
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn execute(&self, name: &str, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let tool = self
            .get(name)
            .ok_or_else(|| Error::Tool(format!("Unknown tool: {}", name)))?;

        if let Err(e) = tool.validate(&params) {
            warn!(tool = name, error = %e, "Tool validation failed");
            return Err(e);
        }

        debug!(tool = name, thread_id = %ctx.thread_id, "Executing tool");
        tool.execute(ctx, params).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
