use async_trait::async_trait;
use browser_agent_core::state::{SubagentState, SubagentStatus};
use browser_agent_core::{Error, PendingInterrupt, Result, StateUpdate, ThreadId};
use serde_json::{json, Value};

use crate::{str_param, Tool, ToolContext, ToolOutcome, ToolSchema};

#[derive(Debug, Clone, PartialEq)]
pub struct DelegationRequest {
    pub subagent_type: String,
    pub description: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DelegationResult {
    Completed(String),
    /// The child suspended; the interrupt has been forwarded to the parent thread.
    WaitingForHuman(PendingInterrupt),
    Failed(String),
}

/// What a delegated run hands back to the parent.
#[derive(Debug, Clone, PartialEq)]
pub struct Delegation {
    pub status: SubagentStatus,
    pub result: DelegationResult,
}

impl Delegation {
    pub fn message(&self) -> String {
        match &self.result {
            DelegationResult::Completed(text) => text.clone(),
            DelegationResult::WaitingForHuman(pi) => format!(
                "Subagent '{}' needs human assistance: {}",
                pi.origin_name,
                pi.question()
            ),
            DelegationResult::Failed(error) => {
                format!("Subagent '{}' failed: {}", self.status.subagent_type, error)
            }
        }
    }

    /// Status entry plus, for a waiting child, the forwarded interrupt.
    pub fn into_update(self) -> StateUpdate {
        let mut update = StateUpdate::subagent(self.status);
        if let DelegationResult::WaitingForHuman(pi) = self.result {
            update.pending_interrupts.push(pi);
        }
        update
    }
}

/// Runs delegated work on a child thread of `parent`.
#[async_trait]
pub trait SpawnHandle: Send + Sync {
    async fn delegate(&self, parent: &ThreadId, request: DelegationRequest) -> Result<Delegation>;

    /// Continue a child that was waiting for a human, feeding it `value`.
    async fn resume(&self, parent: &ThreadId, status: SubagentStatus, value: Value) -> Result<Delegation>;
}

pub struct TaskTool;

#[async_trait]
impl Tool for TaskTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "task",
            description: "Delegate a self-contained piece of work to a sub-agent with its own context. Several task calls in one turn run in parallel. The sub-agent cannot delegate further.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "description": {
                        "type": "string",
                        "description": "Full instructions for the sub-agent, including what to return"
                    },
                    "subagent_type": {
                        "type": "string",
                        "description": "Label for the sub-agent, e.g. 'research' or 'form-filler'"
                    }
                },
                "required": ["description", "subagent_type"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        if str_param(params, "description")?.trim().is_empty() {
            return Err(Error::Validation("description must not be empty".to_string()));
        }
        str_param(params, "subagent_type")?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let spawner = ctx
            .spawner
            .as_ref()
            .ok_or_else(|| Error::Tool("Sub-agent delegation is not available here".to_string()))?;
        let request = DelegationRequest {
            subagent_type: str_param(&params, "subagent_type")?.to_string(),
            description: str_param(&params, "description")?.to_string(),
        };

        let delegation = spawner.delegate(&ctx.thread_id, request).await?;
        let message = delegation.message();
        Ok(ToolOutcome::with_update(message, delegation.into_update()))
    }
}
