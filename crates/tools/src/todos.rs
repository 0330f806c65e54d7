use async_trait::async_trait;
use browser_agent_core::state::{validate_todos, TodoItem};
use browser_agent_core::{Error, Result, StateUpdate};
use serde_json::{json, Value};

use crate::{Tool, ToolContext, ToolOutcome, ToolSchema};

pub struct WriteTodosTool;

fn parse_todos(params: &Value) -> Result<Vec<TodoItem>> {
    let raw = params
        .get("todos")
        .cloned()
        .ok_or_else(|| Error::Validation("Missing required parameter: todos".to_string()))?;
    serde_json::from_value(raw).map_err(|e| Error::Validation(format!("Invalid todos: {}", e)))
}

#[async_trait]
impl Tool for WriteTodosTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_todos",
            description: "Replace the task plan. Keep exactly one item in_progress while working and mark items completed as soon as they are done.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "todos": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "id": {"type": "string"},
                                "content": {"type": "string"},
                                "status": {"type": "string", "enum": ["pending", "in_progress", "completed"]},
                                "owner": {"type": "string", "description": "Sub-agent id; omit for the main agent"}
                            },
                            "required": ["id", "content", "status"]
                        }
                    }
                },
                "required": ["todos"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        validate_todos(&parse_todos(params)?)
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let mut todos = parse_todos(&params)?;
        if let Some(owner) = &ctx.owner {
            for todo in todos.iter_mut().filter(|t| t.owner.is_none()) {
                todo.owner = Some(owner.clone());
            }
        }
        validate_todos(&todos)?;

        let summary = format!("Updated todo list ({} items)", todos.len());
        Ok(ToolOutcome::with_update(
            summary,
            StateUpdate {
                todos: Some(todos),
                ..Default::default()
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;
    use browser_agent_core::state::TodoStatus;

    #[tokio::test]
    async fn test_replaces_list() {
        let (_dir, ctx) = context();
        let params = json!({"todos": [
            {"id": "1", "content": "Open site", "status": "completed"},
            {"id": "2", "content": "Log in", "status": "in_progress"}
        ]});
        WriteTodosTool.validate(&params).unwrap();
        match WriteTodosTool.execute(ctx, params).await.unwrap() {
            ToolOutcome::Completed(out) => {
                let todos = out.update.todos.unwrap();
                assert_eq!(todos.len(), 2);
                assert_eq!(todos[1].status, TodoStatus::InProgress);
                assert_eq!(out.content, json!("Updated todo list (2 items)"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_rejects_two_in_progress() {
        let params = json!({"todos": [
            {"id": "1", "content": "a", "status": "in_progress"},
            {"id": "2", "content": "b", "status": "in_progress"}
        ]});
        assert!(WriteTodosTool.validate(&params).is_err());
    }

    #[tokio::test]
    async fn test_subagent_owner_defaulted() {
        let (_dir, mut ctx) = context();
        ctx.owner = Some("sub-1".to_string());
        let params = json!({"todos": [{"id": "1", "content": "a", "status": "in_progress"}]});
        match WriteTodosTool.execute(ctx, params).await.unwrap() {
            ToolOutcome::Completed(out) => {
                assert_eq!(out.update.todos.unwrap()[0].owner.as_deref(), Some("sub-1"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }
}
