//! Tools that stop the run until a human answers.
//!
//! Each tool is called twice: the first call returns `Suspended` with the
//! question, and the runtime re-invokes it with `ctx.resume` set once the
//! human has responded.

use async_trait::async_trait;
use browser_agent_core::{InterruptKind, Result};
use serde_json::{json, Value};
use tracing::info;

use crate::{opt_str_param, str_param, value_text, Tool, ToolContext, ToolOutcome, ToolSchema};

pub const CONFIRMATION_OPTIONS: [&str; 3] = ["Proceed", "Cancel", "Suggest alternative"];

pub struct RequestGuidanceTool;

#[async_trait]
impl Tool for RequestGuidanceTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "request_human_guidance",
            description: "Ask a human for guidance when both DOM and visual approaches have failed, intent is unclear, or the page behaves unexpectedly. The run pauses until the human answers.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "context": {"type": "string", "description": "Current situation and goal"},
                    "question": {"type": "string", "description": "Specific question for the human"},
                    "attempted_approaches": {"type": "string", "description": "What has already been tried"}
                },
                "required": ["context", "question", "attempted_approaches"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        for name in ["context", "question", "attempted_approaches"] {
            str_param(params, name)?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        if let Some(answer) = ctx.resume {
            return Ok(ToolOutcome::completed(format!("Human guidance: {}", value_text(&answer))));
        }
        let context = format!(
            "{}\n\nAttempted approaches:\n{}",
            str_param(&params, "context")?,
            str_param(&params, "attempted_approaches")?
        );
        info!(thread_id = %ctx.thread_id, "Requesting human guidance");
        Ok(ToolOutcome::suspend(
            InterruptKind::Guidance,
            json!({
                "question": str_param(&params, "question")?,
                "context": context,
            }),
        ))
    }
}

pub struct RequestCredentialsTool;

#[async_trait]
impl Tool for RequestCredentialsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "request_credentials",
            description: "Ask the human for login credentials for a service. Never guess or invent credentials. The run pauses until they are provided.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "service": {"type": "string", "description": "Service name, e.g. 'LinkedIn'"},
                    "credential_types": {"type": "string", "description": "What is needed, e.g. 'username and password' or '2FA code'"},
                    "reason": {"type": "string", "description": "Why the credentials are needed"}
                },
                "required": ["service", "credential_types", "reason"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        for name in ["service", "credential_types", "reason"] {
            str_param(params, name)?;
        }
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let service = str_param(&params, "service")?;
        if let Some(credentials) = ctx.resume {
            info!(thread_id = %ctx.thread_id, service, "Credentials received");
            return Ok(ToolOutcome::completed(json!({
                "service": service,
                "credentials": credentials,
            })));
        }
        let types = str_param(&params, "credential_types")?;
        info!(thread_id = %ctx.thread_id, service, "Requesting credentials");
        Ok(ToolOutcome::suspend(
            InterruptKind::Credentials,
            json!({
                "service": service,
                "reason": str_param(&params, "reason")?,
                "credential_types": types,
                "question": format!("Please provide {} for {}", types, service),
            }),
        ))
    }
}

pub struct RequestConfirmationTool;

#[async_trait]
impl Tool for RequestConfirmationTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "request_confirmation",
            description: "Ask the human to confirm a risky or irreversible action (payments, deletions, sending messages) before doing it.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "action": {"type": "string", "description": "The action about to be taken"},
                    "risks": {"type": "string", "description": "Consequences if it goes wrong"},
                    "alternatives": {"type": "string", "description": "Other options, if any"}
                },
                "required": ["action", "risks"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        str_param(params, "action")?;
        str_param(params, "risks")?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let action = str_param(&params, "action")?;
        if let Some(decision) = ctx.resume {
            return Ok(ToolOutcome::completed(format!(
                "Human decision on '{}': {}",
                action,
                value_text(&decision)
            )));
        }
        let alternatives = opt_str_param(&params, "alternatives").unwrap_or("None");
        Ok(ToolOutcome::suspend(
            InterruptKind::Confirmation,
            json!({
                "action": action,
                "risks": str_param(&params, "risks")?,
                "alternatives": alternatives,
                "options": CONFIRMATION_OPTIONS,
                "question": format!("Should I proceed with: {}", action),
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;

    fn suspended(outcome: ToolOutcome) -> browser_agent_core::InterruptRequest {
        match outcome {
            ToolOutcome::Suspended(request) => request,
            other => panic!("expected suspension, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_guidance_suspends_then_completes() {
        let (_dir, mut ctx) = context();
        let params = json!({
            "context": "Logging in",
            "question": "Where is the login button?",
            "attempted_approaches": "snapshot -i, searched 'Sign In'"
        });
        let tool = RequestGuidanceTool;
        tool.validate(&params).unwrap();

        let request = suspended(tool.execute(ctx.clone(), params.clone()).await.unwrap());
        assert_eq!(request.kind, InterruptKind::Guidance);
        assert_eq!(request.question(), "Where is the login button?");
        assert_eq!(
            request.payload["context"],
            "Logging in\n\nAttempted approaches:\nsnapshot -i, searched 'Sign In'"
        );

        ctx.resume = Some(json!("top right corner"));
        let done = tool.execute(ctx, params).await.unwrap();
        assert_eq!(done.content_text().as_deref(), Some("Human guidance: top right corner"));
    }

    #[tokio::test]
    async fn test_credentials_question_and_resume() {
        let (_dir, mut ctx) = context();
        let params = json!({
            "service": "LinkedIn",
            "credential_types": "username and password",
            "reason": "check messages"
        });
        let request = suspended(RequestCredentialsTool.execute(ctx.clone(), params.clone()).await.unwrap());
        assert_eq!(request.kind, InterruptKind::Credentials);
        assert_eq!(request.question(), "Please provide username and password for LinkedIn");
        assert_eq!(request.payload["service"], "LinkedIn");

        ctx.resume = Some(json!({"username": "alice", "password": "pw"}));
        match RequestCredentialsTool.execute(ctx, params).await.unwrap() {
            ToolOutcome::Completed(out) => {
                assert_eq!(out.content["service"], "LinkedIn");
                assert_eq!(out.content["credentials"]["username"], "alice");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_confirmation_defaults_and_options() {
        let (_dir, ctx) = context();
        let params = json!({"action": "Submit payment of $500", "risks": "Charges the card"});
        let request = suspended(RequestConfirmationTool.execute(ctx, params).await.unwrap());
        assert_eq!(request.kind, InterruptKind::Confirmation);
        assert_eq!(request.payload["alternatives"], "None");
        assert_eq!(request.payload["options"], json!(["Proceed", "Cancel", "Suggest alternative"]));
    }

    #[test]
    fn test_validation() {
        assert!(RequestCredentialsTool.validate(&json!({"service": "x"})).is_err());
        assert!(RequestConfirmationTool.validate(&json!({"action": "a", "risks": "r"})).is_ok());
        assert!(RequestGuidanceTool.validate(&json!({"question": "q"})).is_err());
    }
}
