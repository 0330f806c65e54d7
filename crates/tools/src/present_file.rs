use async_trait::async_trait;
use browser_agent_core::state::PresentedFile;
use browser_agent_core::{Result, StateUpdate};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::{opt_str_param, str_param, Tool, ToolContext, ToolOutcome, ToolSchema};

/// Surfaces a finished file to the user as a download card.
pub struct PresentFileTool;

#[async_trait]
impl Tool for PresentFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "present_file",
            description: "Show a file you created to the user as a downloadable card. Use for final deliverables, usually under /artifacts/file_outputs.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Sandbox path of the file"},
                    "display_name": {"type": "string", "description": "Name shown on the card"},
                    "description": {"type": "string", "description": "One-line summary of the contents"}
                },
                "required": ["file_path", "display_name"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        str_param(params, "file_path")?;
        str_param(params, "display_name")?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let file_path = str_param(&params, "file_path")?;
        let display_name = str_param(&params, "display_name")?;

        let path = ctx.paths.resolve(file_path)?;
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(m) if m.is_file() => m,
            _ => return Ok(ToolOutcome::completed(format!("Error: File not found at {}", file_path))),
        };

        let file_type = PresentedFile::file_type_for(file_path);
        let presented = PresentedFile {
            id: Uuid::new_v4(),
            file_path: file_path.to_string(),
            display_name: display_name.to_string(),
            description: opt_str_param(&params, "description").map(str::to_string),
            file_type: file_type.to_string(),
            file_size: metadata.len(),
            presented_at: Utc::now(),
            tool_call_id: ctx.tool_call_id.clone(),
        };
        info!(thread_id = %ctx.thread_id, file = %file_path, "Presenting file");

        let message = format!(
            "Presented file '{}' ({}, {} bytes) to user",
            display_name,
            file_type,
            metadata.len()
        );
        Ok(ToolOutcome::with_update(
            message,
            StateUpdate {
                presented_files: vec![presented],
                ..Default::default()
            },
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::context;

    #[tokio::test]
    async fn test_presents_existing_file() {
        let (_dir, mut ctx) = context();
        ctx.tool_call_id = "call_9".to_string();
        std::fs::write(ctx.paths.file_outputs_dir().join("summary.pdf"), b"%PDF-1.4 fake").unwrap();

        let params = json!({
            "file_path": "/artifacts/file_outputs/summary.pdf",
            "display_name": "Job Summary",
            "description": "Open roles"
        });
        match PresentFileTool.execute(ctx, params).await.unwrap() {
            ToolOutcome::Completed(out) => {
                assert_eq!(out.content, json!("Presented file 'Job Summary' (PDF, 13 bytes) to user"));
                let card = &out.update.presented_files[0];
                assert_eq!(card.file_type, "PDF");
                assert_eq!(card.file_size, 13);
                assert_eq!(card.tool_call_id, "call_9");
                assert_eq!(card.description.as_deref(), Some("Open roles"));
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_file_message() {
        let (_dir, ctx) = context();
        let out = PresentFileTool
            .execute(ctx, json!({"file_path": "/artifacts/nope.md", "display_name": "Nope"}))
            .await
            .unwrap();
        assert_eq!(out.content_text().as_deref(), Some("Error: File not found at /artifacts/nope.md"));
    }
}
