use async_trait::async_trait;
use browser_agent_core::{Error, Result, StateUpdate};
use serde_json::{json, Value};

use crate::{str_param, Tool, ToolContext, ToolOutcome, ToolSchema};

const DEFAULT_READ_LIMIT: usize = 2000;

// ============ read_file ============

pub struct ReadFileTool;

#[async_trait]
impl Tool for ReadFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "read_file",
            description: "Read a text file from the sandbox. Returns numbered lines; use offset/limit to page through large files such as saved snapshots.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {
                        "type": "string",
                        "description": "Sandbox path, e.g. '/artifacts/tool_outputs/snapshot_x.json'"
                    },
                    "offset": {
                        "type": "integer",
                        "description": "Zero-based line to start at (default: 0)"
                    },
                    "limit": {
                        "type": "integer",
                        "description": "Maximum lines to return (default: 2000)"
                    }
                },
                "required": ["file_path"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        str_param(params, "file_path")?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let requested = str_param(&params, "file_path")?;
        let path = ctx.paths.resolve(requested)?;
        if !path.is_file() {
            return Err(Error::NotFound(format!("File not found: {}", requested)));
        }

        let offset = params.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = params
            .get("limit")
            .and_then(|v| v.as_u64())
            .map(|l| l as usize)
            .unwrap_or(DEFAULT_READ_LIMIT);

        let content = tokio::fs::read_to_string(&path).await?;
        let total = content.lines().count();
        let numbered: Vec<String> = content
            .lines()
            .enumerate()
            .skip(offset)
            .take(limit)
            .map(|(i, line)| format!("{:>6}\t{}", i + 1, line))
            .collect();

        Ok(ToolOutcome::completed(json!({
            "path": ctx.paths.display_relative(&path),
            "total_lines": total,
            "content": numbered.join("\n"),
        })))
    }
}

// ============ write_file ============

pub struct WriteFileTool;

#[async_trait]
impl Tool for WriteFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "write_file",
            description: "Write a file in the sandbox, creating parent directories. Put deliverables under /artifacts/file_outputs.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Sandbox path to write"},
                    "content": {"type": "string", "description": "Full file content"}
                },
                "required": ["file_path", "content"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        str_param(params, "file_path")?;
        str_param(params, "content")?;
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let content = str_param(&params, "content")?;
        let path = ctx.paths.resolve(str_param(&params, "file_path")?)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;

        let shown = ctx.paths.display_relative(&path);
        Ok(ToolOutcome::with_update(
            json!({"path": shown, "bytes_written": content.len()}),
            StateUpdate::file(&shown, content),
        ))
    }
}

// ============ edit_file ============

pub struct EditFileTool;

#[async_trait]
impl Tool for EditFileTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "edit_file",
            description: "Replace old_string with new_string in a sandbox file. old_string must match exactly and be unique unless replace_all is set.",
            parameters: json!({
                "type": "object",
                "properties": {
                    "file_path": {"type": "string", "description": "Sandbox path to edit"},
                    "old_string": {"type": "string", "description": "Exact text to find"},
                    "new_string": {"type": "string", "description": "Replacement text"},
                    "replace_all": {"type": "boolean", "description": "Replace every occurrence (default: false)"}
                },
                "required": ["file_path", "old_string", "new_string"]
            }),
        }
    }

    fn validate(&self, params: &Value) -> Result<()> {
        str_param(params, "file_path")?;
        let old = str_param(params, "old_string")?;
        str_param(params, "new_string")?;
        if old.is_empty() {
            return Err(Error::Validation("old_string must not be empty".to_string()));
        }
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let requested = str_param(&params, "file_path")?;
        let old = str_param(&params, "old_string")?;
        let new = str_param(&params, "new_string")?;
        let replace_all = params.get("replace_all").and_then(|v| v.as_bool()).unwrap_or(false);

        let path = ctx.paths.resolve(requested)?;
        if !path.is_file() {
            return Err(Error::NotFound(format!("File not found: {}", requested)));
        }
        let content = tokio::fs::read_to_string(&path).await?;

        let count = content.matches(old).count();
        if count == 0 {
            return Err(Error::Tool(format!("old_string not found in file: {}", requested)));
        }
        if count > 1 && !replace_all {
            return Err(Error::Tool(format!(
                "old_string appears {} times in file. Must be unique or set replace_all.",
                count
            )));
        }

        let updated = if replace_all {
            content.replace(old, new)
        } else {
            content.replacen(old, new, 1)
        };
        tokio::fs::write(&path, &updated).await?;

        let shown = ctx.paths.display_relative(&path);
        Ok(ToolOutcome::with_update(
            json!({"path": shown, "replacements": if replace_all { count } else { 1 }}),
            StateUpdate::file(&shown, &updated),
        ))
    }
}

// ============ ls ============

pub struct LsTool;

#[async_trait]
impl Tool for LsTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "ls",
            description: "List a sandbox directory (defaults to the sandbox root).",
            parameters: json!({
                "type": "object",
                "properties": {
                    "path": {"type": "string", "description": "Sandbox directory, e.g. '/artifacts'"}
                },
                "required": []
            }),
        }
    }

    fn validate(&self, _params: &Value) -> Result<()> {
        Ok(())
    }

    async fn execute(&self, ctx: ToolContext, params: Value) -> Result<ToolOutcome> {
        let requested = params.get("path").and_then(|v| v.as_str()).unwrap_or("/");
        let path = ctx.paths.resolve(requested)?;
        if !path.is_dir() {
            return Err(Error::NotFound(format!("Directory not found: {}", requested)));
        }

        let mut entries = Vec::new();
        let mut read_dir = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            let kind = if file_type.is_dir() {
                "directory"
            } else if file_type.is_file() {
                "file"
            } else {
                "other"
            };
            entries.push((entry.file_name().to_string_lossy().to_string(), kind));
        }
        entries.sort();

        let entries: Vec<Value> = entries
            .into_iter()
            .map(|(name, kind)| json!({"name": name, "type": kind}))
            .collect();
        Ok(ToolOutcome::completed(json!({
            "path": ctx.paths.display_relative(&path),
            "entries": entries,
        })))
    }
}
