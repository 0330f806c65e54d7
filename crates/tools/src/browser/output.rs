use browser_agent_core::{Paths, Result, ThreadId};
use chrono::Utc;
use serde_json::json;
use std::fmt;
use std::path::PathBuf;
use tracing::debug;

/// The four-part observation handed back to the model after a browser action.
#[derive(Debug, Clone, PartialEq)]
pub struct BrowserToolOutput {
    pub action: String,
    pub observation: String,
    pub next_step: String,
    pub full_output: Option<String>,
}

impl BrowserToolOutput {
    pub fn new(action: impl Into<String>, observation: impl Into<String>, next_step: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            observation: observation.into(),
            next_step: next_step.into(),
            full_output: None,
        }
    }

    pub fn with_full_output(mut self, full_output: impl Into<String>) -> Self {
        self.full_output = Some(full_output.into());
        self
    }
}

impl fmt::Display for BrowserToolOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Action: {}\nObservation: {}\nNext Step: {}",
            self.action, self.observation, self.next_step
        )?;
        if let Some(full) = &self.full_output {
            write!(f, "\nFull Output: {}", full)?;
        }
        Ok(())
    }
}

/// Moves oversized tool results out of the conversation into artifact files.
#[derive(Debug, Clone)]
pub struct OutputSpill {
    paths: Paths,
    max_chars: usize,
}

impl OutputSpill {
    pub fn new(paths: Paths, max_chars: usize) -> Self {
        Self { paths, max_chars }
    }

    /// Write `content` to `tool_outputs/{kind}_{thread}_{timestamp}.json`.
    pub fn save(&self, content: &str, kind: &str, thread_id: &ThreadId) -> Result<PathBuf> {
        let dir = self.paths.tool_outputs_dir();
        std::fs::create_dir_all(&dir)?;
        let name = format!(
            "{}_{}_{}.json",
            sanitize(kind),
            sanitize(thread_id.short()),
            Utc::now().format("%Y%m%d_%H%M%S")
        );
        let path = dir.join(name);
        let body = json!({
            "tool_type": kind,
            "thread_id": thread_id.as_str(),
            "saved_at": Utc::now().to_rfc3339(),
            "content": content,
        });
        std::fs::write(&path, serde_json::to_string_pretty(&body)?)?;
        debug!(path = %path.display(), bytes = content.len(), "Spilled tool output");
        Ok(path)
    }

    /// Inline when short enough, otherwise a pointer to the saved file.
    pub fn handle(&self, content: &str, kind: &str, thread_id: &ThreadId) -> Result<String> {
        if content.chars().count() <= self.max_chars {
            return Ok(content.to_string());
        }
        let path = self.save(content, kind, thread_id)?;
        Ok(format!(
            "[Output saved to file: {}]\nUse read_file tool to access full content.",
            self.paths.display_relative(&path)
        ))
    }
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_format() {
        let out = BrowserToolOutput::new("Clicked @e1", "Click successful.", "Take browser_snapshot");
        assert_eq!(
            out.to_string(),
            "Action: Clicked @e1\nObservation: Click successful.\nNext Step: Take browser_snapshot"
        );
        let full = out.with_full_output("raw");
        assert!(full.to_string().ends_with("\nFull Output: raw"));
    }

    #[test]
    fn test_short_output_stays_inline() {
        let dir = tempfile::tempdir().unwrap();
        let spill = OutputSpill::new(Paths::with_base(dir.path().to_path_buf()), 1000);
        let t = ThreadId::from("t1");
        assert_eq!(spill.handle("short", "snapshot", &t).unwrap(), "short");
        assert!(!spill.paths.tool_outputs_dir().exists());
    }

    #[test]
    fn test_long_output_is_saved() {
        let dir = tempfile::tempdir().unwrap();
        let spill = OutputSpill::new(Paths::with_base(dir.path().to_path_buf()), 10);
        let t = ThreadId::from("parent-thread").child("sub-1");
        let content = "x".repeat(50);
        let message = spill.handle(&content, "snapshot", &t).unwrap();
        assert!(message.starts_with("[Output saved to file: "));
        assert!(message.ends_with("Use read_file tool to access full content."));

        let entries: Vec<_> = std::fs::read_dir(spill.paths.tool_outputs_dir()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let path = entries[0].as_ref().unwrap().path();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("snapshot_"));
        assert!(!name.contains('/'));
        let saved: serde_json::Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["content"], content);
    }
}
