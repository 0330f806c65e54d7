use browser_agent_core::Paths;
use chrono::Utc;

/// Who the prompt is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptRole<'a> {
    Main,
    Subagent { subagent_type: &'a str },
}

pub struct ContextBuilder {
    paths: Paths,
}

impl ContextBuilder {
    pub fn new(paths: Paths) -> Self {
        Self { paths }
    }

    fn read_memory(&self, path: &std::path::Path) -> Option<String> {
        std::fs::read_to_string(path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    pub fn build_system_prompt(&self, role: PromptRole<'_>) -> String {
        let mut prompt = String::new();
        match role {
            PromptRole::Main => {
                prompt.push_str("You are a browser automation agent. You drive a real browser through the `browser` tool and finish tasks end to end.\n\n");
            }
            PromptRole::Subagent { subagent_type } => {
                prompt.push_str(&format!(
                    "You are a '{}' sub-agent working on one delegated task. Return a concise result; you cannot delegate further.\n\n",
                    subagent_type
                ));
            }
        }

        if let Some(content) = self.read_memory(&self.paths.agents_md()) {
            prompt.push_str("## Agent Guidelines\n");
            prompt.push_str(&content);
            prompt.push_str("\n\n");
        }
        if let Some(content) = self.read_memory(&self.paths.user_preferences_md()) {
            prompt.push_str("## User Preferences\n");
            prompt.push_str(&content);
            prompt.push_str("\n\n");
        }

        prompt.push_str("## Browser\n");
        prompt.push_str("- Start with `navigate`, then `snapshot` to get element refs like @e1 before clicking or filling.\n");
        prompt.push_str("- Refs go stale after navigation or page changes; take a fresh snapshot.\n");
        prompt.push_str("- Large outputs are saved under /artifacts/tool_outputs; page through them with `read_file`.\n\n");

        prompt.push_str("## Human in the loop\n");
        prompt.push_str("- Never guess credentials; call `request_credentials`.\n");
        prompt.push_str("- Ask `request_confirmation` before purchases, submissions or deletions.\n");
        prompt.push_str("- Use `request_human_guidance` when stuck after trying both DOM and visual approaches.\n\n");

        prompt.push_str("## Planning\n");
        prompt.push_str("- Track multi-step work with `write_todos`; keep one item in_progress.\n");
        if role == PromptRole::Main {
            prompt.push_str("- Use `task` for independent pieces of work; several task calls in one turn run in parallel.\n");
        }
        prompt.push_str("- Save deliverables under /artifacts/file_outputs and show them with `present_file`.\n\n");

        prompt.push_str(&format!("Current time: {}\n", Utc::now().format("%Y-%m-%d %H:%M:%S UTC")));
        prompt.push_str(&format!("Sandbox: {}\n", self.paths.base.display()));
        prompt
    }
}
