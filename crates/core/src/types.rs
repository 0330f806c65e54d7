use serde::{Deserialize, Serialize};
use std::fmt;

const CHILD_SEPARATOR: &str = "--";

/// Identifies one conversation; partitions sessions, state and checkpoints.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First eight characters, used in artifact file names and log lines.
    pub fn short(&self) -> &str {
        match self.0.char_indices().nth(8) {
            Some((idx, _)) => &self.0[..idx],
            None => &self.0,
        }
    }

    /// Thread id for a sub-agent running under this thread. The id reaches
    /// driver arguments and file names, so it stays free of path separators.
    pub fn child(&self, subagent_id: &str) -> ThreadId {
        ThreadId(format!("{}{}{}", self.0, CHILD_SEPARATOR, subagent_id))
    }

    /// This thread or any sub-agent thread below `root`.
    pub fn is_within(&self, root: &ThreadId) -> bool {
        match self.0.strip_prefix(root.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with(CHILD_SEPARATOR),
            None => false,
        }
    }
}

impl fmt::Display for ThreadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ThreadId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ThreadId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for ThreadId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A tool call request that serializes to the OpenAI-compatible format:
/// `{id, type: "function", function: {name, arguments}}` where `arguments`
/// is a JSON-encoded string.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

#[derive(Serialize, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: String,
    #[serde(rename = "type", default = "function_kind")]
    kind: String,
    function: WireFunction,
}

#[derive(Serialize, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: serde_json::Value,
}

fn function_kind() -> String {
    "function".to_string()
}

impl Serialize for ToolCallRequest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        WireToolCall {
            id: self.id.clone(),
            kind: function_kind(),
            function: WireFunction {
                name: self.name.clone(),
                arguments: serde_json::Value::String(self.arguments.to_string()),
            },
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ToolCallRequest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireToolCall::deserialize(deserializer)?;
        // Providers send arguments either as a JSON string or as an object.
        let arguments = match wire.function.arguments {
            serde_json::Value::String(raw) if raw.trim().is_empty() => {
                serde_json::Value::Object(Default::default())
            }
            serde_json::Value::String(raw) => {
                serde_json::from_str(&raw).map_err(serde::de::Error::custom)?
            }
            serde_json::Value::Null => serde_json::Value::Object(Default::default()),
            other => other,
        };
        Ok(ToolCallRequest {
            id: wire.id,
            name: wire.function.name,
            arguments,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LLMResponse {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
    pub finish_reason: String,
    #[serde(default)]
    pub usage: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCallRequest>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    fn with_role(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: content.to_string(),
            tool_calls: None,
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: &str) -> Self {
        Self::with_role("system", content)
    }

    pub fn user(content: &str) -> Self {
        Self::with_role("user", content)
    }

    pub fn assistant(content: &str) -> Self {
        Self::with_role("assistant", content)
    }

    pub fn assistant_with_tools(content: Option<&str>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            tool_calls: Some(tool_calls),
            ..Self::with_role("assistant", content.unwrap_or_default())
        }
    }

    pub fn tool_result(tool_call_id: &str, name: &str, content: &str) -> Self {
        Self {
            tool_call_id: Some(tool_call_id.to_string()),
            name: Some(name.to_string()),
            ..Self::with_role("tool", content)
        }
    }
}
