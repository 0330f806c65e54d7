//! Per-thread agent state and the reducers that fold partial updates into it.
//!
//! Each field has one merge rule:
//! - append-only lists (`messages`, `presented_files`, `pending_interrupts`)
//!   concatenate, with an absent partial treated as empty;
//! - keyed maps (`files`, `active_subagents`) take the partial's value per key;
//! - scalars (`thread_id`, `current_thought`, `browser_session`, `todos`) take
//!   the partial when it is present.
//!
//! The reducers never deduplicate. Applying the same partial twice appends
//! its list entries twice.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::interrupt::{InterruptStatus, PendingInterrupt};
use crate::types::{ChatMessage, ThreadId, ToolCallRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    /// Sub-agent working the item. `None` means the main agent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// At most one `in_progress` item per owner.
pub fn validate_todos(todos: &[TodoItem]) -> Result<()> {
    let mut in_progress: HashMap<Option<&str>, &str> = HashMap::new();
    let mut seen = std::collections::HashSet::new();
    for todo in todos {
        if !seen.insert(todo.id.as_str()) {
            return Err(Error::Validation(format!("duplicate todo id: {}", todo.id)));
        }
        if todo.status != TodoStatus::InProgress {
            continue;
        }
        if let Some(other) = in_progress.insert(todo.owner.as_deref(), todo.id.as_str()) {
            return Err(Error::Validation(format!(
                "todos {} and {} are both in_progress for {}",
                other,
                todo.id,
                todo.owner.as_deref().unwrap_or("the main agent")
            )));
        }
    }
    Ok(())
}

const FILE_TYPES: &[(&str, &str)] = &[
    ("pdf", "PDF"),
    ("docx", "DOCX"),
    ("doc", "DOC"),
    ("pptx", "PPTX"),
    ("ppt", "PPT"),
    ("xlsx", "XLSX"),
    ("xls", "XLS"),
    ("md", "Markdown"),
    ("txt", "Text"),
    ("json", "JSON"),
    ("csv", "CSV"),
    ("png", "PNG"),
    ("jpg", "JPEG"),
    ("jpeg", "JPEG"),
    ("gif", "GIF"),
    ("svg", "SVG"),
    ("webp", "WEBP"),
    ("html", "HTML"),
];

/// A file surfaced to the user as a downloadable card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresentedFile {
    pub id: Uuid,
    pub file_path: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub file_type: String,
    pub file_size: u64,
    pub presented_at: DateTime<Utc>,
    pub tool_call_id: String,
}

impl PresentedFile {
    pub fn file_type_for(path: &str) -> &'static str {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        ext.and_then(|ext| {
            FILE_TYPES
                .iter()
                .find(|(known, _)| *known == ext)
                .map(|(_, label)| *label)
        })
        .unwrap_or("File")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubagentState {
    Pending,
    Running,
    WaitingForHuman,
    Completed,
    Error,
    Cancelled,
}

impl fmt::Display for SubagentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubagentState::Pending => write!(f, "pending"),
            SubagentState::Running => write!(f, "running"),
            SubagentState::WaitingForHuman => write!(f, "waiting_for_human"),
            SubagentState::Completed => write!(f, "completed"),
            SubagentState::Error => write!(f, "error"),
            SubagentState::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubagentStatus {
    pub subagent_id: String,
    pub subagent_type: String,
    pub prompt: String,
    pub status: SubagentState,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tool_calls_count: u32,
    #[serde(default)]
    pub last_activity: Option<String>,
    #[serde(default)]
    pub result_summary: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubagentStatus {
    pub fn new(subagent_id: &str, subagent_type: &str, prompt: &str) -> Self {
        Self {
            subagent_id: subagent_id.to_string(),
            subagent_type: subagent_type.to_string(),
            prompt: prompt.to_string(),
            status: SubagentState::Pending,
            started_at: Utc::now(),
            completed_at: None,
            tool_calls_count: 0,
            last_activity: None,
            result_summary: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(
            self.status,
            SubagentState::Completed | SubagentState::Error | SubagentState::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThoughtProcess {
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_complete: bool,
}

/// Browser attachment as shown to clients; the live table is the session registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrowserSessionInfo {
    pub session_id: String,
    pub stream_url: Option<String>,
    pub is_active: bool,
}

/// Where the executor stopped when the checkpoint was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "position", rename_all = "snake_case")]
pub enum ExecutorPosition {
    /// Between turns. The next model call may go ahead.
    #[default]
    Idle,
    /// Mid-turn, blocked on a human. `tool_call` is re-invoked with the
    /// response and `remaining_calls` run after it.
    Suspended {
        interrupt_id: Option<Uuid>,
        tool_call: ToolCallRequest,
        remaining_calls: Vec<ToolCallRequest>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    pub thread_id: ThreadId,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub todos: Vec<TodoItem>,
    #[serde(default)]
    pub files: BTreeMap<String, String>,
    #[serde(default)]
    pub presented_files: Vec<PresentedFile>,
    #[serde(default)]
    pub pending_interrupts: Vec<PendingInterrupt>,
    #[serde(default)]
    pub active_subagents: BTreeMap<String, SubagentStatus>,
    #[serde(default)]
    pub current_thought: Option<ThoughtProcess>,
    #[serde(default)]
    pub browser_session: Option<BrowserSessionInfo>,
}

impl AgentState {
    pub fn new(thread_id: ThreadId) -> Self {
        Self {
            thread_id,
            messages: Vec::new(),
            todos: Vec::new(),
            files: BTreeMap::new(),
            presented_files: Vec::new(),
            pending_interrupts: Vec::new(),
            active_subagents: BTreeMap::new(),
            current_thought: None,
            browser_session: None,
        }
    }

    /// Pure merge: `self` is left untouched.
    pub fn merge(&self, partial: &StateUpdate) -> AgentState {
        let mut next = self.clone();
        next.apply(partial.clone());
        next
    }

    pub fn apply(&mut self, partial: StateUpdate) {
        if let Some(thread_id) = partial.thread_id {
            self.thread_id = thread_id;
        }
        self.messages.extend(partial.messages);
        if let Some(todos) = partial.todos {
            self.todos = todos;
        }
        self.files.extend(partial.files);
        self.presented_files.extend(partial.presented_files);
        self.pending_interrupts.extend(partial.pending_interrupts);
        self.active_subagents.extend(partial.active_subagents);
        if let Some(thought) = partial.current_thought {
            self.current_thought = Some(thought);
        }
        if let Some(session) = partial.browser_session {
            self.browser_session = Some(session);
        }
    }

    pub fn interrupt(&self, id: Uuid) -> Option<&PendingInterrupt> {
        self.pending_interrupts.iter().find(|pi| pi.id == id)
    }

    pub fn interrupt_mut(&mut self, id: Uuid) -> Option<&mut PendingInterrupt> {
        self.pending_interrupts.iter_mut().find(|pi| pi.id == id)
    }

    /// In-place status update for a known interrupt, append otherwise.
    pub fn upsert_interrupt(&mut self, interrupt: PendingInterrupt) {
        match self.interrupt_mut(interrupt.id) {
            Some(existing) => *existing = interrupt,
            None => self.pending_interrupts.push(interrupt),
        }
    }

    pub fn unresolved_interrupts(&self) -> impl Iterator<Item = &PendingInterrupt> {
        self.pending_interrupts
            .iter()
            .filter(|pi| pi.status == InterruptStatus::Pending)
    }
}

/// A partial update produced by one tool call or one sub-agent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    pub thread_id: Option<ThreadId>,
    pub messages: Vec<ChatMessage>,
    pub todos: Option<Vec<TodoItem>>,
    pub files: BTreeMap<String, String>,
    pub presented_files: Vec<PresentedFile>,
    pub pending_interrupts: Vec<PendingInterrupt>,
    pub active_subagents: BTreeMap<String, SubagentStatus>,
    pub current_thought: Option<ThoughtProcess>,
    pub browser_session: Option<BrowserSessionInfo>,
}

impl StateUpdate {
    pub fn is_empty(&self) -> bool {
        *self == StateUpdate::default()
    }

    pub fn message(message: ChatMessage) -> Self {
        Self {
            messages: vec![message],
            ..Default::default()
        }
    }

    pub fn file(path: &str, content: &str) -> Self {
        let mut files = BTreeMap::new();
        files.insert(path.to_string(), content.to_string());
        Self {
            files,
            ..Default::default()
        }
    }

    pub fn subagent(status: SubagentStatus) -> Self {
        let mut active_subagents = BTreeMap::new();
        active_subagents.insert(status.subagent_id.clone(), status);
        Self {
            active_subagents,
            ..Default::default()
        }
    }

    /// Reasoning the model gave alongside its tool calls.
    pub fn thought(content: &str) -> Self {
        Self {
            current_thought: Some(ThoughtProcess {
                content: content.to_string(),
                timestamp: Utc::now(),
                is_complete: false,
            }),
            ..Default::default()
        }
    }

    /// Combine two partials with the same per-field rules as
    /// [`AgentState::apply`]. `later` wins on scalar and same-key conflicts.
    pub fn combine(mut self, later: StateUpdate) -> StateUpdate {
        if later.thread_id.is_some() {
            self.thread_id = later.thread_id;
        }
        self.messages.extend(later.messages);
        if later.todos.is_some() {
            self.todos = later.todos;
        }
        self.files.extend(later.files);
        self.presented_files.extend(later.presented_files);
        self.pending_interrupts.extend(later.pending_interrupts);
        self.active_subagents.extend(later.active_subagents);
        if later.current_thought.is_some() {
            self.current_thought = later.current_thought;
        }
        if later.browser_session.is_some() {
            self.browser_session = later.browser_session;
        }
        self
    }
}
