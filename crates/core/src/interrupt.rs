use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::types::ThreadId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    Guidance,
    Credentials,
    Confirmation,
    Approval,
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptKind::Guidance => write!(f, "guidance"),
            InterruptKind::Credentials => write!(f, "credentials"),
            InterruptKind::Confirmation => write!(f, "confirmation"),
            InterruptKind::Approval => write!(f, "approval"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptStatus {
    Pending,
    Responded,
    Resumed,
}

impl fmt::Display for InterruptStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptStatus::Pending => write!(f, "pending"),
            InterruptStatus::Responded => write!(f, "responded"),
            InterruptStatus::Resumed => write!(f, "resumed"),
        }
    }
}

/// What a tool hands back when it cannot finish without a human.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterruptRequest {
    pub kind: InterruptKind,
    pub payload: Value,
}

impl InterruptRequest {
    pub fn new(kind: InterruptKind, payload: Value) -> Self {
        Self { kind, payload }
    }

    pub fn question(&self) -> &str {
        self.payload
            .get("question")
            .and_then(|q| q.as_str())
            .unwrap_or("Unknown question")
    }
}

/// A human-input request and its progress through
/// `pending -> responded -> resumed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingInterrupt {
    pub id: Uuid,
    pub thread_id: ThreadId,
    /// The thread itself, or the sub-agent that raised the request.
    pub origin_id: String,
    pub origin_name: String,
    pub kind: InterruptKind,
    pub payload: Value,
    #[serde(default)]
    pub response: Option<Value>,
    pub status: InterruptStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub responded_at: Option<DateTime<Utc>>,
}

impl PendingInterrupt {
    pub fn new(
        thread_id: ThreadId,
        origin_id: impl Into<String>,
        origin_name: impl Into<String>,
        request: InterruptRequest,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            thread_id,
            origin_id: origin_id.into(),
            origin_name: origin_name.into(),
            kind: request.kind,
            payload: request.payload,
            response: None,
            status: InterruptStatus::Pending,
            created_at: Utc::now(),
            responded_at: None,
        }
    }

    /// Not yet consumed by the suspended execution.
    pub fn is_live(&self) -> bool {
        self.status != InterruptStatus::Resumed
    }

    pub fn question(&self) -> &str {
        self.payload
            .get("question")
            .and_then(|q| q.as_str())
            .unwrap_or("Unknown question")
    }

    /// `pending -> responded`. Returns false for any other starting state.
    pub fn respond(&mut self, value: Value) -> bool {
        if self.status != InterruptStatus::Pending {
            return false;
        }
        self.response = Some(value);
        self.status = InterruptStatus::Responded;
        self.responded_at = Some(Utc::now());
        true
    }

    /// `responded -> resumed`, handing out the stored response exactly once.
    pub fn take_resume(&mut self) -> Option<Value> {
        if self.status != InterruptStatus::Responded {
            return None;
        }
        self.status = InterruptStatus::Resumed;
        Some(self.response.clone().unwrap_or(Value::Null))
    }
}
