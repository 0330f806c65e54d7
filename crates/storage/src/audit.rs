use browser_agent_core::{Paths, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::error;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEvent {
    ToolCall {
        tool_name: String,
        params: serde_json::Value,
        result: serde_json::Value,
        timestamp_ms: i64,
        thread_id: String,
        duration_ms: Option<u64>,
    },
    Interrupt {
        interrupt_id: String,
        origin_id: String,
        kind: String,
        /// `raised`, `responded` or `resumed`.
        transition: String,
        timestamp_ms: i64,
        thread_id: String,
    },
}

/// Append-only JSONL log, one file per UTC day.
pub struct AuditLogger {
    paths: Paths,
    write_lock: Mutex<()>,
}

impl AuditLogger {
    pub fn new(paths: Paths) -> Self {
        Self {
            paths,
            write_lock: Mutex::new(()),
        }
    }

    pub fn log_tool_call(
        &self,
        tool_name: &str,
        params: serde_json::Value,
        result: serde_json::Value,
        thread_id: &str,
        duration_ms: Option<u64>,
    ) -> Result<()> {
        self.write_event(AuditEvent::ToolCall {
            tool_name: tool_name.to_string(),
            params,
            result,
            timestamp_ms: Utc::now().timestamp_millis(),
            thread_id: thread_id.to_string(),
            duration_ms,
        })
    }

    pub fn log_interrupt(
        &self,
        interrupt_id: &str,
        origin_id: &str,
        kind: &str,
        transition: &str,
        thread_id: &str,
    ) -> Result<()> {
        self.write_event(AuditEvent::Interrupt {
            interrupt_id: interrupt_id.to_string(),
            origin_id: origin_id.to_string(),
            kind: kind.to_string(),
            transition: transition.to_string(),
            timestamp_ms: Utc::now().timestamp_millis(),
            thread_id: thread_id.to_string(),
        })
    }

    fn write_event(&self, event: AuditEvent) -> Result<()> {
        let log_file = self.log_file_for(&Utc::now().format("%Y-%m-%d").to_string());
        if let Some(parent) = log_file.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string(&event)?;

        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut file = OpenOptions::new().create(true).append(true).open(&log_file)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    fn log_file_for(&self, date: &str) -> PathBuf {
        self.paths.audit_dir().join(format!("{}.jsonl", date))
    }

    /// Read audit events from a specific date.
    pub fn read_events(&self, date: &str) -> Result<Vec<AuditEvent>> {
        let log_file = self.log_file_for(date);
        if !log_file.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&log_file)?;
        let mut events = Vec::new();
        for line in content.lines().filter(|l| !l.trim().is_empty()) {
            match serde_json::from_str::<AuditEvent>(line) {
                Ok(event) => events.push(event),
                Err(e) => {
                    error!(error = %e, line = %line, "Failed to parse audit event");
                }
            }
        }
        Ok(events)
    }

    pub fn read_today(&self) -> Result<Vec<AuditEvent>> {
        self.read_events(&Utc::now().format("%Y-%m-%d").to_string())
    }
}
