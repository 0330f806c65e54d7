//! Per-thread browser session table.
//!
//! The table lock guards bookkeeping only. Driver processes always run with
//! the lock released, so one slow page never stalls another thread.

use browser_agent_core::ThreadId;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::driver::{args, CommandExecutor, CommandResult};
use super::ports::{stream_url, PortAllocator};

#[derive(Debug, Clone, PartialEq)]
pub struct BrowserSession {
    /// Driver session name. Equal to the thread id.
    pub session_id: String,
    pub stream_port: u16,
    pub is_active: bool,
    pub opened_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

impl BrowserSession {
    pub fn stream_url(&self) -> String {
        stream_url(self.stream_port)
    }

    pub fn idle_for(&self, now: DateTime<Utc>) -> ChronoDuration {
        now - self.last_activity_at
    }
}

#[derive(Debug, Clone)]
pub struct OpenedSession {
    pub session: BrowserSession,
    /// False when an active session already existed and was reused.
    pub newly_opened: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CloseOutcome {
    Closed(CommandResult),
    AlreadyClosed,
    /// Left open by `close_if_idle` because of recent activity.
    StillActive,
}

fn chrono_threshold(threshold: Duration) -> ChronoDuration {
    ChronoDuration::from_std(threshold).unwrap_or_else(|_| ChronoDuration::days(36_500))
}

pub struct SessionRegistry {
    sessions: Mutex<HashMap<ThreadId, BrowserSession>>,
    ports: PortAllocator,
    executor: Arc<CommandExecutor>,
}

impl SessionRegistry {
    pub fn new(ports: PortAllocator, executor: Arc<CommandExecutor>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ports,
            executor,
        }
    }

    pub fn executor(&self) -> &Arc<CommandExecutor> {
        &self.executor
    }

    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// Reuse the thread's active session or register a fresh one.
    ///
    /// Registration is bookkeeping only; the driver creates its session on
    /// the first command that names it.
    pub async fn open(&self, thread_id: &ThreadId) -> OpenedSession {
        let mut sessions = self.sessions.lock().await;
        if let Some(existing) = sessions.get_mut(thread_id) {
            if existing.is_active {
                existing.last_activity_at = Utc::now();
                return OpenedSession {
                    session: existing.clone(),
                    newly_opened: false,
                };
            }
        }

        let port = self.ports.allocate(thread_id);
        let now = Utc::now();
        let session = BrowserSession {
            session_id: thread_id.to_string(),
            stream_port: port,
            is_active: true,
            opened_at: now,
            last_activity_at: now,
        };
        sessions.insert(thread_id.clone(), session.clone());
        info!(thread_id = %thread_id, port, "Browser session opened");
        OpenedSession {
            session,
            newly_opened: true,
        }
    }

    pub async fn get(&self, thread_id: &ThreadId) -> Option<BrowserSession> {
        self.sessions.lock().await.get(thread_id).cloned()
    }

    pub async fn mark_active(&self, thread_id: &ThreadId) {
        if let Some(session) = self.sessions.lock().await.get_mut(thread_id) {
            session.last_activity_at = Utc::now();
        }
    }

    /// Run one driver command for the thread. Success counts as activity.
    pub async fn execute(&self, thread_id: &ThreadId, parts: &[String], with_stream_port: bool) -> CommandResult {
        self.execute_with_timeout(thread_id, parts, self.executor.default_timeout(), with_stream_port)
            .await
    }

    pub async fn execute_with_timeout(
        &self,
        thread_id: &ThreadId,
        parts: &[String],
        timeout: Duration,
        with_stream_port: bool,
    ) -> CommandResult {
        let port = if with_stream_port {
            self.ports.get(thread_id)
        } else {
            None
        };
        let result = self.executor.run(thread_id, parts, timeout, port).await;
        if result.success {
            self.mark_active(thread_id).await;
        }
        result
    }

    /// Close the thread's session.
    ///
    /// The entry is marked inactive before the driver `close` runs, so a
    /// concurrent close or sweep sees it as already closed. The port is
    /// freed afterwards only if nothing reopened the session meanwhile.
    pub async fn close(&self, thread_id: &ThreadId) -> CloseOutcome {
        self.close_matching(thread_id, |_| true).await
    }

    /// Close only if the session is still idle at `now`. Activity recorded
    /// after the caller decided to reap wins and the session stays open.
    pub async fn close_if_idle(&self, thread_id: &ThreadId, threshold: Duration, now: DateTime<Utc>) -> CloseOutcome {
        let threshold = chrono_threshold(threshold);
        self.close_matching(thread_id, |s| s.idle_for(now) >= threshold).await
    }

    async fn close_matching<F>(&self, thread_id: &ThreadId, should_close: F) -> CloseOutcome
    where
        F: FnOnce(&BrowserSession) -> bool,
    {
        {
            let mut sessions = self.sessions.lock().await;
            match sessions.get_mut(thread_id) {
                Some(session) if session.is_active => {
                    if !should_close(session) {
                        return CloseOutcome::StillActive;
                    }
                    session.is_active = false;
                }
                _ => return CloseOutcome::AlreadyClosed,
            }
        }

        let result = self
            .executor
            .run(thread_id, &args(&["close"]), self.executor.default_timeout(), None)
            .await;
        if !result.success {
            warn!(thread_id = %thread_id, error = result.error_text(), "Driver close failed; releasing session anyway");
        }

        let mut sessions = self.sessions.lock().await;
        if sessions.get(thread_id).map(|s| !s.is_active).unwrap_or(false) {
            sessions.remove(thread_id);
            self.ports.release(thread_id);
        }
        info!(thread_id = %thread_id, "Browser session closed");
        CloseOutcome::Closed(result)
    }

    /// Drop a session that never got going, without calling the driver.
    pub async fn abandon(&self, thread_id: &ThreadId) {
        if self.sessions.lock().await.remove(thread_id).is_some() {
            self.ports.release(thread_id);
            debug!(thread_id = %thread_id, "Browser session abandoned");
        }
    }

    pub async fn active_sessions(&self) -> Vec<BrowserSession> {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|s| s.is_active)
            .cloned()
            .collect()
    }

    /// Active sessions whose last activity is at least `threshold` before
    /// `now`, longest idle first.
    pub async fn idle_sessions(&self, threshold: Duration, now: DateTime<Utc>) -> Vec<ThreadId> {
        let threshold = chrono_threshold(threshold);
        let mut idle: Vec<(DateTime<Utc>, ThreadId)> = self
            .sessions
            .lock()
            .await
            .iter()
            .filter(|(_, s)| s.is_active && s.idle_for(now) >= threshold)
            .map(|(id, s)| (s.last_activity_at, id.clone()))
            .collect();
        idle.sort();
        idle.into_iter().map(|(_, id)| id).collect()
    }

    #[cfg(test)]
    pub(crate) async fn set_last_activity(&self, thread_id: &ThreadId, at: DateTime<Utc>) {
        if let Some(session) = self.sessions.lock().await.get_mut(thread_id) {
            session.last_activity_at = at;
        }
    }
}
