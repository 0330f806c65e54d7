//! Delegated execution and the forwarding of sub-agent interrupts.
//!
//! A sub-agent runs on its own child thread and checkpoints there. When it
//! suspends, the interrupt it raised stays on the child thread and a second,
//! forwarded interrupt is recorded on the parent with the sub-agent as origin.
//! The parent's state is the only place a human looks for open questions.

use async_trait::async_trait;
use browser_agent_core::state::{SubagentState, SubagentStatus};
use browser_agent_core::{
    AgentState, InterruptRequest, InterruptStatus, PendingInterrupt, Result, ThreadId,
};
use browser_agent_storage::AuditLogger;
use browser_agent_tools::{safe_truncate, Delegation, DelegationRequest, DelegationResult, SpawnHandle};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::broker::{record_transition, InterruptBroker};
use crate::runtime::{AgentRuntime, RunOutcome, RuntimeDeps};

const RESULT_SUMMARY_CHARS: usize = 200;

/// A forwarded interrupt that a human has answered, ready to feed back into
/// the sub-agent that raised it.
#[derive(Debug, Clone, PartialEq)]
pub struct SubagentResume {
    pub subagent_id: String,
    pub resume_value: Value,
    pub interrupt_id: Uuid,
}

#[derive(Clone)]
pub struct SubagentForwarder {
    broker: Arc<InterruptBroker>,
    audit: Arc<AuditLogger>,
}

impl SubagentForwarder {
    pub fn new(broker: Arc<InterruptBroker>, audit: Arc<AuditLogger>) -> Self {
        Self { broker, audit }
    }

    /// Wrap a child's suspension as an interrupt on the parent thread.
    pub fn capture(
        &self,
        parent: &ThreadId,
        status: &SubagentStatus,
        request: InterruptRequest,
    ) -> Result<PendingInterrupt> {
        let pi = self
            .broker
            .raise(parent, &status.subagent_id, &status.subagent_type, request)?;
        record_transition(&self.audit, &pi, "raised");
        info!(
            thread_id = %parent,
            subagent_id = %status.subagent_id,
            interrupt_id = %pi.id,
            "Forwarded sub-agent interrupt to parent"
        );
        Ok(pi)
    }

    /// Take the oldest answered sub-agent interrupt in `state`, marking it resumed.
    pub fn check_and_resume(&self, state: &mut AgentState) -> Option<SubagentResume> {
        let thread_id = state.thread_id.clone();
        let entry = state
            .pending_interrupts
            .iter_mut()
            .filter(|pi| pi.origin_id != thread_id.as_str() && pi.status == InterruptStatus::Responded)
            .min_by_key(|pi| pi.created_at)?;

        let resume_value = entry.take_resume()?;
        self.broker.mark_resumed(entry.id);
        record_transition(&self.audit, entry, "resumed");

        Some(SubagentResume {
            subagent_id: entry.origin_id.clone(),
            resume_value,
            interrupt_id: entry.id,
        })
    }

    /// Mark a forwarded entry in the parent's state as responded.
    pub fn respond_to_subagent_interrupt(state: &mut AgentState, interrupt_id: Uuid, value: Value) -> bool {
        let thread_id = state.thread_id.clone();
        match state.interrupt_mut(interrupt_id) {
            Some(pi) if pi.origin_id != thread_id.as_str() => pi.respond(value),
            _ => false,
        }
    }
}

/// Runs `task` calls on child runtimes built from the parent's dependencies.
pub struct RuntimeSpawnHandle {
    deps: RuntimeDeps,
    forwarder: SubagentForwarder,
}

impl RuntimeSpawnHandle {
    pub fn new(deps: RuntimeDeps) -> Self {
        let forwarder = SubagentForwarder::new(deps.broker.clone(), deps.audit.clone());
        Self { deps, forwarder }
    }

    fn child_runtime(&self, status: &SubagentStatus) -> AgentRuntime {
        AgentRuntime::subagent(self.deps.clone(), &status.subagent_id, &status.subagent_type)
    }

    async fn count_tool_calls(&self, child: &ThreadId) -> u32 {
        match self.deps.store.load(child).await {
            Ok(Some(cp)) => cp.state.messages.iter().filter(|m| m.role == "tool").count() as u32,
            _ => 0,
        }
    }

    async fn finish(
        &self,
        parent: &ThreadId,
        child: &ThreadId,
        mut status: SubagentStatus,
        outcome: Result<RunOutcome>,
    ) -> Result<Delegation> {
        status.tool_calls_count = self.count_tool_calls(child).await;
        let result = match outcome {
            Ok(RunOutcome::Completed(text)) => {
                status.status = SubagentState::Completed;
                status.completed_at = Some(Utc::now());
                status.result_summary = Some(safe_truncate(&text, RESULT_SUMMARY_CHARS).to_string());
                status.last_activity = Some("completed".to_string());
                info!(subagent_id = %status.subagent_id, "Sub-agent completed");
                DelegationResult::Completed(text)
            }
            Ok(RunOutcome::Suspended { kind, payload, .. }) => {
                let request = InterruptRequest::new(kind, payload);
                status.status = SubagentState::WaitingForHuman;
                status.last_activity = Some(format!("waiting for human: {}", request.question()));
                let pi = self.forwarder.capture(parent, &status, request)?;
                DelegationResult::WaitingForHuman(pi)
            }
            Ok(RunOutcome::NothingToResume) => {
                let error = "sub-agent had nothing to resume".to_string();
                status.status = SubagentState::Error;
                status.error = Some(error.clone());
                DelegationResult::Failed(error)
            }
            Err(e) => {
                warn!(subagent_id = %status.subagent_id, error = %e, "Sub-agent failed");
                status.status = SubagentState::Error;
                status.completed_at = Some(Utc::now());
                status.error = Some(e.to_string());
                DelegationResult::Failed(e.to_string())
            }
        };
        Ok(Delegation { status, result })
    }

    fn failed(mut status: SubagentStatus, error: &str) -> Delegation {
        status.status = SubagentState::Error;
        status.error = Some(error.to_string());
        Delegation {
            status,
            result: DelegationResult::Failed(error.to_string()),
        }
    }
}

#[async_trait]
impl SpawnHandle for RuntimeSpawnHandle {
    async fn delegate(&self, parent: &ThreadId, request: DelegationRequest) -> Result<Delegation> {
        let subagent_id = format!("sub-{}", &Uuid::new_v4().simple().to_string()[..8]);
        let mut status = SubagentStatus::new(&subagent_id, &request.subagent_type, &request.description);
        status.status = SubagentState::Running;

        let child = parent.child(&subagent_id);
        info!(
            thread_id = %parent,
            subagent_id = %subagent_id,
            subagent_type = %request.subagent_type,
            "Delegating to sub-agent"
        );
        let outcome = self.child_runtime(&status).run(&child, &request.description).await;
        self.finish(parent, &child, status, outcome).await
    }

    async fn resume(&self, parent: &ThreadId, mut status: SubagentStatus, value: Value) -> Result<Delegation> {
        if status.is_finished() {
            let error = format!("sub-agent already ended as {}", status.status);
            return Ok(Delegation {
                result: DelegationResult::Failed(error),
                status,
            });
        }
        let child = parent.child(&status.subagent_id);
        let runtime = self.child_runtime(&status);

        let waiting = runtime
            .pending(&child)
            .await?
            .into_iter()
            .find(|pi| pi.status == InterruptStatus::Pending);
        let Some(waiting) = waiting else {
            return Ok(Self::failed(status, "sub-agent is not waiting for input"));
        };
        if !runtime.respond(&child, waiting.id, value).await? {
            return Ok(Self::failed(status, "sub-agent rejected the response"));
        }

        status.status = SubagentState::Running;
        info!(thread_id = %parent, subagent_id = %status.subagent_id, "Resuming sub-agent");
        let outcome = runtime.resume(&child).await;
        self.finish(parent, &child, status, outcome).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use browser_agent_core::{InterruptKind, Paths};
    use serde_json::json;

    fn forwarder() -> (tempfile::TempDir, SubagentForwarder) {
        let dir = tempfile::tempdir().unwrap();
        let paths = Paths::with_base(dir.path().to_path_buf());
        let forwarder = SubagentForwarder::new(Arc::new(InterruptBroker::new()), Arc::new(AuditLogger::new(paths)));
        (dir, forwarder)
    }

    fn ask(question: &str) -> InterruptRequest {
        InterruptRequest::new(InterruptKind::Guidance, json!({"question": question}))
    }

    #[test]
    fn test_two_subagents_resolve_independently() {
        let (_dir, forwarder) = forwarder();
        let parent = ThreadId::from("parent");
        let mut state = AgentState::new(parent.clone());

        let a = forwarder
            .capture(&parent, &SubagentStatus::new("sub-a", "research", "p"), ask("A?"))
            .unwrap();
        let b = forwarder
            .capture(&parent, &SubagentStatus::new("sub-b", "forms", "p"), ask("B?"))
            .unwrap();
        state.pending_interrupts.extend([a.clone(), b.clone()]);
        assert_ne!(a.id, b.id);

        assert!(forwarder.check_and_resume(&mut state).is_none());

        // answer the newer one first
        assert!(SubagentForwarder::respond_to_subagent_interrupt(&mut state, b.id, json!("yes")));
        let ready = forwarder.check_and_resume(&mut state).unwrap();
        assert_eq!(ready.subagent_id, "sub-b");
        assert_eq!(ready.resume_value, json!("yes"));
        assert_eq!(state.interrupt(a.id).unwrap().status, InterruptStatus::Pending);
        assert_eq!(state.interrupt(b.id).unwrap().status, InterruptStatus::Resumed);
        assert!(forwarder.check_and_resume(&mut state).is_none());

        assert!(SubagentForwarder::respond_to_subagent_interrupt(&mut state, a.id, json!("no")));
        assert_eq!(forwarder.check_and_resume(&mut state).unwrap().subagent_id, "sub-a");
    }

    #[test]
    fn test_thread_own_interrupt_not_forwarded() {
        let (_dir, forwarder) = forwarder();
        let parent = ThreadId::from("parent");
        let mut state = AgentState::new(parent.clone());
        let own = PendingInterrupt::new(parent.clone(), "parent", "main", ask("?"));
        state.pending_interrupts.push(own.clone());

        assert!(!SubagentForwarder::respond_to_subagent_interrupt(&mut state, own.id, json!("x")));
        state.interrupt_mut(own.id).unwrap().respond(json!("x"));
        assert!(forwarder.check_and_resume(&mut state).is_none());
    }

    #[test]
    fn test_second_capture_for_same_subagent_rejected() {
        let (_dir, forwarder) = forwarder();
        let parent = ThreadId::from("parent");
        let status = SubagentStatus::new("sub-a", "research", "p");
        forwarder.capture(&parent, &status, ask("1")).unwrap();
        assert!(forwarder.capture(&parent, &status, ask("2")).is_err());
    }
}
