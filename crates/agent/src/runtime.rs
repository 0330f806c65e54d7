use browser_agent_core::state::{ExecutorPosition, SubagentState};
use browser_agent_core::types::{ChatMessage, LLMResponse, ToolCallRequest};
use browser_agent_core::{
    AgentState, Config, Error, InterruptKind, InterruptRequest, Paths, PendingInterrupt, Result,
    StateUpdate, ThreadId,
};
use browser_agent_providers::Provider;
use browser_agent_storage::{AuditLogger, Checkpoint, CheckpointStore};
use browser_agent_tools::{
    BrowserRuntime, Delegation, DelegationResult, SpawnHandle, ToolContext, ToolOutcome, ToolOutput,
    ToolRegistry,
};
use futures::future::join_all;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::{record_transition, InterruptBroker};
use crate::context::{ContextBuilder, PromptRole};
use crate::subagent::{RuntimeSpawnHandle, SubagentForwarder, SubagentResume};

const TASK_TOOL: &str = "task";
const MAIN_ORIGIN_NAME: &str = "main";
/// Its completed output holds the human's secrets.
const CREDENTIALS_TOOL: &str = "request_credentials";

/// Process-wide services shared by the main runtime and every sub-agent.
#[derive(Clone)]
pub struct RuntimeDeps {
    pub config: Arc<Config>,
    pub paths: Paths,
    pub provider: Arc<dyn Provider>,
    pub store: Arc<dyn CheckpointStore>,
    pub audit: Arc<AuditLogger>,
    pub broker: Arc<InterruptBroker>,
    pub browser: Arc<BrowserRuntime>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    Completed(String),
    /// Waiting on a human; answer with `respond` and continue with `resume`.
    Suspended {
        interrupt_id: Uuid,
        kind: InterruptKind,
        payload: Value,
        origin: String,
    },
    NothingToResume,
}

impl RunOutcome {
    fn suspended(pi: &PendingInterrupt) -> Self {
        RunOutcome::Suspended {
            interrupt_id: pi.id,
            kind: pi.kind,
            payload: pi.payload.clone(),
            origin: pi.origin_name.clone(),
        }
    }

    pub fn question(&self) -> Option<&str> {
        match self {
            RunOutcome::Suspended { payload, .. } => payload.get("question").and_then(|q| q.as_str()),
            _ => None,
        }
    }
}

/// Working copy of a thread between checkpoints.
struct Cursor {
    state: AgentState,
    step: u64,
}

/// A thread cannot take a new task while anything is still waiting on a human.
fn is_blocked(cp: &Checkpoint) -> bool {
    cp.is_suspended() || cp.state.pending_interrupts.iter().any(|pi| pi.is_live())
}

fn render(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Reducer merge, except interrupts already known to the state are updated in place.
fn apply_update(state: &mut AgentState, mut update: StateUpdate) {
    let interrupts = std::mem::take(&mut update.pending_interrupts);
    state.apply(update);
    for pi in interrupts {
        state.upsert_interrupt(pi);
    }
}

pub struct AgentRuntime {
    deps: RuntimeDeps,
    tools: ToolRegistry,
    spawner: Option<Arc<dyn SpawnHandle>>,
    forwarder: SubagentForwarder,
    owner: Option<String>,
    origin_name: String,
    system_prompt: String,
    max_iterations: u32,
}

impl AgentRuntime {
    pub fn new(deps: RuntimeDeps) -> Self {
        let spawner: Arc<dyn SpawnHandle> = Arc::new(RuntimeSpawnHandle::new(deps.clone()));
        let system_prompt = ContextBuilder::new(deps.paths.clone()).build_system_prompt(PromptRole::Main);
        Self {
            forwarder: SubagentForwarder::new(deps.broker.clone(), deps.audit.clone()),
            tools: ToolRegistry::with_defaults(),
            spawner: Some(spawner),
            owner: None,
            origin_name: MAIN_ORIGIN_NAME.to_string(),
            system_prompt,
            max_iterations: deps.config.agent.max_tool_iterations,
            deps,
        }
    }

    /// A delegated runtime: no `task` tool and a smaller iteration budget.
    pub fn subagent(deps: RuntimeDeps, subagent_id: &str, subagent_type: &str) -> Self {
        let system_prompt = ContextBuilder::new(deps.paths.clone())
            .build_system_prompt(PromptRole::Subagent { subagent_type });
        Self {
            forwarder: SubagentForwarder::new(deps.broker.clone(), deps.audit.clone()),
            tools: ToolRegistry::subagent_defaults(),
            spawner: None,
            owner: Some(subagent_id.to_string()),
            origin_name: subagent_type.to_string(),
            system_prompt,
            max_iterations: deps.config.agent.max_subagent_iterations,
            deps,
        }
    }

    pub fn deps(&self) -> &RuntimeDeps {
        &self.deps
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    /// Latest checkpoint for the thread, if any.
    pub async fn checkpoint(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>> {
        self.deps.store.load(thread_id).await
    }

    /// Interrupts on the thread that have not been consumed yet.
    pub async fn pending(&self, thread_id: &ThreadId) -> Result<Vec<PendingInterrupt>> {
        Ok(self
            .checkpoint(thread_id)
            .await?
            .map(|cp| cp.state.pending_interrupts.into_iter().filter(|pi| pi.is_live()).collect())
            .unwrap_or_default())
    }

    /// Drop the thread's checkpoint and those of its sub-agents. Returns how
    /// many checkpoints were deleted.
    pub async fn forget(&self, thread_id: &ThreadId) -> Result<usize> {
        let Some(cp) = self.checkpoint(thread_id).await? else {
            return Ok(0);
        };
        let mut deleted = 0;
        for subagent_id in cp.state.active_subagents.keys() {
            let child = thread_id.child(subagent_id);
            if self.deps.store.load(&child).await?.is_some() {
                self.deps.store.delete(&child).await?;
                deleted += 1;
            }
        }
        self.deps.store.delete(thread_id).await?;
        let discarded = self.deps.broker.discard(thread_id);
        info!(thread_id = %thread_id, deleted = deleted + 1, discarded, "Thread forgotten");
        Ok(deleted + 1)
    }

    pub async fn run(&self, thread_id: &ThreadId, task: &str) -> Result<RunOutcome> {
        let mut cursor = match self.checkpoint(thread_id).await? {
            Some(cp) if is_blocked(&cp) => {
                return Err(Error::Interrupt(format!(
                    "thread {} is waiting for a human response; respond and resume it first",
                    thread_id
                )));
            }
            Some(cp) => Cursor {
                step: cp.step,
                state: cp.state,
            },
            None => {
                let mut state = AgentState::new(thread_id.clone());
                state.messages.push(ChatMessage::system(&self.system_prompt));
                Cursor { state, step: 0 }
            }
        };

        info!(thread_id = %thread_id, step = cursor.step, "Starting run");
        cursor.state.messages.push(ChatMessage::user(task));
        self.run_loop(thread_id, cursor).await
    }

    /// Record a human answer. False when the id is unknown on this thread or
    /// the interrupt was already answered.
    pub async fn respond(&self, thread_id: &ThreadId, interrupt_id: Uuid, value: Value) -> Result<bool> {
        let Some(cp) = self.checkpoint(thread_id).await? else {
            return Ok(false);
        };
        let position = cp.position;
        let mut cursor = Cursor {
            step: cp.step,
            state: cp.state,
        };
        self.deps.broker.restore(&cursor.state.pending_interrupts);

        let Some(known) = cursor.state.interrupt(interrupt_id).cloned() else {
            debug!(thread_id = %thread_id, interrupt_id = %interrupt_id, "Response for interrupt not on this thread");
            return Ok(false);
        };
        if !self.deps.broker.respond(interrupt_id, value.clone()) {
            return Ok(false);
        }

        if known.origin_id == thread_id.as_str() {
            if let Some(updated) = self.deps.broker.get(interrupt_id) {
                cursor.state.upsert_interrupt(updated);
            }
        } else {
            SubagentForwarder::respond_to_subagent_interrupt(&mut cursor.state, interrupt_id, value);
        }
        if let Some(updated) = cursor.state.interrupt(interrupt_id) {
            record_transition(&self.deps.audit, updated, "responded");
        }

        self.save_step(&mut cursor, position).await?;
        Ok(true)
    }

    /// Continue a thread whose interrupt has been answered.
    pub async fn resume(&self, thread_id: &ThreadId) -> Result<RunOutcome> {
        let Some(cp) = self.checkpoint(thread_id).await? else {
            return Ok(RunOutcome::NothingToResume);
        };
        let position = cp.position;
        let mut cursor = Cursor {
            step: cp.step,
            state: cp.state,
        };
        self.deps.broker.restore(&cursor.state.pending_interrupts);

        match position {
            ExecutorPosition::Suspended {
                tool_call,
                remaining_calls,
                ..
            } => {
                let Some((pi, value)) = self.deps.broker.resume(thread_id) else {
                    debug!(thread_id = %thread_id, "Suspended thread has no answered interrupt");
                    return Ok(RunOutcome::NothingToResume);
                };
                cursor.state.upsert_interrupt(pi.clone());
                record_transition(&self.deps.audit, &pi, "resumed");
                info!(
                    thread_id = %thread_id,
                    interrupt_id = %pi.id,
                    tool = %tool_call.name,
                    held = self.deps.broker.held_count(),
                    "Resuming suspended tool call"
                );

                let mut queue: VecDeque<ToolCallRequest> = remaining_calls.into();
                let result = self.invoke(thread_id, &tool_call, Some(value)).await;
                if let Some(outcome) = self.settle(thread_id, &mut cursor, tool_call, result, &mut queue).await? {
                    return Ok(outcome);
                }
                if let Some(outcome) = self.execute_calls(thread_id, &mut cursor, queue).await? {
                    return Ok(outcome);
                }
                self.run_loop(thread_id, cursor).await
            }
            ExecutorPosition::Idle => {
                let mut resumed_any = false;
                while let Some(ready) = self.forwarder.check_and_resume(&mut cursor.state) {
                    resumed_any = true;
                    self.resume_subagent(thread_id, &mut cursor, ready).await?;
                }
                if !resumed_any {
                    return Ok(RunOutcome::NothingToResume);
                }
                if let Some(pi) = cursor.state.unresolved_interrupts().next() {
                    return Ok(RunOutcome::suspended(pi));
                }
                self.run_loop(thread_id, cursor).await
            }
        }
    }

    async fn resume_subagent(&self, thread_id: &ThreadId, cursor: &mut Cursor, ready: SubagentResume) -> Result<()> {
        let Some(status) = cursor.state.active_subagents.get(&ready.subagent_id).cloned() else {
            warn!(thread_id = %thread_id, subagent_id = %ready.subagent_id, "Answered interrupt for unknown sub-agent");
            return self.save_step(cursor, ExecutorPosition::Idle).await;
        };
        let spawner = self
            .spawner
            .as_ref()
            .ok_or_else(|| Error::Session("this runtime cannot resume sub-agents".to_string()))?;

        let name = status.subagent_type.clone();
        let delegation = match spawner.resume(thread_id, status.clone(), ready.resume_value).await {
            Ok(delegation) => delegation,
            Err(e) => {
                let mut failed = status;
                failed.status = SubagentState::Error;
                failed.error = Some(e.to_string());
                Delegation {
                    status: failed,
                    result: DelegationResult::Failed(e.to_string()),
                }
            }
        };

        let message = delegation.message();
        apply_update(&mut cursor.state, delegation.into_update());
        cursor
            .state
            .messages
            .push(ChatMessage::user(&format!("[Subagent '{}' resumed] {}", name, message)));
        self.save_step(cursor, ExecutorPosition::Idle).await
    }

    async fn run_loop(&self, thread_id: &ThreadId, mut cursor: Cursor) -> Result<RunOutcome> {
        let schemas = self.tools.schemas();

        for iteration in 0..self.max_iterations {
            debug!(thread_id = %thread_id, iteration, "LLM call iteration");
            let response = match self.chat_with_retry(&cursor.state.messages, &schemas).await {
                Ok(response) => response,
                Err(e) => {
                    let text = format!(
                        "I ran into a problem calling the model (retried {} times): {}",
                        self.deps.config.agent.llm_max_retries, e
                    );
                    cursor.state.messages.push(ChatMessage::assistant(&text));
                    self.save_step(&mut cursor, ExecutorPosition::Idle).await?;
                    return Ok(RunOutcome::Completed(text));
                }
            };

            if response.tool_calls.is_empty() {
                let text = response.content.unwrap_or_default();
                cursor.state.messages.push(ChatMessage::assistant(&text));
                if let Some(thought) = cursor.state.current_thought.as_mut() {
                    thought.is_complete = true;
                }
                self.save_step(&mut cursor, ExecutorPosition::Idle).await?;
                info!(thread_id = %thread_id, iteration, "Run completed");
                return Ok(RunOutcome::Completed(text));
            }

            let mut update = StateUpdate::message(ChatMessage::assistant_with_tools(
                response.content.as_deref(),
                response.tool_calls.clone(),
            ));
            if let Some(thought) = response.content.as_deref().filter(|c| !c.trim().is_empty()) {
                update = update.combine(StateUpdate::thought(thought));
            }
            apply_update(&mut cursor.state, update);
            if let Some(outcome) = self
                .execute_calls(thread_id, &mut cursor, response.tool_calls.into())
                .await?
            {
                return Ok(outcome);
            }
        }

        warn!(thread_id = %thread_id, max = self.max_iterations, "Reached max tool iterations");
        let text = "I've reached the maximum number of tool iterations.".to_string();
        cursor.state.messages.push(ChatMessage::assistant(&text));
        self.save_step(&mut cursor, ExecutorPosition::Idle).await?;
        Ok(RunOutcome::Completed(text))
    }

    async fn chat_with_retry(&self, messages: &[ChatMessage], tools: &[Value]) -> Result<LLMResponse> {
        let max_retries = self.deps.config.agent.llm_max_retries;
        let base_delay_ms = self.deps.config.agent.llm_retry_delay_ms;
        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1u64 << (attempt - 1).min(4));
                warn!(attempt, max_retries, delay_ms, "Retrying LLM call after error");
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match self.deps.provider.chat(messages, tools).await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt, "LLM call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(e) => {
                    warn!(error = %e, attempt, max_retries, "LLM call failed");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Provider("no LLM attempt was made".to_string())))
    }

    /// Run tool calls in order. Consecutive `task` calls run concurrently and
    /// are settled in call order.
    async fn execute_calls(
        &self,
        thread_id: &ThreadId,
        cursor: &mut Cursor,
        mut queue: VecDeque<ToolCallRequest>,
    ) -> Result<Option<RunOutcome>> {
        while let Some(call) = queue.pop_front() {
            let mut batch = vec![call];
            if batch[0].name == TASK_TOOL {
                while queue.front().map_or(false, |next| next.name == TASK_TOOL) {
                    if let Some(next) = queue.pop_front() {
                        batch.push(next);
                    }
                }
            }

            let results = if batch.len() == 1 {
                vec![self.invoke(thread_id, &batch[0], None).await]
            } else {
                info!(thread_id = %thread_id, count = batch.len(), "Running delegations concurrently");
                join_all(batch.iter().map(|call| self.invoke(thread_id, call, None))).await
            };

            let mut settled: VecDeque<_> = batch.into_iter().zip(results).collect();
            while let Some((call, result)) = settled.pop_front() {
                if matches!(result, Ok(ToolOutcome::Suspended(_))) {
                    // later members of the batch run again after resume
                    for (later, _) in settled.drain(..).rev() {
                        queue.push_front(later);
                    }
                }
                if let Some(outcome) = self.settle(thread_id, cursor, call, result, &mut queue).await? {
                    return Ok(Some(outcome));
                }
            }
        }

        // forwarded sub-agent questions stop the turn here
        if let Some(pi) = cursor.state.unresolved_interrupts().next() {
            info!(thread_id = %thread_id, interrupt_id = %pi.id, origin = %pi.origin_name, "Waiting on sub-agent interrupt");
            return Ok(Some(RunOutcome::suspended(pi)));
        }
        Ok(None)
    }

    async fn settle(
        &self,
        thread_id: &ThreadId,
        cursor: &mut Cursor,
        call: ToolCallRequest,
        result: Result<ToolOutcome>,
        queue: &mut VecDeque<ToolCallRequest>,
    ) -> Result<Option<RunOutcome>> {
        match result {
            Ok(ToolOutcome::Suspended(request)) => {
                let remaining = std::mem::take(queue);
                self.suspend(thread_id, cursor, call, request, remaining).await.map(Some)
            }
            Ok(ToolOutcome::Completed(output)) => {
                self.record(cursor, &call, Ok(output)).await?;
                Ok(None)
            }
            Err(e) => {
                self.record(cursor, &call, Err(e)).await?;
                Ok(None)
            }
        }
    }

    async fn invoke(&self, thread_id: &ThreadId, call: &ToolCallRequest, resume: Option<Value>) -> Result<ToolOutcome> {
        let mut ctx = ToolContext::new(thread_id.clone(), self.deps.paths.clone(), self.deps.config.clone());
        ctx.tool_call_id = call.id.clone();
        ctx.browser = Some(self.deps.browser.clone());
        ctx.spawner = self.spawner.clone();
        ctx.owner = self.owner.clone();
        ctx.resume = resume;

        let started = Instant::now();
        let result = self.tools.execute(&call.name, ctx, call.arguments.clone()).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let audited = match &result {
            Ok(ToolOutcome::Completed(_)) if call.name == CREDENTIALS_TOOL => json!({"redacted": true}),
            Ok(ToolOutcome::Completed(output)) => output.content.clone(),
            Ok(ToolOutcome::Suspended(request)) => json!({
                "suspended": request.kind,
                "question": request.question(),
            }),
            Err(e) => json!({"error": e.to_string()}),
        };
        if let Err(e) = self.deps.audit.log_tool_call(
            &call.name,
            call.arguments.clone(),
            audited,
            thread_id.as_str(),
            Some(duration_ms),
        ) {
            warn!(tool = %call.name, error = %e, "Failed to write audit event");
        }
        result
    }

    /// Append the tool result and checkpoint. Errors become `Error:` content.
    async fn record(&self, cursor: &mut Cursor, call: &ToolCallRequest, result: Result<ToolOutput>) -> Result<()> {
        let content = match result {
            Ok(output) => {
                let text = render(&output.content);
                apply_update(&mut cursor.state, output.update);
                text
            }
            Err(e) => {
                warn!(thread_id = %cursor.state.thread_id, tool = %call.name, error = %e, "Tool call failed");
                format!("Error: {}", e)
            }
        };
        cursor
            .state
            .messages
            .push(ChatMessage::tool_result(&call.id, &call.name, &content));
        self.save_step(cursor, ExecutorPosition::Idle).await
    }

    async fn suspend(
        &self,
        thread_id: &ThreadId,
        cursor: &mut Cursor,
        call: ToolCallRequest,
        request: InterruptRequest,
        remaining: VecDeque<ToolCallRequest>,
    ) -> Result<RunOutcome> {
        let pi = self
            .deps
            .broker
            .raise(thread_id, thread_id.as_str(), &self.origin_name, request)?;
        cursor.state.upsert_interrupt(pi.clone());
        record_transition(&self.deps.audit, &pi, "raised");

        info!(
            thread_id = %thread_id,
            interrupt_id = %pi.id,
            tool = %call.name,
            remaining = remaining.len(),
            "Thread suspended"
        );
        let position = ExecutorPosition::Suspended {
            interrupt_id: Some(pi.id),
            tool_call: call,
            remaining_calls: remaining.into_iter().collect(),
        };
        self.save_step(cursor, position).await?;
        Ok(RunOutcome::suspended(&pi))
    }

    async fn save_step(&self, cursor: &mut Cursor, position: ExecutorPosition) -> Result<()> {
        cursor.step += 1;
        let checkpoint = Checkpoint::new(cursor.step, cursor.state.clone(), position);
        self.deps.store.save(&checkpoint).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use browser_agent_core::InterruptStatus;
    use browser_agent_core::state::SubagentStatus;
    use browser_agent_storage::{AuditEvent, SqliteCheckpointStore};
    use browser_agent_tools::browser::{CommandResult, CommandRunner, CommandSpec};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Script = dyn Fn(&[ChatMessage]) -> Result<LLMResponse> + Send + Sync;

    /// Answers from a closure over the conversation so far.
    struct ScriptedProvider {
        script: Box<Script>,
        calls: AtomicUsize,
    }

    impl ScriptedProvider {
        fn new<F>(script: F) -> Arc<Self>
        where
            F: Fn(&[ChatMessage]) -> Result<LLMResponse> + Send + Sync + 'static,
        {
            Arc::new(Self {
                script: Box::new(script),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for ScriptedProvider {
        async fn chat(&self, messages: &[ChatMessage], _tools: &[Value]) -> Result<LLMResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.script)(messages)
        }
    }

    struct IdleRunner;

    #[async_trait]
    impl CommandRunner for IdleRunner {
        async fn run(&self, _spec: CommandSpec, _timeout: Duration) -> CommandResult {
            CommandResult::ok("")
        }
    }

    fn text(content: &str) -> LLMResponse {
        LLMResponse {
            content: Some(content.to_string()),
            finish_reason: "stop".to_string(),
            ..Default::default()
        }
    }

    fn calls(calls: Vec<(&str, &str, Value)>) -> LLMResponse {
        LLMResponse {
            content: None,
            tool_calls: calls
                .into_iter()
                .map(|(id, name, arguments)| ToolCallRequest {
                    id: id.to_string(),
                    name: name.to_string(),
                    arguments,
                })
                .collect(),
            finish_reason: "tool_calls".to_string(),
            ..Default::default()
        }
    }

    fn credentials_call(id: &str) -> LLMResponse {
        calls(vec![(
            id,
            "request_credentials",
            json!({"service": "LinkedIn", "credential_types": "username and password", "reason": "check messages"}),
        )])
    }

    fn last(messages: &[ChatMessage]) -> &ChatMessage {
        &messages[messages.len() - 1]
    }

    fn deps(dir: &tempfile::TempDir, provider: Arc<dyn Provider>) -> RuntimeDeps {
        let paths = Paths::with_base(dir.path().join(".browser-agent"));
        paths.ensure_dirs().unwrap();
        let mut config = Config::default();
        config.agent.llm_max_retries = 1;
        config.agent.llm_retry_delay_ms = 1;
        let browser = Arc::new(BrowserRuntime::with_runner(&config.browser, paths.clone(), Arc::new(IdleRunner)));
        RuntimeDeps {
            config: Arc::new(config),
            provider,
            store: Arc::new(SqliteCheckpointStore::open(&paths.checkpoint_db()).unwrap()),
            audit: Arc::new(AuditLogger::new(paths.clone())),
            broker: Arc::new(InterruptBroker::new()),
            browser,
            paths,
        }
    }

    /// Asks for credentials once, then reports what the tool returned.
    fn credentials_script(messages: &[ChatMessage]) -> Result<LLMResponse> {
        let tail = last(messages);
        if tail.role == "tool" {
            return Ok(text(&format!("Logged in with {}", tail.content)));
        }
        Ok(credentials_call("call_1"))
    }

    #[tokio::test]
    async fn test_credentials_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::new(deps(&dir, ScriptedProvider::new(credentials_script)));
        let t1 = ThreadId::from("t1");

        let outcome = runtime.run(&t1, "Check my LinkedIn messages").await.unwrap();
        let interrupt_id = match &outcome {
            RunOutcome::Suspended { interrupt_id, kind, payload, origin } => {
                assert_eq!(*kind, InterruptKind::Credentials);
                assert_eq!(payload["service"], "LinkedIn");
                assert_eq!(payload["reason"], "check messages");
                assert_eq!(origin, "main");
                *interrupt_id
            }
            other => panic!("unexpected: {:?}", other),
        };

        // nothing is ready before the human answers
        assert_eq!(runtime.resume(&t1).await.unwrap(), RunOutcome::NothingToResume);
        assert!(matches!(runtime.run(&t1, "another task").await, Err(Error::Interrupt(_))));

        let creds = json!({"username": "a", "password": "b"});
        assert!(runtime.respond(&t1, interrupt_id, creds.clone()).await.unwrap());
        assert!(!runtime.respond(&t1, interrupt_id, json!("again")).await.unwrap());

        match runtime.resume(&t1).await.unwrap() {
            RunOutcome::Completed(text) => {
                assert!(text.contains("\"username\":\"a\""));
                assert!(text.contains("\"service\":\"LinkedIn\""));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(runtime.resume(&t1).await.unwrap(), RunOutcome::NothingToResume);

        let cp = runtime.checkpoint(&t1).await.unwrap().unwrap();
        assert!(!cp.is_suspended());
        let pi = cp.state.interrupt(interrupt_id).unwrap();
        assert_eq!(pi.status, InterruptStatus::Resumed);
        assert_eq!(pi.response, Some(creds));
        assert!(runtime.pending(&t1).await.unwrap().is_empty());
        assert_eq!(runtime.deps().broker.held_count(), 0);

        let transitions: Vec<String> = runtime
            .deps()
            .audit
            .read_today()
            .unwrap()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::Interrupt { transition, .. } => Some(transition),
                _ => None,
            })
            .collect();
        assert_eq!(transitions, vec!["raised", "responded", "resumed"]);

        let audited: Vec<Value> = runtime
            .deps()
            .audit
            .read_today()
            .unwrap()
            .into_iter()
            .filter_map(|e| match e {
                AuditEvent::ToolCall { tool_name, result, .. } if tool_name == "request_credentials" => Some(result),
                _ => None,
            })
            .collect();
        assert_eq!(audited.last(), Some(&json!({"redacted": true})));
        assert!(audited.iter().all(|r| !r.to_string().contains("\"username\":\"a\"")));
    }

    #[tokio::test]
    async fn test_resume_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let t1 = ThreadId::from("t1");

        let interrupt_id = {
            let runtime = AgentRuntime::new(deps(&dir, ScriptedProvider::new(credentials_script)));
            match runtime.run(&t1, "Check messages").await.unwrap() {
                RunOutcome::Suspended { interrupt_id, .. } => interrupt_id,
                other => panic!("unexpected: {:?}", other),
            }
        };

        // fresh broker and store handle, same sandbox
        let runtime = AgentRuntime::new(deps(&dir, ScriptedProvider::new(credentials_script)));
        let pending = runtime.pending(&t1).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, interrupt_id);

        assert!(runtime.respond(&t1, interrupt_id, json!({"username": "x"})).await.unwrap());

        let runtime = AgentRuntime::new(deps(&dir, ScriptedProvider::new(credentials_script)));
        assert!(matches!(runtime.resume(&t1).await.unwrap(), RunOutcome::Completed(_)));
    }

    #[tokio::test]
    async fn test_remaining_calls_run_after_resume() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(|messages| {
            let tail = last(messages);
            if tail.role == "user" {
                return Ok(calls(vec![
                    (
                        "call_1",
                        "request_confirmation",
                        json!({"action": "Submit application", "risks": "Sent to employer"}),
                    ),
                    (
                        "call_2",
                        "write_file",
                        json!({"file_path": "/artifacts/file_outputs/log.md", "content": "submitted"}),
                    ),
                ]));
            }
            Ok(text("done"))
        });
        let runtime = AgentRuntime::new(deps(&dir, provider));
        let t1 = ThreadId::from("t1");

        let id = match runtime.run(&t1, "Apply").await.unwrap() {
            RunOutcome::Suspended { interrupt_id, .. } => interrupt_id,
            other => panic!("unexpected: {:?}", other),
        };
        let cp = runtime.checkpoint(&t1).await.unwrap().unwrap();
        match &cp.position {
            ExecutorPosition::Suspended { tool_call, remaining_calls, interrupt_id } => {
                assert_eq!(tool_call.id, "call_1");
                assert_eq!(remaining_calls.len(), 1);
                assert_eq!(*interrupt_id, Some(id));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(!cp.state.files.contains_key("artifacts/file_outputs/log.md"));

        runtime.respond(&t1, id, json!("Proceed")).await.unwrap();
        assert_eq!(runtime.resume(&t1).await.unwrap(), RunOutcome::Completed("done".to_string()));

        let state = runtime.checkpoint(&t1).await.unwrap().unwrap().state;
        assert_eq!(state.files["artifacts/file_outputs/log.md"], "submitted");
        let tool_results: Vec<&str> = state
            .messages
            .iter()
            .filter(|m| m.role == "tool")
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tool_results[0], "Human decision on 'Submit application': Proceed");
        assert_eq!(tool_results.len(), 2);
    }

    /// Parent delegates to two sub-agents; each asks a human before finishing.
    fn delegation_script(messages: &[ChatMessage]) -> Result<LLMResponse> {
        let system = &messages[0].content;
        let tail = last(messages);
        if system.starts_with("You are a '") {
            if tail.role == "user" {
                let question = if system.contains("'alpha'") { "Alpha account?" } else { "Beta account?" };
                return Ok(calls(vec![(
                    "sub_call",
                    "request_human_guidance",
                    json!({"context": "login", "question": question, "attempted_approaches": "none"}),
                )]));
            }
            return Ok(text(&format!("finished after {}", tail.content)));
        }
        if messages.iter().filter(|m| m.role == "user").count() == 1 {
            return Ok(calls(vec![
                ("t_a", "task", json!({"description": "Do alpha", "subagent_type": "alpha"})),
                ("t_b", "task", json!({"description": "Do beta", "subagent_type": "beta"})),
            ]));
        }
        Ok(text("all sub-agents done"))
    }

    #[tokio::test]
    async fn test_concurrent_subagent_interrupts_resolve_independently() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(delegation_script);
        let runtime = AgentRuntime::new(deps(&dir, provider.clone()));
        let parent = ThreadId::from("parent");

        let first = runtime.run(&parent, "Do both").await.unwrap();
        assert!(matches!(first, RunOutcome::Suspended { .. }));

        let pending = runtime.pending(&parent).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_ne!(pending[0].id, pending[1].id);
        let alpha = pending.iter().find(|pi| pi.origin_name == "alpha").unwrap().clone();
        let beta = pending.iter().find(|pi| pi.origin_name == "beta").unwrap().clone();
        assert_eq!(alpha.question(), "Alpha account?");

        let state = runtime.checkpoint(&parent).await.unwrap().unwrap().state;
        assert_eq!(state.active_subagents.len(), 2);
        assert!(state
            .active_subagents
            .values()
            .all(|s| s.status == SubagentState::WaitingForHuman));
        let tool_results: Vec<&str> = state
            .messages
            .iter()
            .filter(|m| m.role == "tool")
            .map(|m| m.content.as_str())
            .collect();
        assert_eq!(tool_results[0], "Subagent 'alpha' needs human assistance: Alpha account?");
        assert_eq!(tool_results[1], "Subagent 'beta' needs human assistance: Beta account?");

        // answer beta only
        assert!(runtime.respond(&parent, beta.id, json!("use beta@corp")).await.unwrap());
        match runtime.resume(&parent).await.unwrap() {
            RunOutcome::Suspended { interrupt_id, .. } => assert_eq!(interrupt_id, alpha.id),
            other => panic!("unexpected: {:?}", other),
        }
        let state = runtime.checkpoint(&parent).await.unwrap().unwrap().state;
        assert_eq!(state.interrupt(alpha.id).unwrap().status, InterruptStatus::Pending);
        assert_eq!(state.interrupt(beta.id).unwrap().status, InterruptStatus::Resumed);
        let beta_status = &state.active_subagents[&beta.origin_id];
        assert_eq!(beta_status.status, SubagentState::Completed);
        assert!(beta_status
            .result_summary
            .as_deref()
            .unwrap()
            .contains("Human guidance: use beta@corp"));
        assert!(state
            .messages
            .iter()
            .any(|m| m.role == "user" && m.content.starts_with("[Subagent 'beta' resumed]")));

        assert!(runtime.respond(&parent, alpha.id, json!("use alpha@corp")).await.unwrap());
        assert_eq!(
            runtime.resume(&parent).await.unwrap(),
            RunOutcome::Completed("all sub-agents done".to_string())
        );
        let state = runtime.checkpoint(&parent).await.unwrap().unwrap().state;
        assert!(state
            .active_subagents
            .values()
            .all(|s| s.status == SubagentState::Completed));
        assert!(runtime.pending(&parent).await.unwrap().is_empty());

        assert_eq!(runtime.forget(&parent).await.unwrap(), 3);
        assert!(runtime.checkpoint(&parent).await.unwrap().is_none());
        for subagent_id in state.active_subagents.keys() {
            assert!(runtime.checkpoint(&parent.child(subagent_id)).await.unwrap().is_none());
        }
        assert_eq!(runtime.forget(&parent).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_respond_unknown_or_foreign_id_is_false() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = AgentRuntime::new(deps(&dir, ScriptedProvider::new(credentials_script)));
        let t1 = ThreadId::from("t1");
        let t2 = ThreadId::from("t2");

        assert!(!runtime.respond(&t1, Uuid::new_v4(), json!("x")).await.unwrap());
        let id = match runtime.run(&t1, "Check").await.unwrap() {
            RunOutcome::Suspended { interrupt_id, .. } => interrupt_id,
            other => panic!("unexpected: {:?}", other),
        };
        runtime.run(&t2, "Other").await.unwrap();
        assert!(!runtime.respond(&t2, id, json!("x")).await.unwrap());
        assert!(runtime.respond(&t1, id, json!("x")).await.unwrap());
    }

    #[tokio::test]
    async fn test_tool_errors_become_content_and_iterations_are_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(|_| {
            Ok(calls(vec![("c", "read_file", json!({"file_path": "/artifacts/missing.txt"}))]))
        });
        let mut deps = deps(&dir, provider.clone());
        let mut config = (*deps.config).clone();
        config.agent.max_tool_iterations = 3;
        deps.config = Arc::new(config);
        let runtime = AgentRuntime::new(deps);
        let t1 = ThreadId::from("t1");

        assert_eq!(
            runtime.run(&t1, "Read it").await.unwrap(),
            RunOutcome::Completed("I've reached the maximum number of tool iterations.".to_string())
        );
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
        let state = runtime.checkpoint(&t1).await.unwrap().unwrap().state;
        let first_result = state.messages.iter().find(|m| m.role == "tool").unwrap();
        assert!(first_result.content.starts_with("Error: "));
    }

    #[tokio::test]
    async fn test_finished_subagent_is_not_resumed() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(|_| Ok(text("ran again")));
        let handle = RuntimeSpawnHandle::new(deps(&dir, provider.clone()));
        let mut status = SubagentStatus::new("sub-1", "alpha", "Do alpha");
        status.status = SubagentState::Completed;

        let delegation = handle
            .resume(&ThreadId::from("parent"), status, json!("late answer"))
            .await
            .unwrap();
        assert_eq!(delegation.status.status, SubagentState::Completed);
        assert!(matches!(delegation.result, DelegationResult::Failed(_)));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_reasoning_is_kept_as_current_thought() {
        let dir = tempfile::tempdir().unwrap();
        let provider = ScriptedProvider::new(|messages| {
            if last(messages).role == "tool" {
                return Ok(text("nothing there"));
            }
            let mut response = calls(vec![("c", "read_file", json!({"file_path": "/artifacts/missing.txt"}))]);
            response.content = Some("Checking the notes file first".to_string());
            Ok(response)
        });
        let runtime = AgentRuntime::new(deps(&dir, provider));
        let t1 = ThreadId::from("t1");

        runtime.run(&t1, "Read it").await.unwrap();
        let state = runtime.checkpoint(&t1).await.unwrap().unwrap().state;
        let thought = state.current_thought.unwrap();
        assert_eq!(thought.content, "Checking the notes file first");
        assert!(thought.is_complete);
    }

    #[tokio::test]
    async fn test_llm_failure_is_retried_then_reported() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = Arc::new(Mutex::new(0u32));
        let seen = attempts.clone();
        let provider = ScriptedProvider::new(move |_| {
            let mut n = seen.lock().unwrap();
            *n += 1;
            if *n == 1 {
                Err(Error::Provider("503".to_string()))
            } else {
                Ok(text("recovered"))
            }
        });
        let runtime = AgentRuntime::new(deps(&dir, provider));
        let t1 = ThreadId::from("t1");
        assert_eq!(
            runtime.run(&t1, "hi").await.unwrap(),
            RunOutcome::Completed("recovered".to_string())
        );
        assert_eq!(*attempts.lock().unwrap(), 2);

        let failing = ScriptedProvider::new(|_| Err(Error::Provider("down".to_string())));
        let runtime = AgentRuntime::new(deps(&dir, failing.clone()));
        match runtime.run(&ThreadId::from("t2"), "hi").await.unwrap() {
            RunOutcome::Completed(text) => assert!(text.contains("down")),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
    }
}
