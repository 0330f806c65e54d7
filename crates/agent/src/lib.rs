pub mod broker;
pub mod context;
pub mod runtime;
pub mod subagent;

pub use broker::InterruptBroker;
pub use context::{ContextBuilder, PromptRole};
pub use runtime::{AgentRuntime, RunOutcome, RuntimeDeps};
pub use subagent::{RuntimeSpawnHandle, SubagentForwarder, SubagentResume};
