pub mod config;
pub mod error;
pub mod interrupt;
pub mod paths;
pub mod state;
pub mod types;

pub use config::Config;
pub use error::{Error, Result};
pub use interrupt::{InterruptKind, InterruptRequest, InterruptStatus, PendingInterrupt};
pub use paths::Paths;
pub use state::{AgentState, StateUpdate};
pub use types::ThreadId;
