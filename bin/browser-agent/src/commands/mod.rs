pub mod forget;
pub mod init;
pub mod pending;
pub mod respond;
pub mod resume;
pub mod run;
pub mod status;

use browser_agent_agent::{AgentRuntime, InterruptBroker, RunOutcome, RuntimeDeps};
use browser_agent_core::{Config, Paths, PendingInterrupt};
use browser_agent_providers::{create_provider, Provider};
use browser_agent_storage::{open_checkpoint_store, AuditLogger};
use browser_agent_tools::BrowserRuntime;
use serde_json::Value;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

pub fn paths(root: Option<PathBuf>) -> Paths {
    match root {
        Some(root) => Paths::with_base(root),
        None => Paths::new(),
    }
}

pub fn load_config(paths: &Paths) -> anyhow::Result<Config> {
    let mut config = Config::load_or_default(paths)?;
    config.apply_env()?;
    config.validate()?;
    Ok(config)
}

/// Wire up every shared service for one process.
pub async fn build_runtime(paths: &Paths) -> anyhow::Result<AgentRuntime> {
    paths.ensure_dirs()?;
    let config = load_config(paths)?;
    let provider: Arc<dyn Provider> = Arc::new(create_provider(&config.provider)?);
    let store = open_checkpoint_store(&config.checkpoint, paths).await?;
    let browser = Arc::new(BrowserRuntime::new(&config.browser, paths.clone()));

    let deps = RuntimeDeps {
        config: Arc::new(config),
        paths: paths.clone(),
        provider,
        store,
        audit: Arc::new(AuditLogger::new(paths.clone())),
        broker: Arc::new(InterruptBroker::new()),
        browser,
    };
    Ok(AgentRuntime::new(deps))
}

/// Drive `fut` to completion unless Ctrl-C arrives first. Browser sessions
/// and the idle reaper are shut down either way.
pub async fn with_shutdown<T, F>(runtime: &AgentRuntime, fut: F) -> anyhow::Result<Option<T>>
where
    F: Future<Output = anyhow::Result<T>>,
{
    let result = tokio::select! {
        res = fut => Some(res),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting down browser sessions");
            None
        }
    };
    runtime.deps().browser.shutdown().await;
    info!("Browser runtime stopped");
    match result {
        Some(res) => Ok(Some(res?)),
        None => Ok(None),
    }
}

/// JSON when it parses, otherwise the raw text as a string.
pub fn parse_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    serde_json::from_str(trimmed).unwrap_or_else(|_| Value::String(trimmed.to_string()))
}

pub fn print_interrupt(pi: &PendingInterrupt) {
    println!("  [{}] {} from '{}' ({})", pi.kind, pi.id, pi.origin_name, pi.status);
    println!("      {}", pi.question());
}

pub fn print_outcome(outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed(text) => {
            println!();
            println!("{}", text);
        }
        RunOutcome::Suspended {
            interrupt_id,
            kind,
            origin,
            ..
        } => {
            println!();
            println!("⏸  Waiting for human input ({} from '{}')", kind, origin);
            println!("   {}", outcome.question().unwrap_or("(no question)"));
            println!("   id: {}", interrupt_id);
        }
        RunOutcome::NothingToResume => {
            println!("Nothing to resume.");
        }
    }
}
