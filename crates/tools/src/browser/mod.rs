//! Browser runtime: one driver session per thread, deterministic stream
//! ports, a background idle reaper and best-effort daemon cleanup.

pub mod daemon;
pub mod driver;
pub mod output;
pub mod ports;
pub mod reaper;
pub mod session;
pub mod stream;
pub mod tool;

use browser_agent_core::config::BrowserConfig;
use browser_agent_core::{Paths, ThreadId};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use daemon::DaemonJanitor;
pub use driver::{CommandExecutor, CommandResult, CommandRunner, CommandSpec, ProcessRunner};
pub use output::{BrowserToolOutput, OutputSpill};
pub use ports::PortAllocator;
pub use reaper::IdleReaper;
pub use session::{BrowserSession, CloseOutcome, OpenedSession, SessionRegistry};
pub use tool::BrowserTool;

/// Everything the browser tool needs, shared by all threads of a process.
pub struct BrowserRuntime {
    config: BrowserConfig,
    paths: Paths,
    registry: Arc<SessionRegistry>,
    reaper: Arc<IdleReaper>,
    janitor: DaemonJanitor,
    spill: OutputSpill,
}

impl BrowserRuntime {
    pub fn new(config: &BrowserConfig, paths: Paths) -> Self {
        Self::with_runner(config, paths, Arc::new(ProcessRunner))
    }

    pub fn with_runner(config: &BrowserConfig, paths: Paths, runner: Arc<dyn CommandRunner>) -> Self {
        let executor = Arc::new(CommandExecutor::new(config, runner.clone()));
        let registry = Arc::new(SessionRegistry::new(
            PortAllocator::new(config.base_stream_port, config.max_port_offset),
            executor,
        ));
        let reaper = Arc::new(IdleReaper::new(
            registry.clone(),
            Duration::from_secs(config.idle_timeout_secs),
            Duration::from_secs(config.reaper_interval_secs.max(1)),
        ));
        let janitor = DaemonJanitor::new(
            runner,
            Duration::from_secs(config.daemon_cleanup_interval_secs),
            config.max_daemons,
        );
        let spill = OutputSpill::new(paths.clone(), config.max_output_chars);
        Self {
            config: config.clone(),
            paths,
            registry,
            reaper,
            janitor,
            spill,
        }
    }

    pub fn config(&self) -> &BrowserConfig {
        &self.config
    }

    pub fn paths(&self) -> &Paths {
        &self.paths
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn reaper(&self) -> &Arc<IdleReaper> {
        &self.reaper
    }

    pub fn janitor(&self) -> &DaemonJanitor {
        &self.janitor
    }

    pub fn spill(&self) -> &OutputSpill {
        &self.spill
    }

    /// Start the idle reaper if it is not already running.
    pub fn ensure_reaper(&self) -> bool {
        let started = self.reaper.start();
        if started {
            info!("Idle reaper started on first browser use");
        }
        started
    }

    pub async fn close_thread(&self, thread_id: &ThreadId) -> CloseOutcome {
        self.registry.close(thread_id).await
    }

    /// Stop the reaper and close every open session.
    pub async fn shutdown(&self) {
        self.reaper.stop().await;
        for session in self.registry.active_sessions().await {
            let thread_id = ThreadId::from(session.session_id.as_str());
            if let CloseOutcome::Closed(result) = self.registry.close(&thread_id).await {
                if !result.success {
                    warn!(thread_id = %thread_id, error = result.error_text(), "Close during shutdown failed");
                }
            }
        }
    }
}
