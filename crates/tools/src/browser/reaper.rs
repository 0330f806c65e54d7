use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::session::{CloseOutcome, SessionRegistry};

struct ReaperTask {
    shutdown: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

/// Closes browser sessions that have been idle past the timeout.
///
/// Started lazily on first browser use. `start` is idempotent and `stop`
/// waits for the loop to exit.
pub struct IdleReaper {
    registry: Arc<SessionRegistry>,
    idle_timeout: Duration,
    interval: Duration,
    task: Mutex<Option<ReaperTask>>,
}

impl IdleReaper {
    pub fn new(registry: Arc<SessionRegistry>, idle_timeout: Duration, interval: Duration) -> Self {
        Self {
            registry,
            idle_timeout,
            interval,
            task: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|t| !t.handle.is_finished())
            .unwrap_or(false)
    }

    /// Returns false if a loop was already running.
    pub fn start(self: &Arc<Self>) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().map(|t| !t.handle.is_finished()).unwrap_or(false) {
            return false;
        }
        let (shutdown, rx) = broadcast::channel(1);
        let handle = tokio::spawn(Arc::clone(self).run_loop(rx));
        *task = Some(ReaperTask { shutdown, handle });
        true
    }

    pub async fn stop(&self) {
        let task = self.task.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            let _ = task.shutdown.send(());
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Idle reaper task ended abnormally");
            }
        }
    }

    pub async fn sweep(&self) -> usize {
        self.sweep_at(Utc::now()).await
    }

    /// One pass: close every session idle at `now`. Each session is
    /// re-checked when its turn comes, since closing the ones before it can
    /// take a while. A failed close is logged and the pass moves on.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        let idle = self.registry.idle_sessions(self.idle_timeout, now).await;
        let mut closed = 0;
        for thread_id in idle {
            match self.registry.close_if_idle(&thread_id, self.idle_timeout, now).await {
                CloseOutcome::Closed(result) => {
                    closed += 1;
                    if result.success {
                        info!(thread_id = %thread_id, "Closed idle browser session");
                    } else {
                        warn!(thread_id = %thread_id, error = result.error_text(), "Idle session close reported an error");
                    }
                }
                CloseOutcome::AlreadyClosed => {
                    debug!(thread_id = %thread_id, "Idle session already closed");
                }
                CloseOutcome::StillActive => {
                    debug!(thread_id = %thread_id, "Session became active during sweep");
                }
            }
        }
        closed
    }

    async fn run_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            idle_timeout_secs = self.idle_timeout.as_secs(),
            interval_secs = self.interval.as_secs(),
            "Idle reaper started"
        );
        let mut interval = tokio::time::interval(self.interval);
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let closed = self.sweep().await;
                    if closed > 0 {
                        debug!(closed, "Idle reaper sweep finished");
                    }
                }
                _ = shutdown.recv() => {
                    info!("Idle reaper shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::driver::fake::FakeRunner;
    use crate::browser::driver::{self, CommandExecutor, CommandResult};
    use crate::browser::ports::PortAllocator;
    use browser_agent_core::config::BrowserConfig;
    use browser_agent_core::ThreadId;

    fn setup(runner: Arc<FakeRunner>) -> (Arc<SessionRegistry>, Arc<IdleReaper>) {
        let config = BrowserConfig::default();
        let registry = Arc::new(SessionRegistry::new(
            PortAllocator::new(config.base_stream_port, config.max_port_offset),
            Arc::new(CommandExecutor::new(&config, runner)),
        ));
        let reaper = Arc::new(IdleReaper::new(
            registry.clone(),
            Duration::from_secs(300),
            Duration::from_millis(20),
        ));
        (registry, reaper)
    }

    #[tokio::test]
    async fn test_sweep_closes_only_idle_sessions() {
        let (registry, reaper) = setup(FakeRunner::succeeding());
        let idle = ThreadId::from("idle");
        let fresh = ThreadId::from("fresh");
        registry.open(&idle).await;
        registry.open(&fresh).await;
        let now = Utc::now();
        registry.set_last_activity(&idle, now - chrono::Duration::seconds(301)).await;

        assert_eq!(reaper.sweep_at(now).await, 1);
        assert!(registry.get(&idle).await.is_none());
        assert!(registry.get(&fresh).await.unwrap().is_active);
    }

    #[tokio::test]
    async fn test_sweep_continues_after_close_failure() {
        let runner = FakeRunner::new(|spec| {
            if spec.args.get(1).map(String::as_str) == Some("a") {
                CommandResult::failure("close failed")
            } else {
                CommandResult::ok("")
            }
        });
        let (registry, reaper) = setup(runner);
        let now = Utc::now();
        for name in ["a", "b"] {
            let t = ThreadId::from(name);
            registry.open(&t).await;
            registry.set_last_activity(&t, now - chrono::Duration::seconds(900)).await;
        }

        assert_eq!(reaper.sweep_at(now).await, 2);
        assert!(registry.active_sessions().await.is_empty());
    }

    #[tokio::test]
    async fn test_activity_during_sweep_keeps_session() {
        let runner = FakeRunner::with_delay(
            |_| CommandResult::ok(""),
            |spec| {
                let is_a_close = spec.args.get(1).map(String::as_str) == Some("a")
                    && spec.args.get(2).map(String::as_str) == Some("close");
                if is_a_close {
                    Duration::from_millis(200)
                } else {
                    Duration::ZERO
                }
            },
        );
        let (registry, reaper) = setup(runner);
        let a = ThreadId::from("a");
        let b = ThreadId::from("b");
        let now = Utc::now();
        registry.open(&a).await;
        registry.open(&b).await;
        registry.set_last_activity(&a, now - chrono::Duration::seconds(900)).await;
        registry.set_last_activity(&b, now - chrono::Duration::seconds(600)).await;

        let use_b = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            registry.execute(&b, &driver::args(&["snapshot"]), false).await
        };
        let (closed, snapshot) = tokio::join!(reaper.sweep_at(now), use_b);

        assert!(snapshot.success);
        assert!(registry.get(&a).await.is_none());
        let b_session = registry.get(&b).await.unwrap();
        assert!(b_session.is_active);
        assert!(b_session.last_activity_at > now);
        assert_eq!(closed, 1);
    }

    #[tokio::test]
    async fn test_start_is_idempotent_and_stop_joins() {
        let (_registry, reaper) = setup(FakeRunner::succeeding());
        assert!(reaper.start());
        assert!(!reaper.start());
        assert!(reaper.is_running());
        reaper.stop().await;
        assert!(!reaper.is_running());
        // can be restarted after stop
        assert!(reaper.start());
        reaper.stop().await;
    }

    #[tokio::test]
    async fn test_background_loop_reaps() {
        let (registry, reaper) = setup(FakeRunner::succeeding());
        let t = ThreadId::from("stale");
        registry.open(&t).await;
        registry.set_last_activity(&t, Utc::now() - chrono::Duration::seconds(3600)).await;

        reaper.start();
        for _ in 0..50 {
            if registry.get(&t).await.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        reaper.stop().await;
        assert!(registry.get(&t).await.is_none());
    }

    #[tokio::test]
    async fn test_stop_without_start_is_noop() {
        let (_registry, reaper) = setup(FakeRunner::succeeding());
        reaper.stop().await;
        assert!(!reaper.is_running());
    }
}
