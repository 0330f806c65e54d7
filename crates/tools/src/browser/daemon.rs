use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::driver::{args, CommandRunner, CommandSpec};

const DAEMON_PATTERN: &str = "agent-browser.*daemon";
const LIST_TIMEOUT: Duration = Duration::from_secs(5);
const SETTLE_DELAY: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonProcess {
    pub pid: u32,
    pub elapsed_secs: u64,
}

/// Best-effort cleanup of stray driver daemons.
///
/// When more than `max_daemons` are running the oldest surplus ones get
/// SIGTERM. Runs at most once per `interval` unless forced. Every failure
/// is swallowed.
pub struct DaemonJanitor {
    runner: Arc<dyn CommandRunner>,
    interval: Duration,
    max_daemons: usize,
    last_run: Mutex<Option<DateTime<Utc>>>,
}

impl DaemonJanitor {
    pub fn new(runner: Arc<dyn CommandRunner>, interval: Duration, max_daemons: usize) -> Self {
        Self {
            runner,
            interval,
            max_daemons,
            last_run: Mutex::new(None),
        }
    }

    /// Returns the number of processes signalled.
    pub async fn cleanup(&self, force: bool) -> usize {
        if !self.claim_slot(force, Utc::now()) {
            return 0;
        }

        let daemons = self.list_daemons().await;
        if daemons.len() <= self.max_daemons {
            debug!(count = daemons.len(), "Driver daemon count within limit");
            return 0;
        }

        let surplus = oldest_surplus(daemons, self.max_daemons);
        let mut killed = 0;
        for daemon in &surplus {
            let result = self
                .runner
                .run(
                    CommandSpec::new("kill", args(&["-TERM", &daemon.pid.to_string()])),
                    LIST_TIMEOUT,
                )
                .await;
            if result.success {
                killed += 1;
            } else {
                warn!(pid = daemon.pid, error = result.error_text(), "Failed to stop stray driver daemon");
            }
        }
        if killed > 0 {
            info!(killed, "Stopped stray driver daemons");
            tokio::time::sleep(SETTLE_DELAY).await;
        }
        killed
    }

    fn claim_slot(&self, force: bool, now: DateTime<Utc>) -> bool {
        let mut last = self.last_run.lock().unwrap_or_else(PoisonError::into_inner);
        let interval = ChronoDuration::from_std(self.interval).unwrap_or_else(|_| ChronoDuration::zero());
        if !force {
            if let Some(prev) = *last {
                if now - prev < interval {
                    return false;
                }
            }
        }
        *last = Some(now);
        true
    }

    async fn list_daemons(&self) -> Vec<DaemonProcess> {
        let found = self
            .runner
            .run(CommandSpec::new("pgrep", args(&["-f", DAEMON_PATTERN])), LIST_TIMEOUT)
            .await;
        // pgrep exits 1 when nothing matches
        if !found.success {
            return Vec::new();
        }
        let pids: Vec<String> = found
            .output
            .split_whitespace()
            .filter(|p| p.parse::<u32>().is_ok())
            .map(str::to_string)
            .collect();
        if pids.is_empty() {
            return Vec::new();
        }

        let ps = self
            .runner
            .run(
                CommandSpec::new("ps", args(&["-o", "pid=,etime=", "-p", &pids.join(",")])),
                LIST_TIMEOUT,
            )
            .await;
        if !ps.success {
            return Vec::new();
        }
        parse_ps_output(&ps.output)
    }
}

fn oldest_surplus(mut daemons: Vec<DaemonProcess>, keep: usize) -> Vec<DaemonProcess> {
    daemons.sort_by(|a, b| b.elapsed_secs.cmp(&a.elapsed_secs));
    let surplus = daemons.len().saturating_sub(keep);
    daemons.truncate(surplus);
    daemons
}

pub(crate) fn parse_ps_output(output: &str) -> Vec<DaemonProcess> {
    output
        .lines()
        .filter_map(|line| {
            let mut cols = line.split_whitespace();
            let pid = cols.next()?.parse().ok()?;
            let elapsed_secs = parse_etime(cols.next()?)?;
            Some(DaemonProcess { pid, elapsed_secs })
        })
        .collect()
}

/// `ps` elapsed time: `[[dd-]hh:]mm:ss`.
pub(crate) fn parse_etime(etime: &str) -> Option<u64> {
    let (days, clock) = match etime.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, etime),
    };
    let parts: Vec<u64> = clock
        .split(':')
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<_>>>()?;
    let (h, m, s) = match parts.as_slice() {
        [m, s] => (0, *m, *s),
        [h, m, s] => (*h, *m, *s),
        _ => return None,
    };
    Some(days * 86_400 + h * 3_600 + m * 60 + s)
}
