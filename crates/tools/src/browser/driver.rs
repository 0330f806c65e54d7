//! External browser-driver invocation.
//!
//! Every command is its own process: `<driver> --session <thread> <verb> ...`
//! (or `--cdp <port>` when attached to an externally managed browser). The
//! caller enforces the wall-clock timeout and kills the child when it fires.

use async_trait::async_trait;
use browser_agent_core::config::BrowserConfig;
use browser_agent_core::ThreadId;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub const STREAM_PORT_ENV: &str = "AGENT_BROWSER_STREAM_PORT";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl CommandSpec {
    pub fn new(program: &str, args: Vec<String>) -> Self {
        Self {
            program: program.to_string(),
            args,
            env: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl CommandResult {
    pub fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }

    pub fn error_text(&self) -> &str {
        self.error.as_deref().unwrap_or("unknown error")
    }
}

/// Runs one external process to completion or timeout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, spec: CommandSpec, timeout: Duration) -> CommandResult;
}

/// Spawns real processes with `tokio::process`.
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: CommandSpec, timeout: Duration) -> CommandResult {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child.
        match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(Ok(output)) => {
                let stdout = String::from_utf8_lossy(&output.stdout).to_string();
                if output.status.success() {
                    CommandResult::ok(stdout)
                } else {
                    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    CommandResult {
                        success: false,
                        output: stdout,
                        error: Some(if stderr.is_empty() {
                            format!("exited with {}", output.status)
                        } else {
                            stderr
                        }),
                    }
                }
            }
            Ok(Err(e)) => CommandResult::failure(e.to_string()),
            Err(_) => CommandResult::failure(format!(
                "Command timed out after {} seconds",
                timeout.as_secs()
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverTarget {
    /// One isolated driver session per thread.
    Session,
    /// Attach to an external browser on this CDP port.
    Cdp(u16),
}

/// Builds and runs driver commands for a thread.
pub struct CommandExecutor {
    binary: String,
    target: DriverTarget,
    default_timeout: Duration,
    runner: Arc<dyn CommandRunner>,
}

impl CommandExecutor {
    pub fn new(config: &BrowserConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            binary: config.driver_binary.clone(),
            target: if config.use_cdp {
                DriverTarget::Cdp(config.cdp_port)
            } else {
                DriverTarget::Session
            },
            default_timeout: Duration::from_secs(config.command_timeout_secs),
            runner,
        }
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn command_for(&self, thread_id: &ThreadId, parts: &[String], stream_port: Option<u16>) -> CommandSpec {
        let mut args = match self.target {
            DriverTarget::Session => vec!["--session".to_string(), thread_id.to_string()],
            DriverTarget::Cdp(port) => vec!["--cdp".to_string(), port.to_string()],
        };
        args.extend(parts.iter().cloned());
        let mut spec = CommandSpec::new(&self.binary, args);
        if let Some(port) = stream_port {
            spec.env.push((STREAM_PORT_ENV.to_string(), port.to_string()));
        }
        spec
    }

    pub async fn run(
        &self,
        thread_id: &ThreadId,
        parts: &[String],
        timeout: Duration,
        stream_port: Option<u16>,
    ) -> CommandResult {
        let spec = self.command_for(thread_id, parts, stream_port);
        debug!(thread_id = %thread_id, verb = parts.first().map(String::as_str).unwrap_or(""), "Running driver command");
        let result = self.runner.run(spec, timeout).await;
        if !result.success {
            warn!(thread_id = %thread_id, error = result.error_text(), "Driver command failed");
        }
        result
    }
}

/// `["click", "@e1"]` style argument lists.
pub fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::sync::Mutex;

    type Respond = dyn Fn(&CommandSpec) -> CommandResult + Send + Sync;
    type Delay = dyn Fn(&CommandSpec) -> Duration + Send + Sync;

    /// Records every spec and answers from a closure, optionally after a delay.
    pub struct FakeRunner {
        pub calls: Mutex<Vec<CommandSpec>>,
        respond: Box<Respond>,
        delay: Box<Delay>,
    }

    impl FakeRunner {
        pub fn new<F>(respond: F) -> Arc<Self>
        where
            F: Fn(&CommandSpec) -> CommandResult + Send + Sync + 'static,
        {
            Self::with_delay(respond, |_| Duration::ZERO)
        }

        pub fn with_delay<F, D>(respond: F, delay: D) -> Arc<Self>
        where
            F: Fn(&CommandSpec) -> CommandResult + Send + Sync + 'static,
            D: Fn(&CommandSpec) -> Duration + Send + Sync + 'static,
        {
            Arc::new(Self {
                calls: Mutex::new(Vec::new()),
                respond: Box::new(respond),
                delay: Box::new(delay),
            })
        }

        pub fn succeeding() -> Arc<Self> {
            Self::new(|_| CommandResult::ok(""))
        }

        pub fn calls(&self) -> Vec<CommandSpec> {
            self.calls.lock().unwrap().clone()
        }

        /// Driver verbs seen so far, with the session/cdp prefix stripped.
        pub fn verbs(&self) -> Vec<String> {
            self.calls()
                .iter()
                .filter_map(|c| c.args.get(2).cloned())
                .collect()
        }
    }

    #[async_trait]
    impl CommandRunner for FakeRunner {
        async fn run(&self, spec: CommandSpec, _timeout: Duration) -> CommandResult {
            let delay = (self.delay)(&spec);
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            let result = (self.respond)(&spec);
            self.calls.lock().unwrap().push(spec);
            result
        }
    }
}
