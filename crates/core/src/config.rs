use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Set for Azure OpenAI deployments; switches URL layout and auth header.
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_model() -> String {
    "gpt-4o".to_string()
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_temperature() -> f32 {
    1.0
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            api_version: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    #[serde(default = "default_max_subagent_iterations")]
    pub max_subagent_iterations: u32,
    #[serde(default = "default_llm_max_retries")]
    pub llm_max_retries: u32,
    #[serde(default = "default_llm_retry_delay_ms")]
    pub llm_retry_delay_ms: u64,
}

fn default_max_tool_iterations() -> u32 {
    40
}

fn default_max_subagent_iterations() -> u32 {
    20
}

fn default_llm_max_retries() -> u32 {
    3
}

fn default_llm_retry_delay_ms() -> u64 {
    2000
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            max_tool_iterations: default_max_tool_iterations(),
            max_subagent_iterations: default_max_subagent_iterations(),
            llm_max_retries: default_llm_max_retries(),
            llm_retry_delay_ms: default_llm_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserConfig {
    #[serde(default = "default_driver_binary")]
    pub driver_binary: String,
    /// Attach to an externally managed browser over CDP instead of per-thread sessions.
    #[serde(default)]
    pub use_cdp: bool,
    #[serde(default = "default_cdp_port")]
    pub cdp_port: u16,
    #[serde(default = "default_base_stream_port")]
    pub base_stream_port: u16,
    #[serde(default = "default_max_port_offset")]
    pub max_port_offset: u16,
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
    #[serde(default = "default_stream_ready_timeout_secs")]
    pub stream_ready_timeout_secs: u64,
    #[serde(default = "default_daemon_cleanup_interval_secs")]
    pub daemon_cleanup_interval_secs: u64,
    #[serde(default = "default_max_daemons")]
    pub max_daemons: usize,
    /// Outputs longer than this are spilled to `artifacts/tool_outputs`.
    #[serde(default = "default_max_output_chars")]
    pub max_output_chars: usize,
}

fn default_driver_binary() -> String {
    "agent-browser".to_string()
}

fn default_cdp_port() -> u16 {
    9222
}

fn default_base_stream_port() -> u16 {
    9223
}

fn default_max_port_offset() -> u16 {
    1000
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    300
}

fn default_reaper_interval_secs() -> u64 {
    10
}

fn default_stream_ready_timeout_secs() -> u64 {
    5
}

fn default_daemon_cleanup_interval_secs() -> u64 {
    60
}

fn default_max_daemons() -> usize {
    3
}

fn default_max_output_chars() -> usize {
    1000
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            driver_binary: default_driver_binary(),
            use_cdp: false,
            cdp_port: default_cdp_port(),
            base_stream_port: default_base_stream_port(),
            max_port_offset: default_max_port_offset(),
            command_timeout_secs: default_command_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            reaper_interval_secs: default_reaper_interval_secs(),
            stream_ready_timeout_secs: default_stream_ready_timeout_secs(),
            daemon_cleanup_interval_secs: default_daemon_cleanup_interval_secs(),
            max_daemons: default_max_daemons(),
            max_output_chars: default_max_output_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecConfig {
    #[serde(default = "default_exec_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_exec_timeout_secs() -> u64 {
    300
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_exec_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    Sqlite,
    Postgres,
}

impl std::str::FromStr for CheckpointBackend {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" => Ok(CheckpointBackend::Sqlite),
            "postgres" | "postgresql" => Ok(CheckpointBackend::Postgres),
            other => Err(Error::Config(format!("unknown checkpoint backend: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointConfig {
    #[serde(default)]
    pub backend: CheckpointBackend,
    /// Defaults to `checkpoints/browser_agent.db` under the sandbox root.
    #[serde(default)]
    pub sqlite_path: Option<PathBuf>,
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
}

fn default_pool_size() -> u32 {
    10
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            backend: CheckpointBackend::Sqlite,
            sqlite_path: None,
            database_url: None,
            pool_size: default_pool_size(),
        }
    }
}

impl CheckpointConfig {
    pub fn sqlite_path(&self, paths: &Paths) -> PathBuf {
        self.sqlite_path
            .clone()
            .unwrap_or_else(|| paths.checkpoint_db())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_with(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup. Empty values are ignored.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("CHECKPOINT_DB_TYPE") {
            self.checkpoint.backend = v.parse()?;
        }
        if let Some(v) = get("SQLITE_PATH") {
            self.checkpoint.sqlite_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("DATABASE_URL") {
            self.checkpoint.database_url = Some(v);
        }
        if let Some(v) = get("DB_POOL_SIZE") {
            self.checkpoint.pool_size = parse_env("DB_POOL_SIZE", &v)?;
        }
        if let Some(v) = get("AGENT_BROWSER_STREAM_PORT") {
            self.browser.base_stream_port = parse_env("AGENT_BROWSER_STREAM_PORT", &v)?;
        }
        if let Some(v) = get("AGENT_BROWSER_USE_CDP") {
            self.browser.use_cdp = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        if let Some(v) = get("AGENT_BROWSER_CDP_PORT") {
            self.browser.cdp_port = parse_env("AGENT_BROWSER_CDP_PORT", &v)?;
        }

        // Azure first: a deployment endpoint implies the Azure URL layout.
        if let Some(v) = get("AZURE_OPENAI_ENDPOINT") {
            self.provider.api_base = Some(v);
        } else if let Some(v) = get("OPENAI_API_BASE") {
            self.provider.api_base = Some(v);
        }
        if let Some(v) = get("AZURE_OPENAI_API_KEY").or_else(|| get("OPENAI_API_KEY")) {
            self.provider.api_key = v;
        }
        if let Some(v) = get("OPENAI_API_VERSION") {
            self.provider.api_version = Some(v);
        }
        if let Some(v) = get("DEPLOYMENT_NAME") {
            self.provider.model = v;
        }
        if let Some(v) = get("TEMPERATURE") {
            self.provider.temperature = parse_env("TEMPERATURE", &v)?;
        }
        Ok(())
    }

    /// Startup checks. Any failure here is fatal.
    pub fn validate(&self) -> Result<()> {
        if self.checkpoint.backend == CheckpointBackend::Postgres
            && self
                .checkpoint
                .database_url
                .as_deref()
                .map_or(true, |url| url.trim().is_empty())
        {
            return Err(Error::Config(
                "checkpoint backend is postgres but DATABASE_URL is not set".to_string(),
            ));
        }
        if self.browser.max_port_offset == 0 {
            return Err(Error::Config("browser.maxPortOffset must be positive".to_string()));
        }
        if u32::from(self.browser.base_stream_port) + u32::from(self.browser.max_port_offset)
            > u32::from(u16::MAX)
        {
            return Err(Error::Config(
                "browser.baseStreamPort + maxPortOffset exceeds the port range".to_string(),
            ));
        }
        if self.browser.command_timeout_secs == 0 || self.exec.timeout_secs == 0 {
            return Err(Error::Config("timeouts must be positive".to_string()));
        }
        if self.checkpoint.pool_size == 0 {
            return Err(Error::Config("checkpoint.poolSize must be positive".to_string()));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid value for {}: {}", key, value)))
}
