// ABOUTME: Configuration parsing from TOML file with environment variable overrides
// ABOUTME: Validates fields and provides sensible defaults for everything optional
use crate::paths;
use anyhow::{Context, Result};
use newhorse_runner::backends::agentic::AgenticConfig;
use newhorse_runner::backends::completion::CompletionConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    /// Agent CLI settings for anthropic-protocol providers
    #[serde(default)]
    pub agent: AgenticConfig,
    /// HTTP settings for openai-protocol providers
    #[serde(default)]
    pub completion: CompletionConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Holds the SQLite database and logs
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Parent of per-project working directories. Defaults to `{data_dir}/projects`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub projects_root: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            projects_root: None,
        }
    }
}

fn default_data_dir() -> String {
    paths::data_dir().to_string_lossy().to_string()
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct SecurityConfig {
    /// Fernet key used to encrypt stored credentials. Unset means pass-through.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encryption_key: Option<String>,
}

// Custom Debug impl to redact the encryption key
impl std::fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityConfig")
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Prepended to every request (completion) or appended to the agent prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    /// Prior turns replayed to stateless backends
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    /// Default page size for conversation replay
    #[serde(default = "default_replay_limit")]
    pub replay_limit: usize,
    /// Outbound queue depth per WebSocket connection
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            history_limit: default_history_limit(),
            replay_limit: default_replay_limit(),
            outbound_buffer: default_outbound_buffer(),
        }
    }
}

fn default_history_limit() -> usize {
    20
}

fn default_replay_limit() -> usize {
    50
}

fn default_outbound_buffer() -> usize {
    256
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Also write a daily rolling log file under `{data_dir}/logs`
    #[serde(default)]
    pub file: bool,
}

fn parse_env<T: std::str::FromStr>(name: &str, val: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    val.parse::<T>()
        .map_err(|e| anyhow::anyhow!("{} must be a valid number, got: {} ({})", name, val, e))
}

impl Config {
    /// Find the config file, checking multiple locations in order:
    /// 1. NEWHORSE_CONFIG_PATH env var (if set)
    /// 2. ./config.toml (current directory - for development)
    /// 3. ~/.config/newhorse/config.toml (XDG config dir)
    fn find_config_file() -> Option<PathBuf> {
        if let Ok(env_path) = std::env::var("NEWHORSE_CONFIG_PATH") {
            let path = PathBuf::from(&env_path);
            if path.exists() {
                return Some(path);
            }
        }

        let local_config = PathBuf::from("config.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        let xdg_config = paths::config_file();
        if xdg_config.exists() {
            return Some(xdg_config);
        }

        None
    }

    /// Parse a TOML document without applying environment overrides
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str::<Config>(content).context("Failed to parse configuration")
    }

    /// Load configuration from config.toml with environment variable overrides
    pub fn load() -> Result<Self> {
        let mut config = if let Some(config_path) = Self::find_config_file() {
            tracing::info!(
                path = %config_path.display(),
                "Loading configuration from file"
            );
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            toml::from_str::<Config>(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?
        } else {
            tracing::info!("No config file found, using environment variables and defaults");
            Config::default()
        };

        config.apply_env_overrides()?;
        config.storage.data_dir = paths::expand_home(&config.storage.data_dir);
        if let Some(ref root) = config.storage.projects_root {
            config.storage.projects_root = Some(paths::expand_home(root));
        }
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(val) = std::env::var("NEWHORSE_HOST") {
            self.server.host = val;
        }
        if let Ok(val) = std::env::var("NEWHORSE_PORT") {
            self.server.port = val.parse().with_context(|| {
                format!("NEWHORSE_PORT must be a valid port number, got: {}", val)
            })?;
        }
        if let Ok(val) = std::env::var("NEWHORSE_DATA_DIR") {
            self.storage.data_dir = val;
        }
        if let Ok(val) = std::env::var("PROJECTS_ROOT") {
            self.storage.projects_root = Some(val);
        }
        if let Ok(val) = std::env::var("ENCRYPTION_KEY") {
            if !val.trim().is_empty() {
                self.security.encryption_key = Some(val);
            }
            // Clear from environment so child agent processes never inherit it
            std::env::remove_var("ENCRYPTION_KEY");
        }
        if let Ok(val) = std::env::var("CLAUDE_BINARY") {
            self.agent.binary = val;
        }
        if let Ok(val) = std::env::var("AGENT_TIMEOUT_SECS") {
            self.agent.timeout_secs = parse_env("AGENT_TIMEOUT_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("COMPLETION_IDLE_TIMEOUT_SECS") {
            self.completion.idle_timeout_secs = parse_env("COMPLETION_IDLE_TIMEOUT_SECS", &val)?;
        }
        if let Ok(val) = std::env::var("NEWHORSE_SYSTEM_PROMPT") {
            self.chat.system_prompt = Some(val);
        }
        if let Ok(val) = std::env::var("NEWHORSE_LOG_JSON") {
            self.logging.json = matches!(val.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Reject values that cannot work at runtime
    pub fn validate(&self) -> Result<()> {
        if self.server.host.trim().is_empty() {
            anyhow::bail!("server.host is required (set in config.toml or NEWHORSE_HOST env var)");
        }
        if self.storage.data_dir.trim().is_empty() {
            anyhow::bail!("storage.data_dir must not be empty");
        }
        if self.agent.binary.trim().is_empty() {
            anyhow::bail!("agent.binary must not be empty");
        }
        if self.agent.timeout_secs == 0 {
            anyhow::bail!("agent.timeout_secs must be greater than zero");
        }
        if self.completion.idle_timeout_secs == 0 || self.completion.connect_timeout_secs == 0 {
            anyhow::bail!("completion timeouts must be greater than zero");
        }
        if self.chat.replay_limit == 0 {
            anyhow::bail!("chat.replay_limit must be greater than zero");
        }
        if self.chat.outbound_buffer == 0 {
            anyhow::bail!("chat.outbound_buffer must be greater than zero");
        }
        Ok(())
    }

    /// SQLite database location
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir).join("newhorse.db")
    }

    pub fn log_dir(&self) -> PathBuf {
        PathBuf::from(&self.storage.data_dir).join("logs")
    }

    pub fn projects_root(&self) -> PathBuf {
        match self.storage.projects_root {
            Some(ref root) => PathBuf::from(root),
            None => PathBuf::from(&self.storage.data_dir).join("projects"),
        }
    }

    /// Working directory for a project: its own `repo_path`, else `{projects_root}/{id}`
    pub fn working_dir_for(&self, project_id: &str, repo_path: Option<&str>) -> PathBuf {
        match repo_path.filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => self.projects_root().join(project_id),
        }
    }
}
