//! Configuration loading for conduit.
//!
//! TOML file with a three-tier search order: an environment variable
//! override, then a local `./config.toml`, then
//! `~/.config/conduit/config.toml`. Every section is
//! optional; missing sections fall back to their `Default` impl so a bare
//! `config.toml` (or no file at all) still produces a runnable config.

use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Top-level conduit configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub mcp: Option<McpConfigSection>,
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// How to invoke the assistant CLI child process.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AssistantConfig {
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: Vec<(String, String)>,
    #[serde(default = "default_ask_deadline_secs")]
    pub ask_deadline_secs: u64,
}

/// Session registry defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_session_name")]
    pub default_name: String,
    #[serde(default = "default_workdir_root")]
    pub workdir_root: PathBuf,
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

/// Admission queue defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_depth")]
    pub depth: usize,
}

/// History store defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct HistoryConfig {
    #[serde(default)]
    pub database_url: Option<String>,
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
}

/// MCP config-injection settings (the Notion integration side-effect).
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct McpConfigSection {
    /// Env var holding the token to inject. If unset or empty, the
    /// injector is a no-op.
    #[serde(default = "default_token_var")]
    pub token_var: String,
    /// Path to the assistant's per-user JSON config file. Defaults to
    /// `~/.claude.json`-style resolution performed by the injector itself.
    #[serde(default)]
    pub config_path: Option<PathBuf>,
    /// Name of the injected `mcpServers` entry.
    #[serde(default = "default_mcp_server_name")]
    pub server_name: String,
    /// Launcher command for the MCP server process.
    #[serde(default = "default_mcp_launcher")]
    pub launcher: String,
    /// Extra args passed to the launcher.
    #[serde(default)]
    pub launcher_args: Vec<String>,
}

/// Telegram transport settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct TelegramConfig {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub allowed_users: Vec<u64>,
    #[serde(default = "default_inline_limit")]
    pub inline_limit: usize,
}

/// Rolling file logging configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    pub directory: String,
    #[serde(default = "default_rotation")]
    pub rotation: String,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_binary() -> PathBuf {
    PathBuf::from("assistant")
}
fn default_ask_deadline_secs() -> u64 {
    120
}
fn default_session_name() -> String {
    "default".to_string()
}
fn default_workdir_root() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".conduit/sessions")
}
pub(crate) fn default_max_sessions() -> usize {
    32
}
fn default_workers() -> usize {
    5
}
fn default_depth() -> usize {
    1024
}
fn default_ring_capacity() -> usize {
    100
}
fn default_token_var() -> String {
    "NOTION_TOKEN".to_string()
}
fn default_mcp_server_name() -> String {
    "notion".to_string()
}
fn default_mcp_launcher() -> String {
    "npx".to_string()
}
fn default_inline_limit() -> usize {
    3000
}
fn default_rotation() -> String {
    "daily".to_string()
}
fn default_max_files() -> usize {
    14
}

impl Default for Config {
    fn default() -> Self {
        Self {
            assistant: AssistantConfig::default(),
            session: SessionConfig::default(),
            queue: QueueConfig::default(),
            history: HistoryConfig::default(),
            mcp: None,
            telegram: None,
            logging: None,
        }
    }
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            args: Vec::new(),
            env: Vec::new(),
            ask_deadline_secs: default_ask_deadline_secs(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            default_name: default_session_name(),
            workdir_root: default_workdir_root(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            depth: default_depth(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            ring_capacity: default_ring_capacity(),
        }
    }
}

impl Default for McpConfigSection {
    fn default() -> Self {
        Self {
            token_var: default_token_var(),
            config_path: None,
            server_name: default_mcp_server_name(),
            launcher: default_mcp_launcher(),
            launcher_args: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from the filesystem.
    ///
    /// Priority order:
    /// 1. `CONDUIT_CONFIG` environment variable
    /// 2. `./config.toml` (local directory)
    /// 3. `~/.config/conduit/config.toml` (user config)
    ///
    /// An explicit `path` (e.g. from a `--config` CLI flag) takes priority
    /// over all three. Returns the default config if nothing is found.
    pub fn load(path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        if let Some(path) = path {
            return Self::load_from(path);
        }

        if let Ok(path) = std::env::var("CONDUIT_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                return Self::load_from(p);
            }
        }

        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Self::load_from(local);
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/conduit/config.toml");
            if user_config.exists() {
                return Self::load_from(user_config);
            }
        }

        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_defaults() {
        let config = Config::default();
        assert_eq!(config.session.default_name, "default");
        assert_eq!(config.queue.workers, 5);
        assert_eq!(config.queue.depth, 1024);
        assert_eq!(config.history.ring_capacity, 100);
        assert!(config.mcp.is_none());
        assert!(config.telegram.is_none());
    }

    #[test]
    fn parses_minimal_toml() {
        let toml = r#"
[assistant]
binary = "/usr/local/bin/assistant"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.assistant.binary, PathBuf::from("/usr/local/bin/assistant"));
        assert_eq!(config.assistant.ask_deadline_secs, 120);
    }

    #[test]
    fn parses_full_toml() {
        let toml = r#"
[assistant]
binary = "/usr/local/bin/assistant"
args = ["--no-interactive"]
ask_deadline_secs = 60

[session]
default_name = "main"
workdir_root = "/srv/conduit/sessions"
max_sessions = 8

[queue]
workers = 3
depth = 100

[history]
database_url = "sqlite:history.db"
ring_capacity = 50

[mcp]
token_var = "NOTION_TOKEN"

[telegram]
token = "123:abc"
allowed_users = [42]

[logging]
directory = "/var/log/conduit"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.session.default_name, "main");
        assert_eq!(config.session.max_sessions, 8);
        assert_eq!(config.queue.workers, 3);
        assert_eq!(config.queue.depth, 100);
        assert_eq!(
            config.history.database_url.as_deref(),
            Some("sqlite:history.db")
        );
        assert_eq!(config.mcp.unwrap().token_var, "NOTION_TOKEN");
        assert_eq!(config.telegram.as_ref().unwrap().allowed_users, vec![42]);
        assert_eq!(
            config.logging.as_ref().unwrap().directory,
            "/var/log/conduit"
        );
    }

    #[test]
    fn empty_toml_uses_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_from_nonexistent_file_errors() {
        let result = Config::load_from("/nonexistent/path/config.toml");
        assert!(matches!(result, Err(ConfigError::IoError { .. })));
    }

    #[test]
    fn load_from_invalid_toml_errors() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("conduit_bad_config_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, "not = [").unwrap();
        let result = Config::load_from(&path);
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn explicit_path_wins_over_search_order() {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("conduit_explicit_config_{}.toml", uuid::Uuid::new_v4()));
        std::fs::write(&path, r#"[session]
default_name = "explicit"
"#)
        .unwrap();
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.session.default_name, "explicit");
        let _ = std::fs::remove_file(&path);
    }
}
