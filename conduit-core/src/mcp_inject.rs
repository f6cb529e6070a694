//! `MCPConfigInjector` — idempotent read-merge-write of the assistant's
//! per-user MCP config file.
//!
//! Path resolution follows the same precedence used elsewhere in this
//! crate: an environment variable override, then a configured path, then
//! a `~/.config/<app>/...`-style default. The merge operates on
//! `serde_json::Value` rather than a typed struct so unrelated keys in the
//! user's existing file (other `mcpServers` entries, unrelated top-level
//! settings) survive untouched. The write is atomic (write to a temp file
//! in the same directory, then rename) and is skipped entirely if the
//! merged document is byte-for-byte identical to what's already on disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::McpInjectError;

/// Env var consulted before `config_path`.
pub const CONFIG_PATH_ENV: &str = "CONDUIT_MCP_CONFIG";

/// A single `mcpServers.<name>` entry, in the Claude-Desktop-compatible
/// shape (`command`, `args`, `env`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerEntry {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
}

/// What to inject: one named server entry.
#[derive(Debug, Clone)]
pub struct McpInjectionSpec {
    pub server_name: String,
    pub entry: McpServerEntry,
}

/// Injects a single MCP server entry into the assistant's JSON config.
pub struct McpConfigInjector {
    config_path: PathBuf,
}

impl McpConfigInjector {
    pub fn new(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// Resolve the config path: `CONDUIT_MCP_CONFIG` env var, then
    /// `configured_path`, then `~/.config/conduit/mcp_servers.json`.
    pub fn resolve(configured_path: Option<&Path>) -> Self {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.is_empty() {
                return Self::new(PathBuf::from(path));
            }
        }
        if let Some(path) = configured_path {
            return Self::new(path.to_path_buf());
        }
        let default = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".config/conduit/mcp_servers.json");
        Self::new(default)
    }

    /// Merge `spec` into the config file, creating it (and its parent
    /// directory) if it does not exist. No-op if the merged document is
    /// unchanged from what's already on disk (P7).
    pub fn inject(&self, spec: &McpInjectionSpec) -> Result<(), McpInjectError> {
        let mut root = self.read_existing()?;

        let entry_value =
            serde_json::to_value(&spec.entry).map_err(|e| McpInjectError::Write(e.to_string()))?;

        let servers = root
            .as_object_mut()
            .ok_or_else(|| McpInjectError::Read("config root is not a JSON object".to_string()))?
            .entry("mcpServers")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));

        let servers_obj = servers
            .as_object_mut()
            .ok_or_else(|| McpInjectError::Read("mcpServers is not a JSON object".to_string()))?;

        if servers_obj.get(&spec.server_name) == Some(&entry_value) {
            return Ok(());
        }

        servers_obj.insert(spec.server_name.clone(), entry_value);
        self.write_atomic(&root)
    }

    fn read_existing(&self) -> Result<Value, McpInjectError> {
        if !self.config_path.exists() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        let content = std::fs::read_to_string(&self.config_path)
            .map_err(|e| McpInjectError::Read(format!("{}: {e}", self.config_path.display())))?;
        if content.trim().is_empty() {
            return Ok(Value::Object(serde_json::Map::new()));
        }
        serde_json::from_str(&content)
            .map_err(|e| McpInjectError::Read(format!("{}: {e}", self.config_path.display())))
    }

    fn write_atomic(&self, value: &Value) -> Result<(), McpInjectError> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| McpInjectError::Write(format!("{}: {e}", parent.display())))?;
        }
        let serialized = serde_json::to_string_pretty(value)
            .map_err(|e| McpInjectError::Write(e.to_string()))?;

        let tmp_path = self.config_path.with_extension(format!(
            "tmp-{}",
            uuid::Uuid::new_v4().simple()
        ));
        std::fs::write(&tmp_path, serialized)
            .map_err(|e| McpInjectError::Write(format!("{}: {e}", tmp_path.display())))?;
        std::fs::rename(&tmp_path, &self.config_path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            McpInjectError::Write(format!("{}: {e}", self.config_path.display()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Guards tests that mutate `CONDUIT_MCP_CONFIG`.
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn tempfile() -> PathBuf {
        std::env::temp_dir().join(format!(
            "conduit-mcp-inject-test-{}-{}.json",
            std::process::id(),
            uuid::Uuid::new_v4()
        ))
    }

    fn spec(token: &str) -> McpInjectionSpec {
        McpInjectionSpec {
            server_name: "notion".to_string(),
            entry: McpServerEntry {
                command: "npx".to_string(),
                args: vec!["-y".to_string(), "@notionhq/notion-mcp-server".to_string()],
                env: HashMap::from([("NOTION_TOKEN".to_string(), token.to_string())]),
            },
        }
    }

    #[test]
    fn injects_into_missing_file() {
        let path = tempfile();
        let injector = McpConfigInjector::new(path.clone());
        injector.inject(&spec("secret-1")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            parsed["mcpServers"]["notion"]["command"],
            Value::String("npx".to_string())
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn preserves_unrelated_keys_and_servers() {
        let path = tempfile();
        std::fs::write(
            &path,
            r#"{"mcpServers": {"filesystem": {"command": "fs-server"}}, "otherSetting": true}"#,
        )
        .unwrap();

        let injector = McpConfigInjector::new(path.clone());
        injector.inject(&spec("secret-2")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed["otherSetting"], Value::Bool(true));
        assert_eq!(
            parsed["mcpServers"]["filesystem"]["command"],
            Value::String("fs-server".to_string())
        );
        assert_eq!(
            parsed["mcpServers"]["notion"]["command"],
            Value::String("npx".to_string())
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn idempotent_second_injection_is_noop() {
        let path = tempfile();
        let injector = McpConfigInjector::new(path.clone());
        injector.inject(&spec("secret-3")).unwrap();

        let mtime_before = std::fs::metadata(&path).unwrap().modified().unwrap();
        std::thread::sleep(std::time::Duration::from_millis(20));
        injector.inject(&spec("secret-3")).unwrap();
        let mtime_after = std::fs::metadata(&path).unwrap().modified().unwrap();

        assert_eq!(mtime_before, mtime_after);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn changed_token_rewrites_file() {
        let path = tempfile();
        let injector = McpConfigInjector::new(path.clone());
        injector.inject(&spec("secret-4")).unwrap();
        injector.inject(&spec("secret-5")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            parsed["mcpServers"]["notion"]["env"]["NOTION_TOKEN"],
            Value::String("secret-5".to_string())
        );
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn resolve_prefers_env_var() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let env_path = tempfile();
        unsafe { std::env::set_var(CONFIG_PATH_ENV, env_path.to_str().unwrap()) };

        let injector = McpConfigInjector::resolve(Some(Path::new("/nonexistent/configured.json")));
        assert_eq!(injector.config_path, env_path);

        unsafe { std::env::remove_var(CONFIG_PATH_ENV) };
    }

    #[test]
    fn resolve_falls_back_to_configured_path() {
        let _lock = ENV_MUTEX.lock().unwrap();
        unsafe { std::env::remove_var(CONFIG_PATH_ENV) };
        let configured = PathBuf::from("/tmp/configured-mcp.json");
        let injector = McpConfigInjector::resolve(Some(&configured));
        assert_eq!(injector.config_path, configured);
    }
}
