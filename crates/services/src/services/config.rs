use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use utils::assets::asset_dir;

/// Service configuration, loaded from `config.json` in the asset
/// directory. Every field has a default so a missing or partial file
/// still yields a runnable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub chat: ChatConfig,
    pub agent: AgentConfig,
    pub execution: ExecutionConfig,
    pub retention: RetentionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8440,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the chat platform's web API.
    pub base_url: String,
    /// Bearer token; falls back to DISPATCHD_CHAT_TOKEN at startup.
    pub bot_token: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: "https://slack.com/api".to_string(),
            bot_token: None,
        }
    }
}

impl ChatConfig {
    pub fn resolved_token(&self) -> Option<String> {
        self.bot_token
            .clone()
            .or_else(|| std::env::var("DISPATCHD_CHAT_TOKEN").ok())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Program plus fixed arguments; the task description is appended.
    pub command: String,
    /// Hard cap on one agent run.
    pub timeout_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            command: "claude -p".to_string(),
            timeout_secs: 3600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Where project repositories are cloned; defaults to the asset dir.
    pub workspace_dir: Option<PathBuf>,
    /// Seconds between heartbeat stamps while an agent runs.
    pub heartbeat_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            workspace_dir: None,
            heartbeat_secs: 30,
        }
    }
}

impl ExecutionConfig {
    pub fn resolved_workspace_dir(&self) -> PathBuf {
        self.workspace_dir
            .clone()
            .unwrap_or_else(|| asset_dir().join("repos"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Terminal tasks kept before the oldest are pruned.
    pub max_terminal_tasks: i64,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_terminal_tasks: 200,
        }
    }
}

impl Config {
    pub fn load_or_default(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "config file is invalid, using defaults");
                    Config::default()
                }
            },
            Err(_) => Config::default(),
        }
    }
}
