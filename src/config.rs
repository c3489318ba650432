use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::ProcessAgentConfig;
use crate::dirs;
use crate::error::{RelayError, Result};
use crate::tracker::DEFAULT_CODE_FORMAT;
use crate::transcript::highlight::DEFAULT_THEME;

/// User-configurable settings for the relay server and CLI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Host address for the HTTP server (default: 127.0.0.1)
    #[serde(default = "default_host")]
    pub host: String,

    /// Port for the HTTP server (default: 11436)
    #[serde(default = "default_port")]
    pub port: u16,

    /// Model id advertised on the OpenAI-compatible API
    #[serde(default = "default_model")]
    pub model: String,

    /// Format given to code blocks that arrive without one
    #[serde(default = "default_code_format")]
    pub default_code_format: String,

    /// Run every HTTP request against a private, empty history
    #[serde(default)]
    pub isolate_requests: bool,

    /// Syntax highlighting theme for the terminal transcript
    #[serde(default = "default_highlight_theme")]
    pub highlight_theme: String,

    /// Minimum time between redraws of the open transcript node
    #[serde(default = "default_redraw_interval_ms")]
    pub redraw_interval_ms: u64,

    /// Where the agent's conversation history is persisted, if anywhere
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_file: Option<PathBuf>,

    /// External agent command; the scripted demo agent is used when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent: Option<ProcessAgentConfig>,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    11436
}

fn default_model() -> String {
    "a3s-relay".to_string()
}

fn default_code_format() -> String {
    DEFAULT_CODE_FORMAT.to_string()
}

fn default_highlight_theme() -> String {
    DEFAULT_THEME.to_string()
}

fn default_redraw_interval_ms() -> u64 {
    33
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model: default_model(),
            default_code_format: default_code_format(),
            isolate_requests: false,
            highlight_theme: default_highlight_theme(),
            redraw_interval_ms: default_redraw_interval_ms(),
            history_file: None,
            agent: None,
        }
    }
}

impl RelayConfig {
    /// Load configuration from the default config file path.
    /// Returns default config if the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&dirs::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when absent.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let config: RelayConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save the current configuration to the default config file path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&dirs::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    /// Configuration rendered as TOML
    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Returns the server bind address string (e.g., "127.0.0.1:11436").
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn redraw_interval(&self) -> Duration {
        Duration::from_millis(self.redraw_interval_ms)
    }
}
