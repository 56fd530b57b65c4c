//! Configuration system for origintrace.
//!
//! Uses `figment` for layered configuration: defaults -> config file -> environment -> overrides.
//! Configuration is loaded from the user config directory and/or `.origintrace/config.toml`
//! in the workspace directory.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceConfig {
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub inspector: InspectorConfig,
    #[serde(default)]
    pub property_table: PropertyTableConfig,
}

/// Batched log persistence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// How often queued entries are handed to the sink.
    pub flush_interval_ms: u64,
    /// JSON-lines file the batcher appends to. No persistence when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_path: Option<PathBuf>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: 200,
            output_path: None,
        }
    }
}

impl LogConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

/// Inspector request handling and rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectorConfig {
    /// Delay before a pending request is reported as slow.
    pub slow_response_ms: u64,
    /// Characters of context shown on each side of a highlighted character.
    pub preview_chars: usize,
}

impl Default for InspectorConfig {
    fn default() -> Self {
        Self {
            slow_response_ms: 300,
            preview_chars: 40,
        }
    }
}

impl InspectorConfig {
    pub fn slow_response(&self) -> Duration {
        Duration::from_millis(self.slow_response_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyTableConfig {
    /// Writes between sweeps of dead objects.
    pub sweep_interval: usize,
}

impl Default for PropertyTableConfig {
    fn default() -> Self {
        Self {
            sweep_interval: crate::property_table::DEFAULT_SWEEP_INTERVAL,
        }
    }
}

impl TraceConfig {
    /// Reject values that would make the runtime misbehave.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log.flush_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                message: "log.flush_interval_ms must be greater than zero".into(),
            });
        }
        if self.property_table.sweep_interval == 0 {
            return Err(ConfigError::Invalid {
                message: "property_table.sweep_interval must be greater than zero".into(),
            });
        }
        Ok(())
    }

    /// Render the configuration as TOML.
    pub fn render_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })
    }
}

/// Load configuration by merging defaults, user config, workspace config,
/// environment variables, and explicit overrides.
pub fn load_config(
    workspace: Option<&Path>,
    overrides: Option<&TraceConfig>,
) -> Result<TraceConfig, Box<figment::Error>> {
    let mut figment = Figment::from(Serialized::defaults(TraceConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = workspace_config_path(ws);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (ORIGINTRACE_LOG__FLUSH_INTERVAL_MS, etc.)
    figment = figment.merge(Env::prefixed("ORIGINTRACE_").split("__"));

    // Explicit overrides
    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    figment.extract().map_err(Box::new)
}

/// Check whether a user-level or workspace-level config file exists.
pub fn config_exists(workspace: Option<&Path>) -> bool {
    if user_config_path().is_some_and(|p| p.exists()) {
        return true;
    }
    workspace.is_some_and(|ws| workspace_config_path(ws).exists())
}

fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "origintrace", "origintrace")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// `.origintrace/config.toml` under `workspace`.
pub fn workspace_config_path(workspace: &Path) -> PathBuf {
    workspace.join(".origintrace").join("config.toml")
}
