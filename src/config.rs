//! Agent configuration.
//!
//! Everything boots with sensible defaults; an optional JSON config file
//! (`LATKA_CONFIG`) overrides them, and a few environment variables override
//! the file for quick operational tweaks. Unparseable overrides fall back
//! with a warning instead of aborting startup.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::emotion::feelings::{default_rules, FeelingsRule};
use crate::emotion::{EmotionConfig, EmotionRules};
use crate::error::CoreError;
use crate::identity::Persona;
use crate::memory::MemoryPolicy;

pub const CONFIG_ENV: &str = "LATKA_CONFIG";
pub const DATA_DIR_ENV: &str = "LATKA_DATA_DIR";
pub const HEARTBEAT_MS_ENV: &str = "LATKA_HEARTBEAT_MS";
pub const SERVICE_MODE_ENV: &str = "LATKA_SERVICE_MODE";

/// How the agent talks to the outside world. `Mock` answers deterministically
/// (development and tests), `Offline` uses only local fallbacks, `Online`
/// routes through a configured language adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ServiceMode {
    #[default]
    Mock,
    Offline,
    Online,
}

impl FromStr for ServiceMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "mock" => Ok(Self::Mock),
            "offline" => Ok(Self::Offline),
            "online" => Ok(Self::Online),
            other => Err(format!("unknown service mode '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_callback_timeout_ms")]
    pub callback_timeout_ms: u64,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            callback_timeout_ms: default_callback_timeout_ms(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_callback_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub emotion: EmotionConfig,
    #[serde(default = "EmotionRules::defaults")]
    pub rules: EmotionRules,
    #[serde(default = "default_rules")]
    pub feelings: Vec<FeelingsRule>,
    #[serde(default)]
    pub memory: MemoryPolicy,
    #[serde(default)]
    pub persona: Persona,
    #[serde(default)]
    pub service_mode: ServiceMode,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            heartbeat: HeartbeatConfig::default(),
            emotion: EmotionConfig::default(),
            rules: EmotionRules::defaults(),
            feelings: default_rules(),
            memory: MemoryPolicy::default(),
            persona: Persona::default(),
            service_mode: ServiceMode::default(),
        }
    }
}

impl AgentConfig {
    /// Load configuration: defaults, then the `LATKA_CONFIG` file if set,
    /// then individual environment overrides.
    pub fn load() -> Self {
        let mut config = match std::env::var(CONFIG_ENV) {
            Ok(path) if !path.trim().is_empty() => {
                match Self::from_file(Path::new(&path)) {
                    Ok(config) => {
                        info!(path = %path, "Configuration loaded from file");
                        config
                    }
                    Err(e) => {
                        warn!(path = %path, error = %e, "Failed to load config file, using defaults");
                        Self::default()
                    }
                }
            }
            _ => Self::default(),
        };

        if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
            if !dir.trim().is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        if let Ok(raw) = std::env::var(HEARTBEAT_MS_ENV) {
            match raw.parse::<u64>() {
                Ok(ms) if ms > 0 => config.heartbeat.interval_ms = ms,
                _ => warn!(value = %raw, "Ignoring invalid heartbeat interval override"),
            }
        }
        if let Ok(raw) = std::env::var(SERVICE_MODE_ENV) {
            match raw.parse::<ServiceMode>() {
                Ok(mode) => config.service_mode = mode,
                Err(e) => warn!(error = %e, "Ignoring invalid service mode override"),
            }
        }

        info!(
            data_dir = %config.data_dir.display(),
            heartbeat_ms = config.heartbeat.interval_ms,
            mode = ?config.service_mode,
            "Agent configuration ready"
        );
        config
    }

    /// Parse a JSON config file.
    pub fn from_file(path: &Path) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CoreError::persistence(path.display().to_string(), e))?;
        serde_json::from_str(&raw).map_err(|e| {
            CoreError::Validation(format!("config file {}: {e}", path.display()))
        })
    }

    pub fn journal_path(&self) -> PathBuf {
        self.data_dir.join("episodic_memory.jsonl")
    }

    pub fn emotion_snapshot_path(&self) -> PathBuf {
        self.data_dir.join("emotion_state.json")
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat.interval_ms)
    }

    pub fn callback_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat.callback_timeout_ms)
    }
}
