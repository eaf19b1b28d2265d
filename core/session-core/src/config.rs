//! TOML configuration shared by the daemon and the CLI.
//!
//! Every field has a default, so a missing file or a partial file both load.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SessionError};
use crate::live::DEFAULT_LIVE_CAPACITY;
use crate::router::{RouterSettings, DEFAULT_STRESS_THRESHOLD};
use crate::tracker::{TrackerSettings, DEFAULT_CONFIDENCE_CAPACITY, DEFAULT_HISTORY_CAPACITY};

const DATA_DIR_NAME: &str = ".cognitivesense";
const DEFAULT_CONFIG_RELATIVE_PATH: &str = "daemon/config.toml";
pub const CONFIG_PATH_ENV: &str = "COGNITIVESENSE_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Hours after which an active session is archived and replaced. 0 disables.
    #[serde(default = "default_auto_reset_hours")]
    pub auto_reset_hours: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_confidence_capacity")]
    pub confidence_capacity: usize,
    #[serde(default = "default_true")]
    pub auto_start: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            auto_reset_hours: default_auto_reset_hours(),
            history_capacity: default_history_capacity(),
            confidence_capacity: default_confidence_capacity(),
            auto_start: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_live_capacity")]
    pub live_capacity: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            live_capacity: default_live_capacity(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorConfig {
    #[serde(default)]
    pub auto_pause_on_stress: bool,
    #[serde(default = "default_stress_threshold")]
    pub stress_threshold: f64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            auto_pause_on_stress: false,
            stress_threshold: default_stress_threshold(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_backend_addr")]
    pub backend_addr: String,
    #[serde(default = "default_true")]
    pub reconnect_enabled: bool,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_connection_timeout_secs")]
    pub connection_timeout_secs: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            backend_addr: default_backend_addr(),
            reconnect_enabled: true,
            max_reconnect_attempts: default_max_reconnect_attempts(),
            connection_timeout_secs: default_connection_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SenseConfig {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub connection: ConnectionConfig,
}

impl SenseConfig {
    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            history_capacity: self.session.history_capacity,
            confidence_capacity: self.session.confidence_capacity,
        }
    }

    pub fn router_settings(&self) -> RouterSettings {
        RouterSettings {
            auto_pause_on_stress: self.behavior.auto_pause_on_stress,
            stress_threshold: self.behavior.stress_threshold,
        }
    }

    /// `None` when auto-reset is disabled.
    pub fn auto_reset_ms(&self) -> Option<i64> {
        match self.session.auto_reset_hours {
            0 => None,
            hours => Some(i64::try_from(hours).unwrap_or(i64::MAX).saturating_mul(3_600_000)),
        }
    }
}

fn default_auto_reset_hours() -> u64 {
    24
}

fn default_history_capacity() -> usize {
    DEFAULT_HISTORY_CAPACITY
}

fn default_confidence_capacity() -> usize {
    DEFAULT_CONFIDENCE_CAPACITY
}

fn default_live_capacity() -> usize {
    DEFAULT_LIVE_CAPACITY
}

fn default_stress_threshold() -> f64 {
    DEFAULT_STRESS_THRESHOLD
}

fn default_backend_addr() -> String {
    "127.0.0.1:8000".to_string()
}

fn default_max_reconnect_attempts() -> u32 {
    5
}

fn default_connection_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// `~/.cognitivesense`
pub fn data_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().ok_or(SessionError::HomeDirNotFound)?;
    Ok(home.join(DATA_DIR_NAME))
}

/// `$COGNITIVESENSE_CONFIG`, else `~/.cognitivesense/daemon/config.toml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        if !path.trim().is_empty() {
            return Ok(PathBuf::from(path));
        }
    }
    Ok(data_dir()?.join(DEFAULT_CONFIG_RELATIVE_PATH))
}

pub fn load_config(path: Option<PathBuf>) -> Result<SenseConfig> {
    let config_path = match path {
        Some(path) => path,
        None => default_config_path()?,
    };

    if !config_path.exists() {
        return Ok(SenseConfig::default());
    }

    let content = fs_err::read_to_string(&config_path).map_err(|source| SessionError::Io {
        context: format!("reading config {}", config_path.display()),
        source,
    })?;
    parse_config(&config_path, &content)
}

fn parse_config(path: &Path, content: &str) -> Result<SenseConfig> {
    toml::from_str::<SenseConfig>(content).map_err(|err| SessionError::ConfigMalformed {
        path: path.to_path_buf(),
        details: err.to_string(),
    })
}
