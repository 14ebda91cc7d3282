use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::app::error::AppError;

pub const CONFIG_PATH_ENV: &str = "ADB_FILE_MANAGER_CONFIG_PATH";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AdbSettings {
    #[serde(default)]
    pub command_path: String,
    #[serde(default)]
    pub sdk_home: String,
    /// 0 disables the timeout.
    #[serde(default)]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PollingSettings {
    pub max_delay_ms: u64,
    pub fast_delay_ms: u64,
    pub growth_factor: f64,
    pub auto_select: bool,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            max_delay_ms: 5_000,
            fast_delay_ms: 500,
            growth_factor: 1.5,
            auto_select: true,
        }
    }
}

impl PollingSettings {
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn fast_delay(&self) -> Duration {
        Duration::from_millis(self.fast_delay_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub adb: AdbSettings,
    #[serde(default)]
    pub polling: PollingSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    pub fn command_timeout(&self) -> Option<Duration> {
        match self.adb.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".adb_file_manager_config.json")
}

pub fn load_config(trace_id: &str) -> Result<AppConfig, AppError> {
    load_config_from_path(&config_path(), trace_id)
}

pub fn load_config_from_path(path: &Path, trace_id: &str) -> Result<AppConfig, AppError> {
    if !path.exists() {
        return Ok(AppConfig::default());
    }
    let raw = fs::read_to_string(path)
        .map_err(|err| AppError::system(format!("Failed to read config: {err}"), trace_id))?;
    let config: AppConfig = serde_json::from_str(&raw)
        .map_err(|err| AppError::validation(format!("Failed to parse config: {err}"), trace_id))?;
    Ok(validate_config(config))
}

fn validate_config(mut config: AppConfig) -> AppConfig {
    let defaults = PollingSettings::default();
    if config.polling.max_delay_ms < 100 {
        config.polling.max_delay_ms = defaults.max_delay_ms;
    }
    if config.polling.fast_delay_ms == 0 || config.polling.fast_delay_ms > config.polling.max_delay_ms {
        config.polling.fast_delay_ms = defaults.fast_delay_ms.min(config.polling.max_delay_ms);
    }
    if !config.polling.growth_factor.is_finite() || config.polling.growth_factor < 1.0 {
        config.polling.growth_factor = defaults.growth_factor;
    }
    if config.logging.level.trim().is_empty() {
        config.logging.level = LoggingSettings::default().level;
    }
    config
}
