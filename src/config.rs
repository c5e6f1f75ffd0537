use crate::diagnostics::TestName;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub monitoring: MonitoringConfig,
    #[serde(default)]
    pub diagnostics: DiagnosticsConfig,
    #[serde(default)]
    pub battery: BatteryConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MonitoringConfig {
    #[serde(default = "default_history_length")]
    pub history_length: usize,
    #[serde(default = "default_top_processes")]
    pub top_processes: usize,
    #[serde(default = "default_true")]
    pub include_per_cpu: bool,
    #[serde(default = "default_true")]
    pub include_network: bool,
    #[serde(default = "default_true")]
    pub temperature_monitoring: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiagnosticsConfig {
    #[serde(default = "default_diagnostic_timeout_secs")]
    pub timeout_secs: f64,
    /// Tests run by `diagnose` and `run_all` when none are named.
    #[serde(default)]
    pub tests: Vec<String>,
    #[serde(default = "default_camera_device")]
    pub camera_device: PathBuf,
    #[serde(default = "default_microphone_seconds")]
    pub microphone_seconds: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BatteryConfig {
    #[serde(default = "default_low_battery_threshold")]
    pub low_battery_threshold: f64,
    #[serde(default = "default_charger_wattage")]
    pub charger_wattage: f64,
    #[serde(default = "default_battery_capacity_mwh")]
    pub battery_capacity_mwh: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            monitoring: MonitoringConfig::default(),
            diagnostics: DiagnosticsConfig::default(),
            battery: BatteryConfig::default(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            history_length: default_history_length(),
            top_processes: default_top_processes(),
            include_per_cpu: true,
            include_network: true,
            temperature_monitoring: true,
        }
    }
}

impl Default for DiagnosticsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_diagnostic_timeout_secs(),
            tests: Vec::new(),
            camera_device: default_camera_device(),
            microphone_seconds: default_microphone_seconds(),
        }
    }
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            low_battery_threshold: default_low_battery_threshold(),
            charger_wattage: default_charger_wattage(),
            battery_capacity_mwh: default_battery_capacity_mwh(),
        }
    }
}

/// Longest timeout a single diagnostic may be given.
pub const MAX_DIAGNOSTIC_TIMEOUT_SECS: f64 = 3600.0;

/// Converts a timeout in seconds, rejecting anything outside
/// `(0, MAX_DIAGNOSTIC_TIMEOUT_SECS]`.
pub fn diagnostic_timeout(secs: f64) -> Option<Duration> {
    if !(secs > 0.0 && secs <= MAX_DIAGNOSTIC_TIMEOUT_SECS) {
        return None;
    }
    Duration::try_from_secs_f64(secs).ok()
}

impl DiagnosticsConfig {
    pub fn timeout(&self) -> Duration {
        diagnostic_timeout(self.timeout_secs)
            .unwrap_or_else(|| Duration::from_secs_f64(default_diagnostic_timeout_secs()))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("invalid configuration: {0}")]
    Validation(String),
}

impl Config {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        let path_display = path_ref.display().to_string();
        let text = fs::read_to_string(path_ref).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        let cfg: Config = serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })?;

        cfg.validate()?;
        Ok(cfg)
    }

    /// Like [`Config::load_from_file`], but a missing file yields the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        if !path_ref.exists() {
            return Ok(Self::default());
        }
        Self::load_from_file(path_ref)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.listen.trim().is_empty() {
            return Err(ConfigError::Validation("listen is required".to_string()));
        }
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }

        validate_monitoring(&self.monitoring)?;
        validate_diagnostics(&self.diagnostics)?;
        validate_battery(&self.battery)?;

        Ok(())
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

fn validate_monitoring(cfg: &MonitoringConfig) -> Result<(), ConfigError> {
    if cfg.history_length < 1 {
        return Err(ConfigError::Validation(
            "monitoring.history_length must be >= 1".to_string(),
        ));
    }
    if cfg.top_processes < 1 {
        return Err(ConfigError::Validation(
            "monitoring.top_processes must be >= 1".to_string(),
        ));
    }
    Ok(())
}

fn validate_diagnostics(cfg: &DiagnosticsConfig) -> Result<(), ConfigError> {
    if diagnostic_timeout(cfg.timeout_secs).is_none() {
        return Err(ConfigError::Validation(format!(
            "diagnostics.timeout_secs must be in range (0, {MAX_DIAGNOSTIC_TIMEOUT_SECS}]"
        )));
    }
    let mut names = HashSet::new();
    for name in &cfg.tests {
        let test = TestName::from_str(name).map_err(|_| {
            ConfigError::Validation(format!("diagnostics.tests: unknown test '{name}'"))
        })?;
        if !names.insert(test) {
            return Err(ConfigError::Validation(format!(
                "diagnostics.tests: '{name}' is listed more than once"
            )));
        }
    }
    if cfg.camera_device.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "diagnostics.camera_device must not be empty".to_string(),
        ));
    }
    if !(1..=30).contains(&cfg.microphone_seconds) {
        return Err(ConfigError::Validation(
            "diagnostics.microphone_seconds must be in range 1..30".to_string(),
        ));
    }
    Ok(())
}

fn validate_battery(cfg: &BatteryConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&cfg.low_battery_threshold) {
        return Err(ConfigError::Validation(
            "battery.low_battery_threshold must be in range 0..100".to_string(),
        ));
    }
    if cfg.charger_wattage <= 0.0 {
        return Err(ConfigError::Validation(
            "battery.charger_wattage must be > 0".to_string(),
        ));
    }
    if cfg.battery_capacity_mwh <= 0.0 {
        return Err(ConfigError::Validation(
            "battery.battery_capacity_mwh must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn default_listen() -> String {
    "127.0.0.1:8080".to_string()
}

const fn default_interval_secs() -> u64 {
    2
}

const fn default_history_length() -> usize {
    100
}

const fn default_top_processes() -> usize {
    10
}

const fn default_true() -> bool {
    true
}

const fn default_diagnostic_timeout_secs() -> f64 {
    30.0
}

fn default_camera_device() -> PathBuf {
    PathBuf::from("/dev/video0")
}

const fn default_microphone_seconds() -> u32 {
    1
}

const fn default_low_battery_threshold() -> f64 {
    15.0
}

const fn default_charger_wattage() -> f64 {
    65.0
}

const fn default_battery_capacity_mwh() -> f64 {
    50_000.0
}
