use monarx_core::{AlertLimits, NotifierBackend, PressurePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Default configuration file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/monarx/config.toml";

/// Prefix of environment variables overriding file values,
/// e.g. `MONARX_THRESHOLDS__CPU_LIMIT=90`
pub const ENV_PREFIX: &str = "MONARX";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid {field} = {value}: {reason}")]
    Invalid {
        field: String,
        value: String,
        reason: String,
    },

    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("failed to save configuration: {0}")]
    Save(String),
}

impl ConfigError {
    fn invalid(field: &str, value: impl ToString, reason: &str) -> Self {
        ConfigError::Invalid {
            field: field.to_string(),
            value: value.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Main configuration for Monarx daemon
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Alert thresholds
    pub thresholds: ThresholdsConfig,

    /// Cycle timing and ranking size
    pub monitoring: MonitoringConfig,

    /// Memory pressure classifier overrides
    pub pressure: PressurePolicy,

    /// Native notifications
    pub notifications: NotificationsConfig,

    /// Logging configuration
    pub logging: LogConfig,
}

/// Alert thresholds, in percent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThresholdsConfig {
    /// CPU usage limit (default: 85.0)
    pub cpu_limit: f64,

    /// RAM usage limit (default: 80.0)
    pub mem_limit: f64,

    /// Swap usage limit (default: 20.0)
    pub swap_limit: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// Sampling interval in seconds (default: 5)
    pub check_every_secs: u64,

    /// Minimum time between two notifications of the same kind (default: 120)
    pub cooldown_secs: u64,

    /// Entries in each process ranking (default: 5)
    pub top_n: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Send native notifications (default: true)
    pub enabled: bool,

    /// auto | osascript | notify-send | log
    pub backend: NotifierBackend,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log directory path (default: ./logs)
    pub log_dir: PathBuf,

    /// Daily rolled log file prefix (default: monarx-daemon.log)
    pub file_name: String,

    /// Filter used when RUST_LOG is unset (default: info)
    pub level: String,
}

impl Default for ThresholdsConfig {
    fn default() -> Self {
        let limits = AlertLimits::default();
        Self {
            cpu_limit: limits.cpu,
            mem_limit: limits.memory,
            swap_limit: limits.swap,
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            check_every_secs: 5,
            cooldown_secs: 120,
            top_n: 5,
        }
    }
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: NotifierBackend::Auto,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./logs"),
            file_name: "monarx-daemon.log".to_string(),
            level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration, layering `MONARX_*` environment variables over
    /// the TOML file. A missing file means defaults. The result is validated.
    ///
    /// # Example
    /// ```no_run
    /// use monarx_daemon::config::Config;
    ///
    /// let config = Config::load("/etc/monarx/config.toml").unwrap();
    /// println!("CPU limit: {}", config.thresholds.cpu_limit);
    /// ```
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();

        let layered = ::config::Config::builder()
            .add_source(
                ::config::File::new(&path.to_string_lossy(), ::config::FileFormat::Toml)
                    .required(false),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;

        let config: Config = layered
            .try_deserialize()
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML document without environment overrides
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read only the TOML file, ignoring environment overrides
    ///
    /// Used when the configuration is written back, so `MONARX_*` values of
    /// the current shell never end up persisted. A missing file means defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;
        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::Load(msg) => ConfigError::Load(format!("{}: {}", path.display(), msg)),
            other => other,
        })
    }

    /// Save configuration to TOML file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Save(e.to_string()))?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ConfigError::Save(format!("{}: {}", parent.display(), e)))?;
        }

        std::fs::write(path, content)
            .map_err(|e| ConfigError::Save(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Validate configuration values
    ///
    /// Out-of-range values are rejected, never clamped.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_percent("thresholds.cpu_limit", self.thresholds.cpu_limit)?;
        check_percent("thresholds.mem_limit", self.thresholds.mem_limit)?;
        check_percent("thresholds.swap_limit", self.thresholds.swap_limit)?;

        if self.monitoring.check_every_secs == 0 {
            return Err(ConfigError::invalid(
                "monitoring.check_every_secs",
                0,
                "must be > 0",
            ));
        }

        if self.monitoring.cooldown_secs == 0 {
            return Err(ConfigError::invalid(
                "monitoring.cooldown_secs",
                0,
                "must be > 0",
            ));
        }

        if self.monitoring.top_n == 0 {
            return Err(ConfigError::invalid("monitoring.top_n", 0, "must be > 0"));
        }

        let ratio = self.pressure.compressed_high_water_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::invalid(
                "pressure.compressed_high_water_ratio",
                ratio,
                "must be in (0, 1]",
            ));
        }
        check_percent(
            "pressure.swap_nontrivial_percent",
            self.pressure.swap_nontrivial_percent,
        )?;
        check_percent(
            "pressure.lag_risk_cpu_percent",
            self.pressure.lag_risk_cpu_percent,
        )?;

        if self.logging.file_name.trim().is_empty() {
            return Err(ConfigError::invalid(
                "logging.file_name",
                "\"\"",
                "must not be empty",
            ));
        }

        if self.monitoring.cooldown_secs < self.monitoring.check_every_secs {
            warn!(
                "cooldown_secs ({}) is shorter than check_every_secs ({}), every breach will notify",
                self.monitoring.cooldown_secs, self.monitoring.check_every_secs
            );
        }

        Ok(())
    }

    /// Copy with new alert thresholds, validated
    pub fn with_thresholds(&self, cpu: f64, mem: f64, swap: f64) -> Result<Self, ConfigError> {
        let mut updated = self.clone();
        updated.thresholds = ThresholdsConfig {
            cpu_limit: cpu,
            mem_limit: mem,
            swap_limit: swap,
        };
        updated.validate()?;
        Ok(updated)
    }

    pub fn alert_limits(&self) -> AlertLimits {
        AlertLimits {
            cpu: self.thresholds.cpu_limit,
            memory: self.thresholds.mem_limit,
            swap: self.thresholds.swap_limit,
        }
    }

    pub fn check_every(&self) -> Duration {
        Duration::from_secs(self.monitoring.check_every_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.monitoring.cooldown_secs)
    }

    /// Get full path to the daemon log file (before date suffix)
    pub fn log_path(&self) -> PathBuf {
        self.logging.log_dir.join(&self.logging.file_name)
    }
}

fn check_percent(field: &str, value: f64) -> Result<(), ConfigError> {
    // Written so NaN fails too
    if !(value > 0.0) {
        return Err(ConfigError::invalid(field, value, "must be > 0"));
    }
    if value > 100.0 {
        return Err(ConfigError::invalid(field, value, "must be <= 100"));
    }
    Ok(())
}
