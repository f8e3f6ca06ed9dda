use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use anyhow::Result;
use tokio::fs;

use crate::error::ProbeError;

/// Engine settings, immutable for the duration of a run.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ProbeConfig {
    /// Time between successive attempt starts. 0 is flood mode.
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// Time before an in-flight attempt is declared failed.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum number of attempts, `None` runs until stopped.
    #[serde(default)]
    pub count: Option<u64>,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    3000
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            count: None,
        }
    }
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = interval_ms;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.timeout_ms == 0 {
            return Err(ProbeError::InvalidConfig("timeout must be greater than 0".into()));
        }
        if self.count == Some(0) {
            return Err(ProbeError::InvalidConfig("count must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Binary settings: probe settings plus presentation and logging.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AppConfig {
    #[serde(flatten)]
    pub probe: ProbeConfig,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_color")]
    pub color: bool,
    #[serde(default)]
    pub timestamps: bool,
    #[serde(default)]
    pub json: bool,
    #[serde(default)]
    pub metrics_addr: Option<SocketAddr>,
}

fn default_log_level() -> String {
    "warn".to_string()
}

fn default_color() -> bool {
    true
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            probe: ProbeConfig::default(),
            log_level: default_log_level(),
            color: default_color(),
            timestamps: false,
            json: false,
            metrics_addr: None,
        }
    }
}

/// Values given on the command line; `None`/`false` leaves the file value alone.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub count: Option<u64>,
    pub interval_secs: Option<f64>,
    pub timeout_secs: Option<f64>,
    pub flood: bool,
    pub timestamps: bool,
    pub no_color: bool,
    pub json: bool,
    pub metrics_addr: Option<SocketAddr>,
    pub log_level: Option<String>,
}

impl AppConfig {
    /// Load from `path`, or from `TCP_PING_CONFIG`, or fall back to defaults.
    pub async fn load(path: Option<&str>) -> Result<Self> {
        let path = path
            .map(str::to_string)
            .or_else(|| std::env::var("TCP_PING_CONFIG").ok());

        match path {
            Some(path) => Self::load_file_config(&path).await,
            None => Ok(Self::default()),
        }
    }

    async fn load_file_config(file_path: &str) -> Result<Self> {
        if !Path::new(file_path).exists() {
            return Err(anyhow::anyhow!("Config file not found: {}", file_path));
        }

        let content = fs::read_to_string(file_path).await?;
        let config: AppConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Layer command line values over the loaded ones.
    pub fn apply(&mut self, overrides: Overrides) -> Result<()> {
        if let Some(count) = overrides.count {
            self.probe.count = Some(count);
        }
        if let Some(secs) = overrides.interval_secs {
            self.probe.interval_ms = seconds_to_ms(secs)?;
        }
        if let Some(secs) = overrides.timeout_secs {
            self.probe.timeout_ms = seconds_to_ms(secs)?;
        }
        if overrides.flood {
            self.probe.interval_ms = 0;
        }
        if overrides.timestamps {
            self.timestamps = true;
        }
        if overrides.no_color {
            self.color = false;
        }
        if overrides.json {
            self.json = true;
        }
        if overrides.metrics_addr.is_some() {
            self.metrics_addr = overrides.metrics_addr;
        }
        if let Some(level) = overrides.log_level {
            self.log_level = level;
        }
        self.validate_log_level()?;
        self.probe.validate()?;
        Ok(())
    }

    /// Get the log level as a tracing::Level
    pub fn get_tracing_level(&self) -> Result<tracing::Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(tracing::Level::TRACE),
            "debug" => Ok(tracing::Level::DEBUG),
            "info" => Ok(tracing::Level::INFO),
            "warn" | "warning" => Ok(tracing::Level::WARN),
            "error" => Ok(tracing::Level::ERROR),
            _ => Err(anyhow::anyhow!("Invalid log level: {}. Valid levels are: trace, debug, info, warn, error", self.log_level))
        }
    }

    /// Validate the log level is one of the supported values
    pub fn validate_log_level(&self) -> Result<()> {
        self.get_tracing_level().map(|_| ())
    }
}

/// Fractional seconds from the command line to whole milliseconds.
pub fn seconds_to_ms(secs: f64) -> Result<u64> {
    if !secs.is_finite() || secs < 0.0 {
        return Err(anyhow::anyhow!("Invalid duration: {} seconds", secs));
    }
    Ok((secs * 1000.0).round() as u64)
}
