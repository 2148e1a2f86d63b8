//! Configuration types and loading

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use eyre::{Context, Result, eyre};
use serde::{Deserialize, Serialize};

use crate::domain::{DailyWindow, MemoryService};
use crate::events::EventBus;
use crate::scheduler::CheckerConfig;

/// Main checker configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,

    /// Scheduler settings
    pub checker: CheckerConfig,

    /// Upper bound for a single check command, in seconds
    #[serde(rename = "check-timeout-secs")]
    pub check_timeout_secs: u64,

    /// Services to schedule
    pub services: Vec<ServiceConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: None,
            checker: CheckerConfig::default(),
            check_timeout_secs: 30,
            services: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    ///
    /// Explicit path, then `.checker.yml`, then `~/.config/checker/checker.yml`,
    /// then defaults.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        for path in Self::default_paths() {
            if path.exists() {
                match Self::load_from_file(&path) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", path.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Read only the log level, before logging is set up
    pub fn load_log_level(config_path: Option<&PathBuf>) -> Option<String> {
        let path = match config_path {
            Some(path) => path.clone(),
            None => Self::default_paths().into_iter().find(|p| p.exists())?,
        };
        let content = fs::read_to_string(path).ok()?;
        let config: Self = serde_yaml::from_str(&content).ok()?;
        config.log_level
    }

    fn default_paths() -> Vec<PathBuf> {
        let mut paths = vec![PathBuf::from(".checker.yml")];
        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("checker").join("checker.yml"));
        }
        paths
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Validate configuration before use
    pub fn validate(&self) -> Result<()> {
        if self.check_timeout_secs == 0 {
            return Err(eyre!("check-timeout-secs must be positive"));
        }

        let mut names = HashSet::new();
        for service in &self.services {
            if !names.insert(service.name.as_str()) {
                return Err(eyre!("Duplicate service name '{}'", service.name));
            }
            service.validate()?;
        }
        Ok(())
    }

    pub fn check_timeout(&self) -> Duration {
        Duration::from_secs(self.check_timeout_secs)
    }
}

/// A service entry in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub name: String,

    /// Shell command; exit status 0 is a passing check
    pub command: String,

    #[serde(rename = "interval-secs", default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(rename = "enable-active-checks", default = "default_enable_active_checks")]
    pub enable_active_checks: bool,

    /// Optional daily window, UTC
    #[serde(rename = "check-period", default)]
    pub check_period: Option<CheckPeriodConfig>,
}

fn default_interval_secs() -> u64 {
    60
}

fn default_enable_active_checks() -> bool {
    true
}

/// `HH:MM` bounds of a daily check window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckPeriodConfig {
    pub start: String,
    pub end: String,
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(eyre!("Service name must not be empty"));
        }
        self.interval()?;
        if let Some(period) = &self.check_period {
            DailyWindow::parse(&period.start, &period.end).context(format!("Service '{}'", self.name))?;
        }
        Ok(())
    }

    /// Check interval, rejected when zero or too large to add to the current time
    pub fn interval(&self) -> Result<TimeDelta> {
        if self.interval_secs == 0 {
            return Err(eyre!("Service '{}': interval-secs must be positive", self.name));
        }

        i64::try_from(self.interval_secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .filter(|interval| Utc::now().checked_add_signed(*interval).is_some())
            .ok_or_else(|| eyre!("Service '{}': interval-secs out of range", self.name))
    }

    /// Build the in-memory service, due immediately
    pub fn build(&self, bus: &EventBus) -> Result<Arc<MemoryService>> {
        self.validate()?;

        let interval = self.interval()?;
        let mut builder = MemoryService::builder(&self.name)
            .interval(interval)
            .enable_active_checks(self.enable_active_checks)
            .bus(bus);

        if let Some(period) = &self.check_period {
            builder = builder.check_period(Arc::new(DailyWindow::parse(&period.start, &period.end)?));
        }

        Ok(builder.build())
    }
}
