//! Controller configuration.
//!
//! Uses a `key=value` file format with `#` comments and optional quotes.
//! Precedence: CLI flags > `--config` file > defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::budget::{BudgetError, BudgetPolicy};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("invalid config line: {0}")]
    InvalidLine(String),
    #[error("invalid integer value for {key}: {value}")]
    InvalidInt { key: String, value: String },
    #[error("invalid budget: {0}")]
    InvalidBudget(#[from] BudgetError),
}

/// Controller and collaborator settings.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Worker CLI binary invoked once per turn.
    pub worker_bin: PathBuf,

    // Budget (seconds)
    pub total_budget_sec: u64,
    pub per_turn_cap_sec: u64,
    pub min_remaining_sec: u64,
    pub legacy_timeout_sec: u64,

    // Gateway readiness
    pub gateway_addr: String,
    pub gateway_retries: u32,
    pub gateway_retry_backoff_sec: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let budget = BudgetPolicy::default();
        Self {
            worker_bin: PathBuf::from("openclaw"),
            total_budget_sec: budget.total.as_secs(),
            per_turn_cap_sec: budget.per_turn_cap.as_secs(),
            min_remaining_sec: budget.min_remaining.as_secs(),
            legacy_timeout_sec: budget.legacy_timeout.as_secs(),
            gateway_addr: "127.0.0.1:18789".to_string(),
            gateway_retries: 3,
            gateway_retry_backoff_sec: 2,
        }
    }
}

impl ControllerConfig {
    /// Load config from a file, merging with defaults, then validate.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and merge values from a config file.
    pub fn load_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let content = std::fs::read_to_string(path)?;
        self.parse_content(&content)
    }

    /// Budget policy derived from the second-granularity fields.
    pub fn budget(&self) -> BudgetPolicy {
        BudgetPolicy {
            total: Duration::from_secs(self.total_budget_sec),
            per_turn_cap: Duration::from_secs(self.per_turn_cap_sec),
            min_remaining: Duration::from_secs(self.min_remaining_sec),
            legacy_timeout: Duration::from_secs(self.legacy_timeout_sec),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.budget().validate()?;
        Ok(())
    }

    /// Parse config content (key=value format).
    fn parse_content(&mut self, content: &str) -> Result<(), ConfigError> {
        for line in content.lines() {
            let trimmed = line.trim();

            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            let Some((key, value)) = trimmed.split_once('=') else {
                return Err(ConfigError::InvalidLine(line.to_string()));
            };

            let key = key.trim();
            let value = Self::unquote(value.trim());

            self.apply_value(key, &value)?;
        }
        Ok(())
    }

    /// Remove surrounding quotes from a value.
    fn unquote(value: &str) -> String {
        if value.len() >= 2
            && ((value.starts_with('"') && value.ends_with('"'))
                || (value.starts_with('\'') && value.ends_with('\'')))
        {
            return value[1..value.len() - 1].to_string();
        }
        value.to_string()
    }

    fn apply_value(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        match key {
            "worker_bin" => self.worker_bin = PathBuf::from(value),
            "total_budget_sec" => self.total_budget_sec = Self::parse_int(key, value)?,
            "per_turn_cap_sec" => self.per_turn_cap_sec = Self::parse_int(key, value)?,
            "min_remaining_sec" => self.min_remaining_sec = Self::parse_int(key, value)?,
            "legacy_timeout_sec" => self.legacy_timeout_sec = Self::parse_int(key, value)?,
            "gateway_addr" => self.gateway_addr = value.to_string(),
            "gateway_retries" => self.gateway_retries = Self::parse_int(key, value)?,
            "gateway_retry_backoff_sec" => {
                self.gateway_retry_backoff_sec = Self::parse_int(key, value)?;
            }
            _ => {
                warn!(key, "unknown config key");
            }
        }
        Ok(())
    }

    fn parse_int<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
        value.parse().map_err(|_| ConfigError::InvalidInt {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}
