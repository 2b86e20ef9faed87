//! Typed configuration from environment variables and an optional TOML file.
//!
//! Loads once at startup, fails fast on malformed values. Engine tunables
//! come from the TOML file named by `JOINQ_CONFIG` (when set) and are then
//! overridden field by field by their environment variables.

pub mod secrets;

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite://data/joinq.db";

#[derive(Debug)]
pub struct Config {
    pub database_url: String,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
    pub engine: EngineConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        let mut engine = match std::env::var("JOINQ_CONFIG") {
            Ok(path) => EngineConfig::from_toml_file(Path::new(&path))?,
            Err(_) => EngineConfig::default(),
        };
        engine.apply_env()?;
        engine.validate()?;

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| DEFAULT_DATABASE_URL.to_string()),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            engine,
        })
    }
}

/// Tunables of the distributor and the join loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Most targets a single distribution pass hands to one worker.
    pub per_worker_cap: u64,
    /// Pause after every successful join.
    pub join_delay_secs: u64,
    /// Unassigned targets distribution never touches, kept for dead-link
    /// replacement.
    pub reserve_floor: u64,
    /// Message history depth for link extraction. Zero scans everything.
    pub scan_depth: usize,
    /// Added on top of every platform-requested rate-limit wait.
    pub rate_limit_slack_secs: u64,
    /// Consecutive rate limits on one item before it is failed. Unbounded when unset.
    pub max_rate_limit_retries: Option<u32>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            per_worker_cap: 1000,
            join_delay_secs: 90,
            reserve_floor: 500,
            scan_depth: 0,
            rate_limit_slack_secs: 5,
            max_rate_limit_retries: None,
        }
    }
}

impl EngineConfig {
    /// Read a TOML file. Missing keys keep their defaults.
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("cannot read config file {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&content)
            .map_err(|e| Error::Config(format!("bad config file {}: {e}", path.display())))
    }

    pub fn from_toml_str(content: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Override fields from their environment variables, where set.
    pub fn apply_env(&mut self) -> Result<()> {
        if let Some(v) = optional_var("PER_WORKER_CAP")? {
            self.per_worker_cap = v;
        }
        if let Some(v) = optional_var("JOIN_DELAY_SECONDS")? {
            self.join_delay_secs = v;
        }
        if let Some(v) = optional_var("RESERVE_FLOOR")? {
            self.reserve_floor = v;
        }
        if let Some(v) = optional_var("SCAN_DEPTH")? {
            self.scan_depth = v;
        }
        if let Some(v) = optional_var("RATE_LIMIT_SLACK_SECONDS")? {
            self.rate_limit_slack_secs = v;
        }
        if let Some(v) = optional_var("MAX_RATE_LIMIT_RETRIES")? {
            self.max_rate_limit_retries = Some(v);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.per_worker_cap == 0 {
            return Err(Error::Config("per_worker_cap must be > 0".to_string()));
        }
        Ok(())
    }

    pub fn join_delay(&self) -> Duration {
        Duration::from_secs(self.join_delay_secs)
    }

    pub fn rate_limit_slack(&self) -> Duration {
        Duration::from_secs(self.rate_limit_slack_secs)
    }
}

fn optional_var<T>(name: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("{name}={raw:?} is not valid: {e}"))),
        Err(_) => Ok(None),
    }
}
