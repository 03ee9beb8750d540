//! MCU bridge configuration.
//!
//! Loaded from `MCU_*` environment variables. Unparseable numbers are
//! reported instead of silently replaced by defaults.

use crate::manager::ManagerConfig;
use common::config::{ObservabilityConfig, ObservabilityConfigError};
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default health/metrics endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

pub const DEFAULT_MAX_CONFERENCES: usize = 100;

pub const DEFAULT_MAX_MEMBERS_PER_CONFERENCE: usize = 100;

/// Default per-member audio ring window in milliseconds.
pub const DEFAULT_AUDIO_BUFFER_MS: u64 = 1000;

/// Accepted range for `MCU_AUDIO_BUFFER_MS`.
pub const MIN_AUDIO_BUFFER_MS: u64 = 20;
pub const MAX_AUDIO_BUFFER_MS: u64 = 10_000;

pub const DEFAULT_MONITOR_INTERVAL_MS: u64 = 1000;

/// Default time an empty conference survives before the monitor reaps it.
pub const DEFAULT_EMPTY_CONFERENCE_GRACE_SECONDS: u64 = 30;

pub const DEFAULT_MONITOR_CHECK_TIMEOUT_MS: u64 = 2000;

/// Default tracing filter when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "mcu_bridge=info";

/// Default MCU instance ID prefix.
pub const DEFAULT_MCU_ID_PREFIX: &str = "mcu";

/// MCU bridge configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unique identifier for this bridge instance.
    pub mcu_id: String,

    /// Health endpoint bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    pub max_conferences: usize,

    pub max_members_per_conference: usize,

    /// Per-member audio ring window (default: 1000, range 20..=10000).
    pub audio_buffer_ms: u64,

    pub monitor_interval_ms: u64,

    pub empty_conference_grace_seconds: u64,

    /// Upper bound on one conference's housekeeping check.
    pub monitor_check_timeout_ms: u64,

    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Observability(#[from] ObservabilityConfigError),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// See [`Config::from_vars`].
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for an unparseable or
    /// out-of-range number and [`ConfigError::Observability`] for an unknown
    /// log format.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let health_bind_address = vars
            .get("MCU_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_conferences = parse_var(vars, "MCU_MAX_CONFERENCES", DEFAULT_MAX_CONFERENCES)?;
        if max_conferences == 0 {
            return Err(ConfigError::InvalidValue(
                "MCU_MAX_CONFERENCES must be at least 1".to_string(),
            ));
        }

        let max_members_per_conference = parse_var(
            vars,
            "MCU_MAX_MEMBERS_PER_CONFERENCE",
            DEFAULT_MAX_MEMBERS_PER_CONFERENCE,
        )?;
        if max_members_per_conference == 0 {
            return Err(ConfigError::InvalidValue(
                "MCU_MAX_MEMBERS_PER_CONFERENCE must be at least 1".to_string(),
            ));
        }

        let audio_buffer_ms = parse_var(vars, "MCU_AUDIO_BUFFER_MS", DEFAULT_AUDIO_BUFFER_MS)?;
        if !(MIN_AUDIO_BUFFER_MS..=MAX_AUDIO_BUFFER_MS).contains(&audio_buffer_ms) {
            return Err(ConfigError::InvalidValue(format!(
                "MCU_AUDIO_BUFFER_MS must be within {MIN_AUDIO_BUFFER_MS}..={MAX_AUDIO_BUFFER_MS}, got {audio_buffer_ms}"
            )));
        }

        let monitor_interval_ms =
            parse_var(vars, "MCU_MONITOR_INTERVAL_MS", DEFAULT_MONITOR_INTERVAL_MS)?;
        if monitor_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "MCU_MONITOR_INTERVAL_MS must be positive".to_string(),
            ));
        }

        let empty_conference_grace_seconds = parse_var(
            vars,
            "MCU_EMPTY_CONFERENCE_GRACE_SECONDS",
            DEFAULT_EMPTY_CONFERENCE_GRACE_SECONDS,
        )?;

        let monitor_check_timeout_ms = parse_var(
            vars,
            "MCU_MONITOR_CHECK_TIMEOUT_MS",
            DEFAULT_MONITOR_CHECK_TIMEOUT_MS,
        )?;

        let observability =
            ObservabilityConfig::from_vars(vars, "MCU_LOG_FORMAT", DEFAULT_LOG_FILTER)?;

        // Generate instance ID
        let mcu_id = vars.get("MCU_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_MCU_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            mcu_id,
            health_bind_address,
            max_conferences,
            max_members_per_conference,
            audio_buffer_ms,
            monitor_interval_ms,
            empty_conference_grace_seconds,
            monitor_check_timeout_ms,
            observability,
        })
    }

    /// The subset the conference manager needs.
    #[must_use]
    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            max_conferences: self.max_conferences,
            max_members_per_conference: self.max_members_per_conference,
            audio_buffer_ms: self.audio_buffer_ms,
            monitor_interval: Duration::from_millis(self.monitor_interval_ms),
            empty_conference_grace: Duration::from_secs(self.empty_conference_grace_seconds),
            monitor_check_timeout: Duration::from_millis(self.monitor_check_timeout_ms),
        }
    }
}

fn parse_var<T: FromStr>(
    vars: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{name} is not a valid number: {raw:?}"))),
    }
}
