//! Common configuration types for MCU bridge components.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default tracing filter directive when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single-line output
    Text,
    /// One JSON object per event
    Json,
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Tracing filter directive (e.g. `mcu_bridge=debug`)
    pub log_filter: String,
    /// Log output format
    pub log_format: LogFormat,
}

#[derive(Debug, Error)]
pub enum ObservabilityConfigError {
    #[error("Invalid log format: {0} (expected \"text\" or \"json\")")]
    InvalidLogFormat(String),
}

impl ObservabilityConfig {
    /// Load observability settings from a variable map.
    ///
    /// `log_format_var` names the variable holding the format so each
    /// binary can keep its own prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the format variable holds an unknown value.
    pub fn from_vars(
        vars: &HashMap<String, String>,
        log_format_var: &str,
        default_filter: &str,
    ) -> Result<Self, ObservabilityConfigError> {
        let log_filter = vars
            .get("RUST_LOG")
            .cloned()
            .unwrap_or_else(|| default_filter.to_string());

        let log_format = match vars.get(log_format_var).map(|s| s.to_ascii_lowercase()) {
            None => LogFormat::Text,
            Some(value) if value == "text" => LogFormat::Text,
            Some(value) if value == "json" => LogFormat::Json,
            Some(value) => return Err(ObservabilityConfigError::InvalidLogFormat(value)),
        };

        Ok(Self {
            log_filter,
            log_format,
        })
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new(), "MCU_LOG_FORMAT", "x=debug")
            .expect("empty vars should load");
        assert_eq!(config.log_filter, "x=debug");
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn test_json_format_is_case_insensitive() {
        let vars = HashMap::from([("MCU_LOG_FORMAT".to_string(), "JSON".to_string())]);
        let config = ObservabilityConfig::from_vars(&vars, "MCU_LOG_FORMAT", "info").unwrap();
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_format_rejected() {
        let vars = HashMap::from([("MCU_LOG_FORMAT".to_string(), "xml".to_string())]);
        let result = ObservabilityConfig::from_vars(&vars, "MCU_LOG_FORMAT", "info");
        assert!(matches!(result, Err(ObservabilityConfigError::InvalidLogFormat(v)) if v == "xml"));
    }
}
