//! Observability configuration parsing from environment variables.

use super::{Lookup, parse_or};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            _ => anyhow::bail!("Invalid LOG_FORMAT: {}. Must be 'pretty' or 'json'", s),
        }
    }
}

/// Observability environment configuration
#[derive(Debug, Clone)]
pub struct ObservabilityEnvConfig {
    pub enabled: bool,
    pub interval_seconds: u64,
    pub log_format: LogFormat,
}

impl Default for ObservabilityEnvConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_seconds: 60,
            log_format: LogFormat::Pretty,
        }
    }
}

impl ObservabilityEnvConfig {
    pub(crate) fn from_lookup(get: Lookup) -> Self {
        Self {
            enabled: parse_or(get, "OBSERVABILITY_ENABLED", true),
            interval_seconds: parse_or(get, "OBSERVABILITY_INTERVAL", 60u64).max(1),
            log_format: parse_or(get, "LOG_FORMAT", LogFormat::Pretty),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observability_config_defaults() {
        let config = ObservabilityEnvConfig::from_lookup(&|_: &str| -> Option<String> { None });
        assert!(config.enabled);
        assert_eq!(config.interval_seconds, 60);
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_json_log_format() {
        let get = |key: &str| (key == "LOG_FORMAT").then(|| "JSON".to_string());
        let config = ObservabilityEnvConfig::from_lookup(&get);
        assert_eq!(config.log_format, LogFormat::Json);
    }
}
