//! Configuration module for priceflow.
//!
//! Structured configuration loaded once from environment variables, organized by
//! concern: upstream Sources, Ingestion/scheduling, and Observability.

mod ingestion_config;
mod observability_config;
mod source_config;

pub use ingestion_config::{DEFAULT_TRACKED_SYMBOLS, IngestionEnvConfig, parse_symbols};
pub use observability_config::{LogFormat, ObservabilityEnvConfig};
pub use source_config::{ProviderEnvConfig, SourceEnvConfig};

use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;

/// Variable lookup used by every sub-config
pub(crate) type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Reads `key` and parses it, falling back to `default` when unset or unparsable.
pub(crate) fn parse_or<T: FromStr>(get: Lookup, key: &str, default: T) -> T {
    get(key)
        .and_then(|raw| raw.trim().parse::<T>().ok())
        .unwrap_or(default)
}

/// Deployment environment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnv {
    Development,
    Production,
}

impl FromStr for AppEnv {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(AppEnv::Development),
            "production" | "prod" => Ok(AppEnv::Production),
            _ => anyhow::bail!(
                "Invalid APP_ENV: {}. Must be 'development' or 'production'",
                s
            ),
        }
    }
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub environment: AppEnv,
    pub sources: SourceEnvConfig,
    pub ingestion: IngestionEnvConfig,
    pub observability: ObservabilityEnvConfig,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(&|key: &str| env::var(key).ok())
    }

    pub(crate) fn from_lookup(get: Lookup) -> Result<Self> {
        let env_str = get("APP_ENV").unwrap_or_else(|| "development".to_string());
        let environment = AppEnv::from_str(&env_str)?;

        let sources = SourceEnvConfig::from_lookup(get).context("Failed to load source config")?;
        let ingestion =
            IngestionEnvConfig::from_lookup(get).context("Failed to load ingestion config")?;
        let observability = ObservabilityEnvConfig::from_lookup(get);

        let config = Self {
            environment,
            sources,
            ingestion,
            observability,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.environment == AppEnv::Production && self.sources.finnhub.api_key.is_none() {
            anyhow::bail!("FINNHUB_API_KEY is required when APP_ENV=production");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(&move |key: &str| vars.get(key).cloned())
    }

    #[test]
    fn test_config_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.environment, AppEnv::Development);
        assert_eq!(config.ingestion.database_url, "sqlite://data/priceflow.db");
        assert!(config.observability.enabled);
    }

    #[test]
    fn test_production_requires_finnhub_key() {
        assert!(load(&[("APP_ENV", "production")]).is_err());
        let config = load(&[("APP_ENV", "production"), ("FINNHUB_API_KEY", "k")]).unwrap();
        assert_eq!(config.environment, AppEnv::Production);
    }

    #[test]
    fn test_invalid_app_env() {
        assert!(load(&[("APP_ENV", "staging")]).is_err());
    }
}
