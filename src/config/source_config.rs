//! Upstream provider configuration parsing from environment variables.

use super::{Lookup, parse_or};
use crate::domain::ports::{FetchTimeouts, SourceKind};
use anyhow::{Context, Result};
use std::time::Duration;

/// One provider's connection settings
#[derive(Debug, Clone)]
pub struct ProviderEnvConfig {
    pub kind: SourceKind,
    pub api_key: Option<String>,
    pub base_url: String,
    pub calls_per_minute: u32,
    pub timeouts: FetchTimeouts,
}

impl ProviderEnvConfig {
    fn env_prefix(kind: SourceKind) -> &'static str {
        match kind {
            SourceKind::AlphaVantage => "ALPHAVANTAGE",
            SourceKind::Yahoo => "YAHOO",
            SourceKind::Finnhub => "FINNHUB",
            SourceKind::CoinGecko => "COINGECKO",
        }
    }

    pub fn default_base_url(kind: SourceKind) -> &'static str {
        match kind {
            SourceKind::AlphaVantage => "https://www.alphavantage.co",
            SourceKind::Yahoo => "https://query1.finance.yahoo.com",
            SourceKind::Finnhub => "https://finnhub.io/api/v1",
            SourceKind::CoinGecko => "https://api.coingecko.com/api/v3",
        }
    }

    fn from_lookup(kind: SourceKind, get: Lookup) -> Result<Self> {
        let prefix = Self::env_prefix(kind);
        let defaults = kind.default_timeouts();

        let base_url = get(&format!("{}_BASE_URL", prefix))
            .unwrap_or_else(|| Self::default_base_url(kind).to_string());
        url::Url::parse(&base_url)
            .with_context(|| format!("Invalid {}_BASE_URL: {}", prefix, base_url))?;

        let live_secs = parse_or(get, &format!("{}_TIMEOUT", prefix), defaults.live.as_secs());
        let history_secs = parse_or(
            get,
            &format!("{}_HISTORY_TIMEOUT", prefix),
            defaults.historical.as_secs().max(live_secs),
        );

        Ok(Self {
            kind,
            api_key: get(&format!("{}_API_KEY", prefix)).filter(|k| !k.trim().is_empty()),
            base_url,
            calls_per_minute: parse_or(
                get,
                &format!("{}_RATE_LIMIT", prefix),
                kind.default_calls_per_minute(),
            ),
            timeouts: FetchTimeouts {
                live: Duration::from_secs(live_secs),
                historical: Duration::from_secs(history_secs),
            },
        })
    }
}

/// Aggregated provider configuration
#[derive(Debug, Clone)]
pub struct SourceEnvConfig {
    pub alpha_vantage: ProviderEnvConfig,
    pub yahoo: ProviderEnvConfig,
    pub finnhub: ProviderEnvConfig,
    pub coingecko: ProviderEnvConfig,
    /// Optional TOML file overriding the source priority tables
    pub priority_file: Option<String>,
}

impl SourceEnvConfig {
    pub(crate) fn from_lookup(get: Lookup) -> Result<Self> {
        Ok(Self {
            alpha_vantage: ProviderEnvConfig::from_lookup(SourceKind::AlphaVantage, get)?,
            yahoo: ProviderEnvConfig::from_lookup(SourceKind::Yahoo, get)?,
            finnhub: ProviderEnvConfig::from_lookup(SourceKind::Finnhub, get)?,
            coingecko: ProviderEnvConfig::from_lookup(SourceKind::CoinGecko, get)?,
            priority_file: get("SOURCE_PRIORITY_FILE").filter(|p| !p.trim().is_empty()),
        })
    }

    pub fn provider(&self, kind: SourceKind) -> &ProviderEnvConfig {
        match kind {
            SourceKind::AlphaVantage => &self.alpha_vantage,
            SourceKind::Yahoo => &self.yahoo,
            SourceKind::Finnhub => &self.finnhub,
            SourceKind::CoinGecko => &self.coingecko,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<SourceEnvConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        SourceEnvConfig::from_lookup(&move |key: &str| vars.get(key).cloned())
    }

    #[test]
    fn test_provider_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.alpha_vantage.calls_per_minute, 1);
        assert!(config.alpha_vantage.api_key.is_none());
        assert_eq!(config.yahoo.timeouts.live, Duration::from_secs(10));
        assert_eq!(config.yahoo.timeouts.historical, Duration::from_secs(30));
        assert_eq!(config.coingecko.base_url, "https://api.coingecko.com/api/v3");
        assert!(config.priority_file.is_none());
    }

    #[test]
    fn test_provider_overrides() {
        let config = load(&[
            ("FINNHUB_API_KEY", "abc"),
            ("FINNHUB_RATE_LIMIT", "30"),
            ("FINNHUB_TIMEOUT", "5"),
            ("YAHOO_RATE_LIMIT", "not-a-number"),
        ])
        .unwrap();

        assert_eq!(config.finnhub.api_key.as_deref(), Some("abc"));
        assert_eq!(config.finnhub.calls_per_minute, 30);
        assert_eq!(config.finnhub.timeouts.live, Duration::from_secs(5));
        assert_eq!(config.yahoo.calls_per_minute, 30);
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        assert!(load(&[("YAHOO_BASE_URL", "not a url")]).is_err());
    }

    #[test]
    fn test_blank_api_key_is_absent() {
        let config = load(&[("ALPHAVANTAGE_API_KEY", "  ")]).unwrap();
        assert!(config.provider(SourceKind::AlphaVantage).api_key.is_none());
    }
}
