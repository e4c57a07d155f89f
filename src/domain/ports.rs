use crate::domain::errors::{CacheError, SourceError};
use crate::domain::observation::PriceObservation;
use crate::domain::rate_budget::RateBudget;
use crate::domain::symbol::{SymbolClass, SymbolId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The closed set of upstream providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    AlphaVantage,
    Yahoo,
    Finnhub,
    #[serde(rename = "coingecko")]
    CoinGecko,
}

impl SourceKind {
    pub const ALL: [SourceKind; 4] = [
        SourceKind::AlphaVantage,
        SourceKind::Yahoo,
        SourceKind::Finnhub,
        SourceKind::CoinGecko,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::AlphaVantage => "alpha_vantage",
            SourceKind::Yahoo => "yahoo",
            SourceKind::Finnhub => "finnhub",
            SourceKind::CoinGecko => "coingecko",
        }
    }

    /// Conservative per-minute ceilings for the free tiers
    pub fn default_calls_per_minute(&self) -> u32 {
        match self {
            SourceKind::AlphaVantage => 1,
            SourceKind::Yahoo => 30,
            SourceKind::Finnhub => 58,
            SourceKind::CoinGecko => 50,
        }
    }

    pub fn default_timeouts(&self) -> FetchTimeouts {
        let (live, historical) = match self {
            SourceKind::AlphaVantage => (30, 30),
            SourceKind::Yahoo => (10, 30),
            SourceKind::Finnhub => (10, 10),
            SourceKind::CoinGecko => (15, 15),
        };
        FetchTimeouts {
            live: Duration::from_secs(live),
            historical: Duration::from_secs(historical),
        }
    }

    pub fn health_check_symbol(&self) -> &'static str {
        match self {
            SourceKind::AlphaVantage | SourceKind::Yahoo => "SPY",
            SourceKind::Finnhub => "AAPL",
            SourceKind::CoinGecko => "BTC/USD",
        }
    }

    pub fn supports(&self, class: SymbolClass) -> bool {
        match self {
            SourceKind::AlphaVantage => class == SymbolClass::Equity,
            SourceKind::CoinGecko => class == SymbolClass::Crypto,
            SourceKind::Yahoo | SourceKind::Finnhub => true,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "alpha_vantage" | "alphavantage" => Ok(SourceKind::AlphaVantage),
            "yahoo" => Ok(SourceKind::Yahoo),
            "finnhub" => Ok(SourceKind::Finnhub),
            "coingecko" => Ok(SourceKind::CoinGecko),
            _ => anyhow::bail!(
                "Invalid source: {}. Must be 'alpha_vantage', 'yahoo', 'finnhub' or 'coingecko'",
                s
            ),
        }
    }
}

/// Per-call deadlines: short for live quotes, longer for historical ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTimeouts {
    pub live: Duration,
    pub historical: Duration,
}

/// Capability implemented by every upstream provider.
///
/// Implementations never retry: one call, one outcome. `Ok(None)` means the provider
/// answered but had no usable price (for example a zero last-price on a closed market).
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    fn kind(&self) -> SourceKind;

    fn rate_budget(&self) -> &RateBudget;

    fn timeouts(&self) -> FetchTimeouts {
        self.kind().default_timeouts()
    }

    async fn fetch_current(
        &self,
        symbol: &SymbolId,
    ) -> Result<Option<PriceObservation>, SourceError>;

    /// Observations sorted ascending by timestamp, restricted to the last `max_days` days.
    async fn fetch_historical(
        &self,
        symbol: &SymbolId,
        max_days: u32,
    ) -> Result<Vec<PriceObservation>, SourceError>;

    async fn health_check(&self) -> bool {
        let symbol = SymbolId::parse(self.kind().health_check_symbol());
        self.rate_budget().record();
        match self.fetch_current(&symbol).await {
            Ok(Some(_)) => true,
            Ok(None) => {
                tracing::warn!("{}: health check returned no data for {}", self.kind(), symbol);
                false
            }
            Err(e) => {
                tracing::warn!("{}: health check failed: {}", self.kind(), e);
                false
            }
        }
    }
}

/// Latest-price and range cache
#[async_trait]
pub trait PriceCache: Send + Sync {
    async fn get(&self, symbol: &str) -> Result<Option<PriceObservation>, CacheError>;

    async fn set(
        &self,
        symbol: &str,
        observation: &PriceObservation,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn get_historical(
        &self,
        symbol: &str,
        days: u32,
    ) -> Result<Option<Vec<PriceObservation>>, CacheError>;

    async fn set_historical(
        &self,
        symbol: &str,
        days: u32,
        observations: &[PriceObservation],
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Drops every key belonging to `symbol`. Returns the number of removed entries.
    async fn invalidate_symbol(&self, symbol: &str) -> Result<usize, CacheError>;

    /// Invalidates every key of `symbol` and re-seeds its latest price with the newer of
    /// `candidate` and the entry already cached, as one atomic step.
    /// Returns true when `candidate` became the latest entry.
    async fn replace_latest(
        &self,
        symbol: &str,
        candidate: &PriceObservation,
        ttl: Duration,
    ) -> Result<bool, CacheError>;

    /// Drops expired entries whose key matches a `*` glob pattern.
    async fn prune(&self, pattern: &str) -> Result<usize, CacheError>;

    async fn stats(&self) -> CacheStats;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub status: String,
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub errors: u64,
    pub evictions: u64,
}
