use super::{FetcherSettings, decimal_from_json, positive, send_json};
use crate::domain::errors::SourceError;
use crate::domain::observation::PriceObservation;
use crate::domain::ports::{FetchTimeouts, PriceFetcher, SourceKind};
use crate::domain::rate_budget::RateBudget;
use crate::domain::symbol::SymbolId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

const KIND: SourceKind = SourceKind::Finnhub;

pub struct FinnhubFetcher {
    client: Client,
    base_url: String,
    api_key: String,
    rate_budget: RateBudget,
    timeouts: FetchTimeouts,
}

impl FinnhubFetcher {
    /// Returns `None` when no API key is configured.
    pub fn new(settings: &FetcherSettings) -> Option<Self> {
        let api_key = settings.api_key.clone()?;
        Some(Self {
            client: settings.client(),
            base_url: settings.trimmed_base_url(),
            api_key,
            rate_budget: settings.rate_budget(),
            timeouts: settings.timeouts,
        })
    }
}

/// Crypto quotes come from the Binance USDT book
pub fn provider_symbol(symbol: &SymbolId) -> String {
    if symbol.is_crypto() {
        format!("BINANCE:{}USDT", symbol.base())
    } else {
        symbol.canonical().to_string()
    }
}

/// Parses a `/quote` response (`c,o,h,l,pc,d,dp,t`).
pub fn parse_quote(
    symbol: &SymbolId,
    body: &Value,
    now: DateTime<Utc>,
) -> Result<Option<PriceObservation>, SourceError> {
    if let Some(error) = body.get("error").and_then(Value::as_str) {
        return Err(SourceError::payload(KIND.as_str(), error));
    }

    let field = |key: &str| body.get(key).and_then(decimal_from_json);

    // Unknown symbols and closed books answer with c = 0
    let Some(close) = positive(field("c")) else {
        return Ok(None);
    };

    let timestamp = if symbol.is_crypto() {
        now
    } else {
        body.get("t")
            .and_then(Value::as_i64)
            .filter(|t| *t > 0)
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .unwrap_or(now)
    };

    let mut builder = PriceObservation::builder(symbol.canonical(), close, timestamp, KIND.as_str())
        .open(positive(field("o")))
        .high(positive(field("h")))
        .low(positive(field("l")))
        .meta("provider_symbol", provider_symbol(symbol));

    for (key, meta) in [("pc", "previous_close"), ("d", "change"), ("dp", "change_percent")] {
        if let Some(v) = field(key) {
            builder = builder.meta(meta, v.to_string());
        }
    }

    builder
        .build_at(now)
        .map(Some)
        .map_err(|e| SourceError::payload(KIND.as_str(), e))
}

#[async_trait]
impl PriceFetcher for FinnhubFetcher {
    fn kind(&self) -> SourceKind {
        KIND
    }

    fn rate_budget(&self) -> &RateBudget {
        &self.rate_budget
    }

    fn timeouts(&self) -> FetchTimeouts {
        self.timeouts
    }

    async fn fetch_current(
        &self,
        symbol: &SymbolId,
    ) -> Result<Option<PriceObservation>, SourceError> {
        let request = self
            .client
            .get(format!("{}/quote", self.base_url))
            .header("X-Finnhub-Token", &self.api_key)
            .query(&[("symbol", provider_symbol(symbol))]);
        let body = send_json(KIND, request, self.timeouts.live).await?;
        let observation = parse_quote(symbol, &body, Utc::now())?;

        debug!(
            symbol = symbol.canonical(),
            found = observation.is_some(),
            "FinnhubFetcher: quote fetched"
        );
        Ok(observation)
    }

    /// Candle history is not available on the free tier.
    async fn fetch_historical(
        &self,
        symbol: &SymbolId,
        _max_days: u32,
    ) -> Result<Vec<PriceObservation>, SourceError> {
        debug!("FinnhubFetcher: no history support, returning empty range for {}", symbol);
        Ok(Vec::new())
    }
}
