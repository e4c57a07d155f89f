use super::{FetcherSettings, decimal_from_json, positive, restrict_window, send_json};
use crate::domain::errors::SourceError;
use crate::domain::observation::PriceObservation;
use crate::domain::ports::{FetchTimeouts, PriceFetcher, SourceKind};
use crate::domain::rate_budget::RateBudget;
use crate::domain::symbol::{SymbolId, coingecko_id};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};

const KIND: SourceKind = SourceKind::CoinGecko;
const DEMO_KEY_HEADER: &str = "x-cg-demo-api-key";

pub struct CoinGeckoFetcher {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    rate_budget: RateBudget,
    timeouts: FetchTimeouts,
}

impl CoinGeckoFetcher {
    pub fn new(settings: &FetcherSettings) -> Self {
        Self {
            client: settings.client(),
            base_url: settings.trimmed_base_url(),
            api_key: settings.api_key.clone(),
            rate_budget: settings.rate_budget(),
            timeouts: settings.timeouts,
        }
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self.client.get(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.header(DEMO_KEY_HEADER, key),
            None => request,
        }
    }

    fn coin_id(symbol: &SymbolId) -> Result<String, SourceError> {
        if !symbol.is_crypto() {
            return Err(SourceError::Unsupported {
                provider: KIND.as_str().to_string(),
                symbol: symbol.canonical().to_string(),
            });
        }
        Ok(coingecko_id(symbol.base()))
    }
}

/// Parses a `/simple/price` response for one coin id.
pub fn parse_simple_price(
    symbol: &SymbolId,
    coin_id: &str,
    body: &Value,
    now: DateTime<Utc>,
) -> Result<Option<PriceObservation>, SourceError> {
    let Some(entry) = body.get(coin_id) else {
        return Ok(None);
    };
    let field = |key: &str| entry.get(key).and_then(decimal_from_json);

    let Some(close) = positive(field("usd")) else {
        return Ok(None);
    };

    let mut builder = PriceObservation::builder(symbol.canonical(), close, now, KIND.as_str())
        .volume(field("usd_24h_vol").filter(|v| !v.is_sign_negative()))
        .meta("coin_id", coin_id);

    for (key, meta) in [("usd_24h_change", "change_24h"), ("usd_market_cap", "market_cap")] {
        if let Some(v) = field(key) {
            builder = builder.meta(meta, v.to_string());
        }
    }

    builder
        .build_at(now)
        .map(Some)
        .map_err(|e| SourceError::payload(KIND.as_str(), e))
}

/// Parses a `/coins/{id}/market_chart` response. Volumes are joined by timestamp.
pub fn parse_market_chart(
    symbol: &SymbolId,
    body: &Value,
    max_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<PriceObservation>, SourceError> {
    let prices = body
        .get("prices")
        .and_then(Value::as_array)
        .ok_or_else(|| SourceError::payload(KIND.as_str(), "missing prices series"))?;

    let pair = |point: &Value| -> Option<(i64, Value)> {
        let arr = point.as_array()?;
        Some((arr.first()?.as_i64()?, arr.get(1)?.clone()))
    };

    let volumes: HashMap<i64, Value> = body
        .get("total_volumes")
        .and_then(Value::as_array)
        .map(|points| points.iter().filter_map(pair).collect())
        .unwrap_or_default();

    let observations = prices
        .iter()
        .filter_map(pair)
        .filter_map(|(millis, price)| {
            let timestamp = DateTime::from_timestamp_millis(millis)?;
            let close = positive(decimal_from_json(&price))?;
            let volume = volumes.get(&millis).and_then(decimal_from_json);
            PriceObservation::builder(symbol.canonical(), close, timestamp, KIND.as_str())
                .volume(volume)
                .meta("interval", "1d")
                .build_at(now)
                .ok()
        })
        .collect();

    Ok(restrict_window(observations, max_days, now))
}

#[async_trait]
impl PriceFetcher for CoinGeckoFetcher {
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
        let coin_id = Self::coin_id(symbol)?;
        let request = self.get("/simple/price").query(&[
            ("ids", coin_id.as_str()),
            ("vs_currencies", "usd"),
            ("include_24hr_change", "true"),
            ("include_24hr_vol", "true"),
            ("include_market_cap", "true"),
        ]);
        let body = send_json(KIND, request, self.timeouts.live).await?;
        let observation = parse_simple_price(symbol, &coin_id, &body, Utc::now())?;

        debug!(
            symbol = symbol.canonical(),
            found = observation.is_some(),
            "CoinGeckoFetcher: price fetched"
        );
        Ok(observation)
    }

    async fn fetch_historical(
        &self,
        symbol: &SymbolId,
        max_days: u32,
    ) -> Result<Vec<PriceObservation>, SourceError> {
        let coin_id = Self::coin_id(symbol)?;
        let days = max_days.to_string();
        let request = self
            .get(&format!("/coins/{}/market_chart", coin_id))
            .query(&[
                ("vs_currency", "usd"),
                ("days", days.as_str()),
                ("interval", "daily"),
            ]);
        let body = send_json(KIND, request, self.timeouts.historical).await?;
        let observations = parse_market_chart(symbol, &body, max_days, Utc::now())?;

        info!(
            "CoinGeckoFetcher: Fetched {} daily points for {}",
            observations.len(),
            symbol
        );
        Ok(observations)
    }
}
