use super::{FetcherSettings, decimal_from_json, positive, restrict_window, send_json};
use crate::domain::errors::SourceError;
use crate::domain::observation::PriceObservation;
use crate::domain::ports::{FetchTimeouts, PriceFetcher, SourceKind};
use crate::domain::rate_budget::RateBudget;
use crate::domain::symbol::SymbolId;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, info};

const KIND: SourceKind = SourceKind::AlphaVantage;
/// `outputsize=compact` returns the latest 100 points
const COMPACT_LIMIT_DAYS: u32 = 100;

pub struct AlphaVantageFetcher {
    client: Client,
    base_url: String,
    api_key: String,
    rate_budget: RateBudget,
    timeouts: FetchTimeouts,
}

impl AlphaVantageFetcher {
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

    fn ensure_equity(symbol: &SymbolId) -> Result<(), SourceError> {
        if symbol.is_crypto() {
            return Err(SourceError::Unsupported {
                provider: KIND.as_str().to_string(),
                symbol: symbol.canonical().to_string(),
            });
        }
        Ok(())
    }
}

/// Provider-level failures are reported inside a 200 response.
fn check_payload(body: &Value) -> Result<(), SourceError> {
    for key in ["Note", "Information"] {
        if let Some(note) = body.get(key).and_then(Value::as_str) {
            return Err(SourceError::rate_limited(KIND.as_str(), note));
        }
    }
    if let Some(message) = body.get("Error Message").and_then(Value::as_str) {
        return Err(SourceError::payload(KIND.as_str(), message));
    }
    Ok(())
}

fn trading_day(raw: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()?
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
}

fn field(obj: &Value, key: &str) -> Option<rust_decimal::Decimal> {
    obj.get(key).and_then(decimal_from_json)
}

/// Parses a `GLOBAL_QUOTE` response.
pub fn parse_global_quote(
    symbol: &SymbolId,
    body: &Value,
    now: DateTime<Utc>,
) -> Result<Option<PriceObservation>, SourceError> {
    check_payload(body)?;

    let quote = match body.get("Global Quote") {
        Some(q) if q.as_object().is_some_and(|o| !o.is_empty()) => q,
        _ => return Ok(None),
    };

    let Some(close) = positive(field(quote, "05. price")) else {
        return Ok(None);
    };

    let timestamp = quote
        .get("07. latest trading day")
        .and_then(Value::as_str)
        .and_then(trading_day)
        .unwrap_or(now);

    let mut builder = PriceObservation::builder(symbol.canonical(), close, timestamp, KIND.as_str())
        .open(positive(field(quote, "02. open")))
        .high(positive(field(quote, "03. high")))
        .low(positive(field(quote, "04. low")))
        .volume(field(quote, "06. volume"));

    for (key, meta) in [
        ("08. previous close", "previous_close"),
        ("09. change", "change"),
        ("10. change percent", "change_percent"),
    ] {
        if let Some(v) = field(quote, key) {
            builder = builder.meta(meta, v.to_string());
        }
    }

    builder
        .build_at(now)
        .map(Some)
        .map_err(|e| SourceError::payload(KIND.as_str(), e))
}

/// Parses a `TIME_SERIES_DAILY` response. Invalid rows are dropped.
pub fn parse_daily_series(
    symbol: &SymbolId,
    body: &Value,
    max_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<PriceObservation>, SourceError> {
    check_payload(body)?;

    let series = body
        .get("Time Series (Daily)")
        .and_then(Value::as_object)
        .ok_or_else(|| SourceError::payload(KIND.as_str(), "missing daily time series"))?;

    let observations = series
        .iter()
        .filter_map(|(date, bar)| {
            let timestamp = trading_day(date)?;
            let close = positive(field(bar, "4. close"))?;
            PriceObservation::builder(symbol.canonical(), close, timestamp, KIND.as_str())
                .open(positive(field(bar, "1. open")))
                .high(positive(field(bar, "2. high")))
                .low(positive(field(bar, "3. low")))
                .volume(field(bar, "5. volume"))
                .meta("interval", "1d")
                .build_at(now)
                .ok()
        })
        .collect();

    Ok(restrict_window(observations, max_days, now))
}

#[async_trait]
impl PriceFetcher for AlphaVantageFetcher {
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
        Self::ensure_equity(symbol)?;

        let request = self.client.get(format!("{}/query", self.base_url)).query(&[
            ("function", "GLOBAL_QUOTE"),
            ("symbol", symbol.canonical()),
            ("apikey", self.api_key.as_str()),
        ]);
        let body = send_json(KIND, request, self.timeouts.live).await?;
        let observation = parse_global_quote(symbol, &body, Utc::now())?;

        debug!(
            symbol = symbol.canonical(),
            found = observation.is_some(),
            "AlphaVantageFetcher: quote fetched"
        );
        Ok(observation)
    }

    async fn fetch_historical(
        &self,
        symbol: &SymbolId,
        max_days: u32,
    ) -> Result<Vec<PriceObservation>, SourceError> {
        Self::ensure_equity(symbol)?;

        let output_size = if max_days <= COMPACT_LIMIT_DAYS {
            "compact"
        } else {
            "full"
        };
        let request = self.client.get(format!("{}/query", self.base_url)).query(&[
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol.canonical()),
            ("outputsize", output_size),
            ("apikey", self.api_key.as_str()),
        ]);
        let body = send_json(KIND, request, self.timeouts.historical).await?;
        let observations = parse_daily_series(symbol, &body, max_days, Utc::now())?;

        info!(
            "AlphaVantageFetcher: Fetched {} daily bars for {}",
            observations.len(),
            symbol
        );
        Ok(observations)
    }
}
