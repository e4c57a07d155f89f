//! Upstream price providers.
//!
//! Each provider pairs a thin HTTP call with a pure `parse_*` function so payload
//! handling can be exercised against fixtures without a network. Shared plumbing
//! (status mapping, decimal parsing, window filtering) lives here.

pub mod alpha_vantage;
pub mod coingecko;
pub mod finnhub;
pub mod yahoo;

pub use alpha_vantage::AlphaVantageFetcher;
pub use coingecko::CoinGeckoFetcher;
pub use finnhub::FinnhubFetcher;
pub use yahoo::YahooFetcher;

use crate::domain::errors::SourceError;
use crate::domain::observation::PriceObservation;
use crate::domain::ports::{FetchTimeouts, SourceKind};
use crate::domain::rate_budget::RateBudget;
use crate::infrastructure::core::HttpClientFactory;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::Value;
use std::str::FromStr;

const MAX_ERROR_BODY: usize = 200;

/// Connection settings shared by every provider
#[derive(Debug, Clone)]
pub struct FetcherSettings {
    pub kind: SourceKind,
    pub base_url: String,
    pub api_key: Option<String>,
    pub calls_per_minute: u32,
    pub timeouts: FetchTimeouts,
}

impl FetcherSettings {
    pub fn defaults(kind: SourceKind, base_url: impl Into<String>) -> Self {
        Self {
            kind,
            base_url: base_url.into(),
            api_key: None,
            calls_per_minute: kind.default_calls_per_minute(),
            timeouts: kind.default_timeouts(),
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key.filter(|k| !k.trim().is_empty());
        self
    }

    pub(crate) fn client(&self) -> Client {
        HttpClientFactory::create_client(self.timeouts.live.max(self.timeouts.historical))
    }

    pub(crate) fn rate_budget(&self) -> RateBudget {
        RateBudget::new(self.kind.as_str(), self.calls_per_minute)
    }

    pub(crate) fn trimmed_base_url(&self) -> String {
        self.base_url.trim_end_matches('/').to_string()
    }
}

/// Sends one request and decodes a JSON body, normalizing every failure mode.
pub(crate) async fn send_json(
    provider: SourceKind,
    request: RequestBuilder,
    timeout: std::time::Duration,
) -> Result<Value, SourceError> {
    let name = provider.as_str();
    let response = request.timeout(timeout).send().await.map_err(|e| {
        if e.is_timeout() {
            SourceError::Timeout {
                provider: name.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }
        } else {
            SourceError::request(name, e)
        }
    })?;

    let status = response.status();
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(SourceError::rate_limited(name, "HTTP 429"));
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(SourceError::Status {
            provider: name.to_string(),
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY).collect(),
        });
    }

    response
        .json::<Value>()
        .await
        .map_err(|e| SourceError::payload(name, format!("invalid JSON: {}", e)))
}

/// Reads a decimal from a JSON number or numeric string.
pub(crate) fn decimal_from_json(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => parse_decimal_str(s),
        Value::Number(n) => {
            parse_decimal_str(&n.to_string()).or_else(|| n.as_f64().and_then(Decimal::from_f64))
        }
        _ => None,
    }
}

fn parse_decimal_str(s: &str) -> Option<Decimal> {
    let s = s.trim().trim_end_matches('%');
    Decimal::from_str(s)
        .or_else(|_| Decimal::from_scientific(s))
        .ok()
}

/// Positive decimal or nothing
pub(crate) fn positive(value: Option<Decimal>) -> Option<Decimal> {
    value.filter(|v| *v > Decimal::ZERO)
}

/// Sorts ascending and keeps observations within the last `max_days` days.
pub(crate) fn restrict_window(
    mut observations: Vec<PriceObservation>,
    max_days: u32,
    now: DateTime<Utc>,
) -> Vec<PriceObservation> {
    let cutoff = now - Duration::days(i64::from(max_days));
    observations.retain(|o| o.timestamp() >= cutoff);
    observations.sort_by_key(|o| o.timestamp());
    observations
}
