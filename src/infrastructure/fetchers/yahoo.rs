use super::{FetcherSettings, decimal_from_json, positive, restrict_window, send_json};
use crate::domain::errors::SourceError;
use crate::domain::observation::PriceObservation;
use crate::domain::ports::{FetchTimeouts, PriceFetcher, SourceKind};
use crate::domain::rate_budget::RateBudget;
use crate::domain::symbol::{CRYPTO_QUOTE, SymbolId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use serde_json::Value;
use tracing::{debug, info};

const KIND: SourceKind = SourceKind::Yahoo;

/// Chart ranges supported by the API, with the number of days each one covers
const RANGE_BUCKETS: &[(u32, &str)] = &[(5, "5d"), (30, "1mo"), (90, "3mo"), (180, "6mo")];
const MAX_RANGE: &str = "1y";

pub struct YahooFetcher {
    client: Client,
    base_url: String,
    rate_budget: RateBudget,
    timeouts: FetchTimeouts,
}

impl YahooFetcher {
    pub fn new(settings: &FetcherSettings) -> Self {
        Self {
            client: settings.client(),
            base_url: settings.trimmed_base_url(),
            rate_budget: settings.rate_budget(),
            timeouts: settings.timeouts,
        }
    }

    fn chart_url(&self, symbol: &SymbolId) -> String {
        format!("{}/v8/finance/chart/{}", self.base_url, provider_symbol(symbol))
    }
}

/// Crypto pairs are quoted as `BASE-USD`
pub fn provider_symbol(symbol: &SymbolId) -> String {
    if symbol.is_crypto() {
        format!("{}-{}", symbol.base(), CRYPTO_QUOTE)
    } else {
        symbol.canonical().to_string()
    }
}

/// Smallest supported range that covers `days`
pub fn range_for_days(days: u32) -> &'static str {
    RANGE_BUCKETS
        .iter()
        .find(|(limit, _)| days <= *limit)
        .map(|(_, range)| *range)
        .unwrap_or(MAX_RANGE)
}

/// Unwraps `chart.result[0]`. A "Not Found" chart error means the symbol is unknown.
fn chart_result(body: &Value) -> Result<Option<&Value>, SourceError> {
    let chart = body
        .get("chart")
        .ok_or_else(|| SourceError::payload(KIND.as_str(), "missing chart object"))?;

    if let Some(error) = chart.get("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_str).unwrap_or_default();
        if code.eq_ignore_ascii_case("Not Found") {
            return Ok(None);
        }
        let description = error
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or(code);
        return Err(SourceError::payload(KIND.as_str(), description));
    }

    Ok(chart
        .get("result")
        .and_then(Value::as_array)
        .and_then(|results| results.first()))
}

struct Bars<'a> {
    timestamps: Vec<Option<i64>>,
    quote: Option<&'a Value>,
}

impl<'a> Bars<'a> {
    fn from_result(result: &'a Value) -> Self {
        let timestamps = result
            .get("timestamp")
            .and_then(Value::as_array)
            .map(|ts| ts.iter().map(Value::as_i64).collect())
            .unwrap_or_default();
        let quote = result
            .pointer("/indicators/quote")
            .and_then(Value::as_array)
            .and_then(|q| q.first());
        Self { timestamps, quote }
    }

    fn series(&self, name: &str) -> Vec<Option<Decimal>> {
        self.quote
            .and_then(|q| q.get(name))
            .and_then(Value::as_array)
            .map(|values| values.iter().map(decimal_from_json).collect())
            .unwrap_or_default()
    }
}

fn at(series: &[Option<Decimal>], i: usize) -> Option<Decimal> {
    series.get(i).copied().flatten()
}

/// Parses a `range=1d&interval=1m` chart into one aggregated observation.
pub fn parse_live_chart(
    symbol: &SymbolId,
    body: &Value,
    now: DateTime<Utc>,
) -> Result<Option<PriceObservation>, SourceError> {
    let Some(result) = chart_result(body)? else {
        return Ok(None);
    };
    let meta = result.get("meta");
    let bars = Bars::from_result(result);

    let opens = bars.series("open");
    let highs = bars.series("high");
    let lows = bars.series("low");
    let closes = bars.series("close");
    let volumes = bars.series("volume");

    let last_close = closes.iter().rev().find_map(|c| positive(*c));
    let close = meta
        .and_then(|m| m.get("regularMarketPrice"))
        .and_then(decimal_from_json)
        .and_then(|p| positive(Some(p)))
        .or(last_close);
    let Some(close) = close else {
        return Ok(None);
    };

    let open = opens.iter().find_map(|o| positive(*o));
    let high = highs.iter().filter_map(|h| positive(*h)).max();
    let low = lows.iter().filter_map(|l| positive(*l)).min();
    let volume = volumes
        .iter()
        .flatten()
        .copied()
        .reduce(|a, b| a + b);

    // Crypto trades continuously: stamp with capture time
    let timestamp = if symbol.is_crypto() {
        now
    } else {
        meta.and_then(|m| m.get("regularMarketTime"))
            .and_then(Value::as_i64)
            .or_else(|| bars.timestamps.iter().rev().find_map(|t| *t))
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(now)
    };

    let mut builder = PriceObservation::builder(symbol.canonical(), close, timestamp, KIND.as_str())
        .open(open)
        .high(high)
        .low(low)
        .volume(volume)
        .meta("interval", "1m")
        .meta("provider_symbol", provider_symbol(symbol));

    if let Some(currency) = meta
        .and_then(|m| m.get("currency"))
        .and_then(Value::as_str)
    {
        builder = builder.meta("currency", currency);
    }

    builder
        .build_at(now)
        .map(Some)
        .map_err(|e| SourceError::payload(KIND.as_str(), e))
}

/// Parses an `interval=1d` chart into daily observations within `max_days`.
pub fn parse_history_chart(
    symbol: &SymbolId,
    body: &Value,
    max_days: u32,
    now: DateTime<Utc>,
) -> Result<Vec<PriceObservation>, SourceError> {
    let Some(result) = chart_result(body)? else {
        return Ok(Vec::new());
    };
    let bars = Bars::from_result(result);

    let opens = bars.series("open");
    let highs = bars.series("high");
    let lows = bars.series("low");
    let closes = bars.series("close");
    let volumes = bars.series("volume");
    let range = range_for_days(max_days);

    let observations = bars
        .timestamps
        .iter()
        .enumerate()
        .filter_map(|(i, ts)| {
            let timestamp = DateTime::from_timestamp((*ts)?, 0)?;
            let close = positive(at(&closes, i))?;
            PriceObservation::builder(symbol.canonical(), close, timestamp, KIND.as_str())
                .open(positive(at(&opens, i)))
                .high(positive(at(&highs, i)))
                .low(positive(at(&lows, i)))
                .volume(at(&volumes, i))
                .meta("interval", "1d")
                .meta("range", range)
                .meta("requested_days", max_days)
                .build_at(now)
                .ok()
        })
        .collect();

    Ok(restrict_window(observations, max_days, now))
}

#[async_trait]
impl PriceFetcher for YahooFetcher {
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
            .get(self.chart_url(symbol))
            .query(&[("range", "1d"), ("interval", "1m")]);
        let body = send_json(KIND, request, self.timeouts.live).await?;
        let observation = parse_live_chart(symbol, &body, Utc::now())?;

        debug!(
            symbol = symbol.canonical(),
            found = observation.is_some(),
            "YahooFetcher: chart fetched"
        );
        Ok(observation)
    }

    async fn fetch_historical(
        &self,
        symbol: &SymbolId,
        max_days: u32,
    ) -> Result<Vec<PriceObservation>, SourceError> {
        let range = range_for_days(max_days);
        let request = self
            .client
            .get(self.chart_url(symbol))
            .query(&[("range", range), ("interval", "1d")]);
        let body = send_json(KIND, request, self.timeouts.historical).await?;
        let observations = parse_history_chart(symbol, &body, max_days, Utc::now())?;

        info!(
            "YahooFetcher: Fetched {} daily bars for {} (range {})",
            observations.len(),
            symbol,
            range
        );
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 13, 16, 0, 0).unwrap()
    }

    fn chart(timestamps: Vec<i64>, closes: Value, meta: Value) -> Value {
        json!({
            "chart": {
                "result": [{
                    "meta": meta,
                    "timestamp": timestamps,
                    "indicators": { "quote": [{
                        "open": [10.0, null, 10.5],
                        "high": [11.0, 12.5, 10.9],
                        "low": [9.5, 9.9, 9.0],
                        "close": closes,
                        "volume": [100, null, 50]
                    }]}
                }],
                "error": null
            }
        })
    }

    #[test]
    fn test_range_buckets() {
        assert_eq!(range_for_days(1), "5d");
        assert_eq!(range_for_days(5), "5d");
        assert_eq!(range_for_days(30), "1mo");
        assert_eq!(range_for_days(90), "3mo");
        assert_eq!(range_for_days(91), "6mo");
        assert_eq!(range_for_days(400), "1y");
    }

    #[test]
    fn test_crypto_provider_symbol() {
        assert_eq!(provider_symbol(&SymbolId::parse("BTC/USD")), "BTC-USD");
        assert_eq!(provider_symbol(&SymbolId::parse("aapl")), "AAPL");
    }

    #[test]
    fn test_live_chart_aggregates_bars() {
        let ts = now().timestamp();
        let body = chart(
            vec![ts - 120, ts - 60, ts],
            json!([10.2, null, 10.4]),
            json!({ "regularMarketPrice": 10.45, "regularMarketTime": ts, "currency": "USD" }),
        );
        let obs = parse_live_chart(&SymbolId::parse("SPY"), &body, now())
            .unwrap()
            .unwrap();

        assert_eq!(obs.close(), dec!(10.45));
        assert_eq!(obs.open(), Some(dec!(10.0)));
        assert_eq!(obs.high(), Some(dec!(12.5)));
        assert_eq!(obs.low(), Some(dec!(9.0)));
        assert_eq!(obs.volume(), Some(dec!(150)));
        assert_eq!(obs.timestamp(), now());
        assert_eq!(obs.metadata()["currency"], "USD");
    }

    #[test]
    fn test_live_chart_falls_back_to_last_close() {
        let ts = now().timestamp();
        let body = chart(vec![ts - 120, ts - 60, ts], json!([10.2, 10.3, null]), json!({}));
        let obs = parse_live_chart(&SymbolId::parse("SPY"), &body, now())
            .unwrap()
            .unwrap();
        assert_eq!(obs.close(), dec!(10.3));
        assert_eq!(obs.timestamp().timestamp(), ts);
    }

    #[test]
    fn test_not_found_chart_is_none() {
        let body = json!({
            "chart": { "result": null, "error": { "code": "Not Found", "description": "No data found, symbol may be delisted" } }
        });
        assert!(parse_live_chart(&SymbolId::parse("ZZZZ"), &body, now()).unwrap().is_none());
        assert!(parse_history_chart(&SymbolId::parse("ZZZZ"), &body, 30, now()).unwrap().is_empty());
    }

    #[test]
    fn test_history_chart_skips_null_closes() {
        let day = 86_400;
        let ts = now().timestamp();
        let body = chart(
            vec![ts - 3 * day, ts - 2 * day, ts - day],
            json!([10.2, null, 10.4]),
            json!({}),
        );
        let out = parse_history_chart(&SymbolId::parse("QQQ"), &body, 5, now()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].metadata()["range"], "5d");
        assert_eq!(out[1].close(), dec!(10.4));
        assert_eq!(out[1].volume(), Some(dec!(50)));
    }
}
