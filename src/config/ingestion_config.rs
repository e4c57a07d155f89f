//! Ingestion and scheduling configuration parsing from environment variables.

use super::{Lookup, parse_or};
use crate::domain::market_hours::MarketHours;
use anyhow::{Context, Result};
use chrono::NaiveTime;
use std::time::Duration;

pub const DEFAULT_TRACKED_SYMBOLS: &str = "SPY,QQQ,IWM,BTC/USD";

#[derive(Debug, Clone)]
pub struct IngestionEnvConfig {
    pub database_url: String,
    pub tracked_symbols: Vec<String>,
    pub realtime_interval_minutes: u64,
    pub concurrency: usize,
    pub cache_ttl: Duration,
    pub cache_freshness: Duration,
    pub market_hours: MarketHours,
    pub daily_refresh_time: NaiveTime,
    pub maintenance_time: NaiveTime,
    pub history_refresh_days: u32,
    pub backfill_min_days: u32,
    pub backfill_max_days: u32,
    pub scheduler_poll: Duration,
}

impl Default for IngestionEnvConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/priceflow.db".to_string(),
            tracked_symbols: parse_symbols(DEFAULT_TRACKED_SYMBOLS),
            realtime_interval_minutes: 1,
            concurrency: 5,
            cache_ttl: Duration::from_secs(900),
            cache_freshness: Duration::from_secs(15 * 60),
            market_hours: MarketHours::default(),
            daily_refresh_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            maintenance_time: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
            history_refresh_days: 30,
            backfill_min_days: 90,
            backfill_max_days: 90,
            scheduler_poll: Duration::from_secs(30),
        }
    }
}

/// Splits a comma separated list, trimming and uppercasing, dropping blanks and duplicates.
pub fn parse_symbols(raw: &str) -> Vec<String> {
    let mut symbols: Vec<String> = Vec::new();
    for symbol in raw.split(',').map(|s| s.trim().to_uppercase()) {
        if !symbol.is_empty() && !symbols.contains(&symbol) {
            symbols.push(symbol);
        }
    }
    symbols
}

fn parse_time(raw: &str) -> Result<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M")
        .with_context(|| format!("Invalid time of day '{}', expected HH:MM", raw))
}

fn time_of_day(hour: u32, minute: u32, fallback: NaiveTime) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(fallback)
}

impl IngestionEnvConfig {
    pub(crate) fn from_lookup(get: Lookup) -> Result<Self> {
        let defaults = Self::default();

        let tracked_symbols = get("TRACKED_SYMBOLS")
            .map(|raw| parse_symbols(&raw))
            .unwrap_or(defaults.tracked_symbols);

        let market_hours = MarketHours::new(
            time_of_day(
                parse_or(get, "MARKET_OPEN_HOUR", 14),
                parse_or(get, "MARKET_OPEN_MINUTE", 30),
                defaults.market_hours.open,
            ),
            time_of_day(
                parse_or(get, "MARKET_CLOSE_HOUR", 21),
                parse_or(get, "MARKET_CLOSE_MINUTE", 0),
                defaults.market_hours.close,
            ),
        );
        if market_hours.open >= market_hours.close {
            anyhow::bail!(
                "Market open {} must be before market close {}",
                market_hours.open,
                market_hours.close
            );
        }

        let daily_refresh_time = match get("DAILY_REFRESH_TIME") {
            Some(raw) => parse_time(&raw)?,
            None => defaults.daily_refresh_time,
        };
        let maintenance_time = match get("MAINTENANCE_TIME") {
            Some(raw) => parse_time(&raw)?,
            None => defaults.maintenance_time,
        };

        Ok(Self {
            database_url: get("DATABASE_URL").unwrap_or(defaults.database_url),
            tracked_symbols,
            realtime_interval_minutes: parse_or(get, "REALTIME_INTERVAL", 1u64).max(1),
            concurrency: parse_or(get, "INGESTION_CONCURRENCY", 5usize).max(1),
            cache_ttl: Duration::from_secs(parse_or(get, "CACHE_TTL_SECONDS", 900)),
            cache_freshness: Duration::from_secs(
                parse_or(get, "CACHE_FRESHNESS_MINUTES", 15u64) * 60,
            ),
            market_hours,
            daily_refresh_time,
            maintenance_time,
            history_refresh_days: parse_or(get, "HISTORY_REFRESH_DAYS", 30),
            backfill_min_days: parse_or(get, "BACKFILL_MIN_DAYS", 90),
            backfill_max_days: parse_or(get, "BACKFILL_MAX_DAYS", 90),
            scheduler_poll: Duration::from_secs(parse_or(get, "SCHEDULER_POLL_SECONDS", 30u64).max(1)),
        })
    }
}
