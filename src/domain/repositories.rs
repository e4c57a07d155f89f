//! Persistence abstractions for price observations.
//!
//! The `PriceStore` trait hides the storage engine from the ingestion pipeline. The SQLite
//! implementation lives in `infrastructure::persistence`; tests use hand-written fakes.

use crate::domain::observation::PriceObservation;
use crate::domain::symbol::SymbolClass;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// A symbol's latest row older than this is considered stale coverage
pub const MAX_STALENESS_DAYS: i64 = 7;

/// Row span of one symbol partition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Coverage {
    pub rows: u64,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Outcome of a sufficiency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoverageAssessment {
    Sufficient,
    Empty,
    ShortSpan { span_days: i64 },
    Stale { latest: DateTime<Utc> },
}

impl CoverageAssessment {
    pub fn needs_data(&self) -> bool {
        !matches!(self, CoverageAssessment::Sufficient)
    }

    pub fn reason(&self, min_days: u32) -> String {
        match self {
            CoverageAssessment::Sufficient => "coverage sufficient".to_string(),
            CoverageAssessment::Empty => "no data".to_string(),
            CoverageAssessment::ShortSpan { span_days } => {
                format!("{} days of data, {} required", span_days, min_days)
            }
            CoverageAssessment::Stale { latest } => {
                format!("latest row {} is stale", latest.format("%Y-%m-%d"))
            }
        }
    }
}

impl Coverage {
    pub fn span_days(&self) -> i64 {
        match (self.earliest, self.latest) {
            (Some(earliest), Some(latest)) => (latest - earliest).num_days(),
            _ => 0,
        }
    }

    pub fn assess(&self, min_days: u32, now: DateTime<Utc>) -> CoverageAssessment {
        let latest = match self.latest {
            Some(latest) if self.rows > 0 => latest,
            _ => return CoverageAssessment::Empty,
        };

        let span_days = self.span_days();
        if span_days < i64::from(min_days) {
            return CoverageAssessment::ShortSpan { span_days };
        }

        if now - latest > Duration::days(MAX_STALENESS_DAYS) {
            return CoverageAssessment::Stale { latest };
        }

        CoverageAssessment::Sufficient
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BulkInsertSummary {
    pub stored: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Row counts per partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub instruments: u64,
    pub daily_prices: u64,
    pub intraday_prices: u64,
    pub crypto_prices: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Instrument {
    pub symbol: String,
    pub class: SymbolClass,
    pub added_at: DateTime<Utc>,
}

/// Canonical persistent store of price observations
#[async_trait]
pub trait PriceStore: Send + Sync {
    /// Insert or replace the observation keyed by (symbol, timestamp).
    /// Equities go to the daily partition, crypto to the crypto partition.
    async fn upsert(&self, observation: &PriceObservation) -> Result<()>;

    /// Insert or replace into the intraday partition, bucketed to 5 minutes.
    async fn upsert_intraday(&self, observation: &PriceObservation) -> Result<()>;

    async fn coverage(&self, symbol: &str) -> Result<Coverage>;

    async fn needs_backfill(&self, symbol: &str, min_days: u32) -> Result<bool> {
        let coverage = self.coverage(symbol).await?;
        Ok(coverage.assess(min_days, Utc::now()).needs_data())
    }

    /// Validates and stores a batch in one transaction. Invalid records are skipped.
    async fn bulk_insert(
        &self,
        symbol: &str,
        observations: &[PriceObservation],
    ) -> Result<BulkInsertSummary>;

    async fn find(
        &self,
        symbol: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<Option<PriceObservation>>;

    async fn latest(&self, symbol: &str) -> Result<Option<PriceObservation>>;

    async fn count(&self, symbol: &str) -> Result<u64>;

    async fn upsert_instrument(&self, symbol: &str, class: SymbolClass) -> Result<()>;

    async fn list_instruments(&self) -> Result<Vec<Instrument>>;

    async fn stats(&self) -> Result<StoreStats>;

    async fn ping(&self) -> Result<()>;
}
