//! Historical backfill.
//!
//! Each symbol walks `Check -> (Sufficient | NeedsData) -> SelectSource -> FetchRange ->
//! Validate -> BulkStore -> Done` exactly once. States visited are kept on the report so a
//! run can be audited after the fact.

use super::write_path::PriceWriter;
use crate::application::routing::SourceRouter;
use crate::domain::errors::SourceError;
use crate::domain::market_hours::Clock;
use crate::domain::observation::PriceObservation;
use crate::domain::repositories::{CoverageAssessment, PriceStore};
use crate::domain::symbol::SymbolId;
use crate::infrastructure::observability::LatencyGuard;
use crate::infrastructure::observability::Metrics;
use rand::Rng;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_MIN_DAYS: u32 = 90;
pub const DEFAULT_MAX_DAYS: u32 = 90;
pub const DEFAULT_REFRESH_DAYS: u32 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackfillState {
    Check,
    Sufficient,
    NeedsData,
    SelectSource,
    FetchRange,
    Validate,
    BulkStore,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackfillDecision {
    pub symbol: String,
    pub needed: bool,
    pub reason: String,
    pub max_days: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct BackfillReport {
    pub symbol: String,
    pub decision: BackfillDecision,
    pub source: Option<String>,
    pub fetched: usize,
    pub valid: usize,
    pub dropped: usize,
    pub stored: usize,
    pub skipped: usize,
    pub states: Vec<BackfillState>,
    pub error: Option<String>,
}

impl BackfillReport {
    fn new(decision: BackfillDecision) -> Self {
        Self {
            symbol: decision.symbol.clone(),
            decision,
            source: None,
            fetched: 0,
            valid: 0,
            dropped: 0,
            stored: 0,
            skipped: 0,
            states: vec![BackfillState::Check],
            error: None,
        }
    }

    fn enter(&mut self, state: BackfillState) {
        self.states.push(state);
    }

    fn fail(mut self, error: impl ToString) -> Self {
        self.error = Some(error.to_string());
        self.enter(BackfillState::Done);
        self
    }

    /// A pass succeeds when nothing was needed or the range was stored without error.
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// Totals of a multi-symbol pass
#[derive(Debug, Clone, Default, Serialize)]
pub struct BackfillSummary {
    pub symbols: usize,
    pub needed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rows_stored: usize,
}

impl BackfillSummary {
    fn from_reports(reports: &[BackfillReport]) -> Self {
        Self {
            symbols: reports.len(),
            needed: reports.iter().filter(|r| r.decision.needed).count(),
            succeeded: reports.iter().filter(|r| r.succeeded()).count(),
            failed: reports.iter().filter(|r| !r.succeeded()).count(),
            rows_stored: reports.iter().map(|r| r.stored).sum(),
        }
    }
}

pub struct BackfillEngine {
    router: Arc<SourceRouter>,
    writer: Arc<PriceWriter>,
    store: Arc<dyn PriceStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    min_days: u32,
    max_days: u32,
    pacing: (Duration, Duration),
    refresh_pacing: Duration,
    warm_ttl: Duration,
}

impl BackfillEngine {
    pub fn new(
        router: Arc<SourceRouter>,
        writer: Arc<PriceWriter>,
        store: Arc<dyn PriceStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            router,
            writer,
            store,
            clock,
            metrics,
            min_days: DEFAULT_MIN_DAYS,
            max_days: DEFAULT_MAX_DAYS,
            pacing: (Duration::from_millis(1000), Duration::from_millis(2000)),
            refresh_pacing: Duration::from_secs(2),
            warm_ttl: Duration::from_secs(3600),
        }
    }

    pub fn with_limits(mut self, min_days: u32, max_days: u32) -> Self {
        self.min_days = min_days;
        self.max_days = max_days.max(1);
        self
    }

    /// Overrides the inter-symbol delays. Tests pass zero.
    pub fn with_pacing(mut self, min: Duration, max: Duration, refresh: Duration) -> Self {
        self.pacing = (min, max.max(min));
        self.refresh_pacing = refresh;
        self
    }

    /// Sufficiency check. A store failure is treated as missing data.
    pub async fn check(&self, symbol: &SymbolId) -> BackfillDecision {
        let (needed, reason) = match self.store.coverage(symbol.canonical()).await {
            Ok(coverage) => {
                let assessment = coverage.assess(self.min_days, self.clock.now());
                (
                    !matches!(assessment, CoverageAssessment::Sufficient),
                    assessment.reason(self.min_days),
                )
            }
            Err(e) => {
                warn!("BackfillEngine: coverage check failed for {}: {:#}", symbol, e);
                (true, format!("coverage check failed: {:#}", e))
            }
        };

        BackfillDecision {
            symbol: symbol.canonical().to_string(),
            needed,
            reason,
            max_days: self.max_days,
        }
    }

    /// Runs the full state machine for one symbol.
    pub async fn backfill_symbol(&self, symbol: &str) -> BackfillReport {
        let id = SymbolId::parse(symbol);
        let decision = self.check(&id).await;
        let mut report = BackfillReport::new(decision);

        if !report.decision.needed {
            debug!("BackfillEngine: {} {}", id, report.decision.reason);
            report.enter(BackfillState::Sufficient);
            report.enter(BackfillState::Done);
            return report;
        }

        info!(
            symbol = id.canonical(),
            "BackfillEngine: {} needs history ({})", id, report.decision.reason
        );
        report.enter(BackfillState::NeedsData);
        self.populate(&id, self.max_days, report).await
    }

    /// Bounded historical ingest that skips the sufficiency check.
    pub async fn refresh_symbol(&self, symbol: &str, days: u32) -> BackfillReport {
        let id = SymbolId::parse(symbol);
        let report = BackfillReport::new(BackfillDecision {
            symbol: id.canonical().to_string(),
            needed: true,
            reason: format!("scheduled refresh of last {} days", days),
            max_days: days,
        });
        self.populate(&id, days, report).await
    }

    async fn populate(&self, id: &SymbolId, days: u32, mut report: BackfillReport) -> BackfillReport {
        report.enter(BackfillState::SelectSource);
        let Some(fetcher) = self.router.select_historical(id) else {
            warn!("BackfillEngine: no historical source available for {}", id);
            return report.fail("no historical source available");
        };
        let kind = fetcher.kind();
        report.source = Some(kind.as_str().to_string());

        report.enter(BackfillState::FetchRange);
        let timeout = fetcher.timeouts().historical;
        let guard = LatencyGuard::new(
            self.metrics
                .fetch_latency_seconds
                .with_label_values(&[kind.as_str(), "historical"]),
        );
        let fetched = match tokio::time::timeout(timeout, fetcher.fetch_historical(id, days)).await
        {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout {
                provider: kind.as_str().to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        drop(guard);

        let observations = match fetched {
            Ok(observations) => {
                self.metrics.inc_source_request(kind.as_str(), "success");
                observations
            }
            Err(e) => {
                let outcome = if e.is_rate_limited() { "rate_limited" } else { "error" };
                self.metrics.inc_source_request(kind.as_str(), outcome);
                warn!(
                    symbol = id.canonical(),
                    source = kind.as_str(),
                    "BackfillEngine: {}",
                    e
                );
                return report.fail(e);
            }
        };
        report.fetched = observations.len();
        if observations.is_empty() {
            warn!("BackfillEngine: {} returned no history for {}", kind, id);
            return report.fail(format!("{} returned no history", kind));
        }

        report.enter(BackfillState::Validate);
        let now = self.clock.now();
        let valid: Vec<PriceObservation> = observations
            .into_iter()
            .filter(|o| match o.validate_at(now) {
                Ok(()) if o.symbol() == id.canonical() => true,
                Ok(()) => {
                    debug!(
                        "BackfillEngine: dropping {} row returned for {}",
                        o.symbol(),
                        id
                    );
                    false
                }
                Err(e) => {
                    debug!("BackfillEngine: dropping invalid row for {}: {}", id, e);
                    false
                }
            })
            .collect();
        report.valid = valid.len();
        report.dropped = report.fetched - report.valid;
        if report.dropped > 0 {
            self.metrics.add_backfill_rows("dropped", report.dropped);
        }
        if valid.is_empty() {
            let fetched = report.fetched;
            return report.fail(format!("all {} rows failed validation", fetched));
        }

        report.enter(BackfillState::BulkStore);
        match self
            .writer
            .persist_batch(id.canonical(), &valid, days, self.warm_ttl)
            .await
        {
            Ok(summary) => {
                report.stored = summary.stored;
                report.skipped = summary.skipped;
                info!(
                    symbol = id.canonical(),
                    source = kind.as_str(),
                    "BackfillEngine: stored {}/{} rows for {} ({} dropped)",
                    summary.stored,
                    report.fetched,
                    id,
                    report.dropped
                );
                report.enter(BackfillState::Done);
                report
            }
            Err(e) => report.fail(e),
        }
    }

    /// Startup pass over `symbols`. Never fails; per-symbol problems land on the reports.
    pub async fn run_startup(&self, symbols: &[String]) -> Vec<BackfillReport> {
        info!("BackfillEngine: startup check over {} symbols", symbols.len());
        let mut reports = Vec::with_capacity(symbols.len());

        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.jittered_pacing()).await;
            }
            let report = self.backfill_symbol(symbol).await;
            if let Some(error) = &report.error {
                warn!("BackfillEngine: backfill failed for {}: {}", symbol, error);
            }
            reports.push(report);
        }

        let summary = BackfillSummary::from_reports(&reports);
        info!(
            "BackfillEngine: startup complete ({} needed, {} failed, {} rows stored)",
            summary.needed, summary.failed, summary.rows_stored
        );
        reports
    }

    /// Daily refresh of the last `days` days for every symbol.
    pub async fn refresh_recent(&self, symbols: &[String], days: u32) -> BackfillSummary {
        let mut reports = Vec::with_capacity(symbols.len());
        for (i, symbol) in symbols.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.refresh_pacing).await;
            }
            let report = self.refresh_symbol(symbol, days).await;
            if let Some(error) = &report.error {
                warn!("BackfillEngine: refresh failed for {}: {}", symbol, error);
            }
            reports.push(report);
        }

        let summary = BackfillSummary::from_reports(&reports);
        info!(
            "BackfillEngine: refreshed {} days for {} symbols ({} rows, {} failed)",
            days, summary.symbols, summary.rows_stored, summary.failed
        );
        summary
    }

    fn jittered_pacing(&self) -> Duration {
        let (min, max) = self.pacing;
        if max <= min {
            return min;
        }
        let millis = rand::rng().random_range(min.as_millis() as u64..=max.as_millis() as u64);
        Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decision(needed: bool) -> BackfillDecision {
        BackfillDecision {
            symbol: "SPY".to_string(),
            needed,
            reason: "no data".to_string(),
            max_days: 90,
        }
    }

    #[test]
    fn test_report_fail_terminates() {
        let mut report = BackfillReport::new(decision(true));
        report.enter(BackfillState::NeedsData);
        let report = report.fail("boom");

        assert!(!report.succeeded());
        assert_eq!(report.states.first(), Some(&BackfillState::Check));
        assert_eq!(report.states.last(), Some(&BackfillState::Done));
    }

    #[test]
    fn test_summary_counts() {
        let mut ok = BackfillReport::new(decision(true));
        ok.stored = 90;
        let skipped = BackfillReport::new(decision(false));
        let failed = BackfillReport::new(decision(true)).fail("timeout");

        let summary = BackfillSummary::from_reports(&[ok, skipped, failed]);
        assert_eq!(summary.symbols, 3);
        assert_eq!(summary.needed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.rows_stored, 90);
    }
}
