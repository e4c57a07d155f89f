use super::priority::PriorityTable;
use super::registry::SourceRegistry;
use crate::domain::errors::{IngestionError, SourceError};
use crate::domain::observation::PriceObservation;
use crate::domain::ports::{PriceFetcher, SourceKind};
use crate::domain::rate_budget::BudgetUsage;
use crate::domain::symbol::SymbolId;
use crate::infrastructure::observability::{LatencyGuard, Metrics};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A successful live fetch
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub observation: PriceObservation,
    pub source: SourceKind,
}

/// Picks providers for a symbol in priority order, honoring each provider's rate budget.
pub struct SourceRouter {
    registry: SourceRegistry,
    priorities: PriorityTable,
    metrics: Metrics,
}

impl SourceRouter {
    pub fn new(registry: SourceRegistry, priorities: PriorityTable, metrics: Metrics) -> Self {
        Self {
            registry,
            priorities,
            metrics,
        }
    }

    pub fn registry(&self) -> &SourceRegistry {
        &self.registry
    }

    pub fn priorities(&self) -> &PriorityTable {
        &self.priorities
    }

    fn configured(&self, order: &[SourceKind]) -> Vec<Arc<dyn PriceFetcher>> {
        order
            .iter()
            .filter_map(|kind| self.registry.get(*kind).cloned())
            .collect()
    }

    /// Configured live candidates, in priority order, whose budget currently admits.
    pub fn route(&self, symbol: &SymbolId) -> Vec<Arc<dyn PriceFetcher>> {
        self.configured(self.priorities.live(symbol.class()))
            .into_iter()
            .filter(|f| f.rate_budget().admit())
            .collect()
    }

    /// Same as [`route`](Self::route) over the historical table.
    pub fn route_historical(&self, symbol: &SymbolId) -> Vec<Arc<dyn PriceFetcher>> {
        self.configured(self.priorities.historical(symbol.class()))
            .into_iter()
            .filter(|f| f.rate_budget().admit())
            .collect()
    }

    /// First historical candidate that acquires a budget slot.
    pub fn select_historical(&self, symbol: &SymbolId) -> Option<Arc<dyn PriceFetcher>> {
        let selected = self
            .configured(self.priorities.historical(symbol.class()))
            .into_iter()
            .find(|f| f.rate_budget().try_acquire());

        match &selected {
            Some(f) => debug!("SourceRouter: {} selected for {} history", f.kind(), symbol),
            None => warn!("SourceRouter: no historical source admits {}", symbol),
        }
        selected
    }

    /// Walks the live candidates once, falling back on every failure.
    ///
    /// Each candidate is tried at most once and only if its budget grants a slot.
    pub async fn try_fetch(&self, symbol: &SymbolId) -> Result<FetchOutcome, IngestionError> {
        let candidates = self.configured(self.priorities.live(symbol.class()));
        let mut attempts = Vec::with_capacity(candidates.len());

        for fetcher in candidates {
            let kind = fetcher.kind();
            let source = kind.as_str();

            if !fetcher.rate_budget().try_acquire() {
                debug!("SourceRouter: {} rate budget exhausted, skipping for {}", source, symbol);
                self.metrics.inc_source_request(source, "rate_limited");
                attempts.push(format!("{}: rate budget exhausted", source));
                continue;
            }

            let timeout = fetcher.timeouts().live;
            let guard = LatencyGuard::new(
                self.metrics
                    .fetch_latency_seconds
                    .with_label_values(&[source, "live"]),
            );
            let result = match tokio::time::timeout(timeout, fetcher.fetch_current(symbol)).await {
                Ok(result) => result,
                Err(_) => Err(SourceError::Timeout {
                    provider: source.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                }),
            };
            let elapsed = guard.elapsed();
            drop(guard);

            match result {
                Ok(Some(observation)) => {
                    self.metrics.inc_source_request(source, "success");
                    info!(
                        symbol = symbol.canonical(),
                        source,
                        duration_ms = elapsed.as_millis() as u64,
                        "SourceRouter: fetched {} at {}",
                        symbol,
                        observation.close()
                    );
                    return Ok(FetchOutcome {
                        observation,
                        source: kind,
                    });
                }
                Ok(None) => {
                    self.metrics.inc_source_request(source, "not_found");
                    debug!("SourceRouter: {} has no data for {}", source, symbol);
                    attempts.push(format!("{}: no data", source));
                }
                Err(e) => {
                    let outcome = if e.is_rate_limited() { "rate_limited" } else { "error" };
                    self.metrics.inc_source_request(source, outcome);
                    warn!(symbol = symbol.canonical(), source, "SourceRouter: {}", e);
                    attempts.push(e.to_string());
                }
            }
        }

        Err(IngestionError::AllSourcesFailed {
            symbol: symbol.canonical().to_string(),
            attempts,
        })
    }

    pub fn budget_usage(&self) -> BTreeMap<String, BudgetUsage> {
        self.registry
            .all()
            .map(|f| (f.kind().as_str().to_string(), f.rate_budget().usage()))
            .collect()
    }
}
