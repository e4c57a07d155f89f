use super::backfill::BackfillEngine;
use super::orchestrator::{CycleScope, CycleStats, IngestionOrchestrator};
use crate::application::scheduler::ScheduledWork;
use crate::domain::ports::PriceCache;
use crate::domain::repositories::PriceStore;
use crate::domain::symbol::SymbolId;
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

/// Facade tying the live cycle, backfill and instrument registry together.
pub struct IngestionService {
    orchestrator: Arc<IngestionOrchestrator>,
    backfill: Arc<BackfillEngine>,
    store: Arc<dyn PriceStore>,
    cache: Arc<dyn PriceCache>,
    history_refresh_days: u32,
}

impl IngestionService {
    pub fn new(
        orchestrator: Arc<IngestionOrchestrator>,
        backfill: Arc<BackfillEngine>,
        store: Arc<dyn PriceStore>,
        cache: Arc<dyn PriceCache>,
        history_refresh_days: u32,
    ) -> Self {
        Self {
            orchestrator,
            backfill,
            store,
            cache,
            history_refresh_days,
        }
    }

    pub fn orchestrator(&self) -> &Arc<IngestionOrchestrator> {
        &self.orchestrator
    }

    pub fn backfill(&self) -> &Arc<BackfillEngine> {
        &self.backfill
    }

    /// Tracks the configured symbols plus every instrument persisted by earlier runs.
    /// Returns the resulting tracked list.
    pub async fn seed(&self, configured: &[String]) -> Result<Vec<String>> {
        let persisted = self
            .store
            .list_instruments()
            .await
            .context("Failed to load persisted instruments")?;

        for symbol in configured {
            let id = SymbolId::parse(symbol);
            if self.orchestrator.track(id.canonical()).await
                && let Err(e) = self.store.upsert_instrument(id.canonical(), id.class()).await
            {
                warn!("IngestionService: failed to persist instrument {}: {:#}", id, e);
            }
        }
        for instrument in persisted {
            self.orchestrator.track(&instrument.symbol).await;
        }

        let tracked = self.orchestrator.tracked_symbols().await;
        info!("IngestionService: tracking {} symbols: {}", tracked.len(), tracked.join(", "));
        Ok(tracked)
    }

    /// Tracks `symbol`, persists it and runs one backfill pass before returning.
    ///
    /// Returns false when the symbol is empty or the backfill pass failed. A failed pass
    /// leaves the symbol tracked; the next cycles and daily refreshes still cover it.
    pub async fn add_instrument(&self, symbol: &str) -> bool {
        let id = SymbolId::parse(symbol);
        if id.canonical().is_empty() {
            warn!("IngestionService: refusing to add an empty symbol");
            return false;
        }

        self.orchestrator.track(id.canonical()).await;
        if let Err(e) = self.store.upsert_instrument(id.canonical(), id.class()).await {
            warn!("IngestionService: failed to persist instrument {}: {:#}", id, e);
        }

        let report = self.backfill.backfill_symbol(id.canonical()).await;
        match &report.error {
            None => {
                info!(
                    "IngestionService: added {} ({} rows stored, {})",
                    id, report.stored, report.decision.reason
                );
                true
            }
            Some(error) => {
                warn!("IngestionService: backfill for new symbol {} failed: {}", id, error);
                false
            }
        }
    }

    /// Startup history pass over every tracked symbol.
    pub async fn startup_backfill(&self) -> usize {
        let symbols = self.orchestrator.tracked_symbols().await;
        let reports = self.backfill.run_startup(&symbols).await;
        reports.iter().map(|r| r.stored).sum()
    }
}

#[async_trait]
impl ScheduledWork for IngestionService {
    async fn run_cycle(&self, scope: CycleScope) -> Result<CycleStats> {
        Ok(self.orchestrator.run_cycle(scope).await)
    }

    async fn refresh_history(&self) -> Result<usize> {
        let symbols = self.orchestrator.tracked_symbols().await;
        let summary = self
            .backfill
            .refresh_recent(&symbols, self.history_refresh_days)
            .await;
        Ok(summary.rows_stored)
    }

    async fn run_maintenance(&self) -> Result<usize> {
        let pruned = self
            .cache
            .prune("historical:*")
            .await
            .context("Failed to prune historical cache entries")?;
        self.store
            .ping()
            .await
            .context("Store unreachable during maintenance")?;
        Ok(pruned)
    }
}
