//! The ingestion cycle.
//!
//! One cycle walks the tracked symbols of a scope with at most `concurrency` symbols in
//! flight. Each symbol runs in its own task: a failure or panic marks that symbol failed
//! for the cycle and never touches the others.

use super::write_path::PriceWriter;
use crate::application::routing::SourceRouter;
use crate::domain::errors::IngestionError;
use crate::domain::market_hours::{Clock, MarketHours};
use crate::domain::ports::{PriceCache, SourceKind};
use crate::domain::symbol::{SymbolClass, SymbolId};
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CycleScope {
    All,
    Equity,
    Crypto,
}

impl CycleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleScope::All => "all",
            CycleScope::Equity => "equity",
            CycleScope::Crypto => "crypto",
        }
    }

    pub fn includes(&self, class: SymbolClass) -> bool {
        match self {
            CycleScope::All => true,
            CycleScope::Equity => class == SymbolClass::Equity,
            CycleScope::Crypto => class == SymbolClass::Crypto,
        }
    }
}

/// How one symbol's turn in a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolOutcome {
    Fetched(SourceKind),
    CacheHit,
}

#[derive(Debug, Clone, Serialize)]
pub struct CycleStats {
    pub cycle_id: Uuid,
    pub scope: CycleScope,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub processed: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub cache_hits: usize,
    pub source_usage: BTreeMap<String, u64>,
    pub errors: BTreeMap<String, String>,
}

/// Totals across every cycle since startup
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionStats {
    pub cycles_run: u64,
    pub symbols_processed: u64,
    pub symbols_succeeded: u64,
    pub symbols_failed: u64,
    pub cache_hits: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_duration_ms: Option<u64>,
    pub source_usage: BTreeMap<String, u64>,
}

impl IngestionStats {
    fn absorb(&mut self, cycle: &CycleStats) {
        self.cycles_run += 1;
        self.symbols_processed += cycle.processed as u64;
        self.symbols_succeeded += cycle.succeeded as u64;
        self.symbols_failed += cycle.failed as u64;
        self.cache_hits += cycle.cache_hits as u64;
        self.last_run = Some(cycle.started_at);
        self.last_duration_ms = Some(cycle.duration_ms);
        for (source, count) in &cycle.source_usage {
            *self.source_usage.entry(source.clone()).or_default() += count;
        }
    }
}

/// Canonical symbols being ingested. Grows, never shrinks; keeps insertion order.
#[derive(Debug, Default)]
pub struct TrackedSymbolSet {
    symbols: RwLock<Vec<String>>,
}

impl TrackedSymbolSet {
    /// Returns true when the symbol was not already tracked.
    pub async fn add(&self, symbol: &str) -> bool {
        let canonical = SymbolId::parse(symbol).canonical().to_string();
        if canonical.is_empty() {
            return false;
        }
        let mut symbols = self.symbols.write().await;
        if symbols.contains(&canonical) {
            return false;
        }
        symbols.push(canonical);
        true
    }

    pub async fn list(&self) -> Vec<String> {
        self.symbols.read().await.clone()
    }

    pub async fn contains(&self, symbol: &str) -> bool {
        let canonical = SymbolId::parse(symbol);
        self.symbols
            .read()
            .await
            .iter()
            .any(|s| s == canonical.canonical())
    }

    pub async fn len(&self) -> usize {
        self.symbols.read().await.len()
    }
}

pub struct IngestionOrchestrator {
    router: Arc<SourceRouter>,
    writer: Arc<PriceWriter>,
    cache: Arc<dyn PriceCache>,
    clock: Arc<dyn Clock>,
    market_hours: MarketHours,
    tracked: TrackedSymbolSet,
    concurrency: usize,
    freshness: chrono::Duration,
    metrics: Metrics,
    stats: RwLock<IngestionStats>,
}

impl IngestionOrchestrator {
    pub fn builder() -> IngestionOrchestratorBuilder {
        IngestionOrchestratorBuilder::default()
    }

    /// Adds a symbol to the tracked set. Returns true when it was new.
    pub async fn track(&self, symbol: &str) -> bool {
        let added = self.tracked.add(symbol).await;
        if added {
            info!("IngestionOrchestrator: now tracking {}", SymbolId::parse(symbol));
            self.metrics.tracked_symbols.set(self.tracked.len().await as f64);
        }
        added
    }

    pub async fn tracked_symbols(&self) -> Vec<String> {
        self.tracked.list().await
    }

    pub async fn stats(&self) -> IngestionStats {
        self.stats.read().await.clone()
    }

    /// Runs one cycle over every tracked symbol in `scope`.
    pub async fn run_cycle(self: &Arc<Self>, scope: CycleScope) -> CycleStats {
        let started_at = self.clock.now();
        let timer = Instant::now();
        let cycle_id = Uuid::new_v4();

        let symbols: Vec<String> = self
            .tracked
            .list()
            .await
            .into_iter()
            .filter(|s| scope.includes(SymbolId::parse(s).class()))
            .collect();

        debug!(
            %cycle_id,
            scope = scope.as_str(),
            "IngestionOrchestrator: starting cycle over {} symbols",
            symbols.len()
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency.max(1)));
        let handles: Vec<_> = symbols
            .iter()
            .map(|symbol| {
                let this = Arc::clone(self);
                let semaphore = Arc::clone(&semaphore);
                let symbol = symbol.clone();
                tokio::spawn(async move {
                    let _permit = semaphore.acquire_owned().await.ok();
                    this.process_symbol(&symbol).await
                })
            })
            .collect();

        let results = futures::future::join_all(handles).await;

        let mut stats = CycleStats {
            cycle_id,
            scope,
            started_at,
            duration_ms: 0,
            processed: symbols.len(),
            succeeded: 0,
            failed: 0,
            cache_hits: 0,
            source_usage: BTreeMap::new(),
            errors: BTreeMap::new(),
        };

        for (symbol, result) in symbols.iter().zip(results) {
            match result {
                Ok(Ok(SymbolOutcome::Fetched(source))) => {
                    stats.succeeded += 1;
                    *stats
                        .source_usage
                        .entry(source.as_str().to_string())
                        .or_default() += 1;
                    self.metrics.inc_symbol("success");
                }
                Ok(Ok(SymbolOutcome::CacheHit)) => {
                    stats.succeeded += 1;
                    stats.cache_hits += 1;
                    self.metrics.inc_symbol("cache_hit");
                }
                Ok(Err(e)) => {
                    stats.failed += 1;
                    warn!(symbol = symbol.as_str(), "IngestionOrchestrator: {}", e);
                    stats.errors.insert(symbol.clone(), e.to_string());
                    self.metrics.inc_symbol("failed");
                }
                Err(join_error) => {
                    stats.failed += 1;
                    error!(
                        symbol = symbol.as_str(),
                        "IngestionOrchestrator: symbol task aborted: {}", join_error
                    );
                    stats
                        .errors
                        .insert(symbol.clone(), format!("task aborted: {}", join_error));
                    self.metrics.inc_symbol("failed");
                }
            }
        }

        stats.duration_ms = timer.elapsed().as_millis() as u64;
        self.stats.write().await.absorb(&stats);
        self.metrics.inc_cycle(scope.as_str());
        self.metrics
            .record_cycle(Utc::now().timestamp(), timer.elapsed().as_secs_f64());

        info!(
            %cycle_id,
            scope = scope.as_str(),
            duration_ms = stats.duration_ms,
            "IngestionOrchestrator: cycle complete ({}/{} succeeded, {} cache hits)",
            stats.succeeded,
            stats.processed,
            stats.cache_hits
        );
        stats
    }

    /// Processes a single tracked symbol outside of a cycle.
    pub async fn ingest_symbol(&self, symbol: &str) -> Result<SymbolOutcome, IngestionError> {
        if !self.tracked.contains(symbol).await {
            return Err(IngestionError::NotTracked {
                symbol: symbol.to_string(),
            });
        }
        self.process_symbol(symbol).await
    }

    async fn process_symbol(&self, symbol: &str) -> Result<SymbolOutcome, IngestionError> {
        let id = SymbolId::parse(symbol);
        let now = self.clock.now();
        let intraday = !id.is_crypto() && self.market_hours.is_open(now);

        let cached = match self.cache.get(id.canonical()).await {
            Ok(cached) => cached,
            Err(e) => {
                self.metrics.inc_cache_event("error");
                warn!("IngestionOrchestrator: cache read failed for {}: {}", id, e);
                None
            }
        };

        if let Some(observation) = cached
            && observation.age_at(now) <= self.freshness
        {
            self.metrics.inc_cache_event("hit");
            debug!("IngestionOrchestrator: {} fresh in cache, re-affirming", id);
            self.writer.persist_live(&observation, intraday).await?;
            return Ok(SymbolOutcome::CacheHit);
        }
        self.metrics.inc_cache_event("miss");

        let outcome = self.router.try_fetch(&id).await?;
        self.writer
            .persist_live(&outcome.observation, intraday)
            .await?;
        Ok(SymbolOutcome::Fetched(outcome.source))
    }
}

#[derive(Default)]
pub struct IngestionOrchestratorBuilder {
    router: Option<Arc<SourceRouter>>,
    writer: Option<Arc<PriceWriter>>,
    cache: Option<Arc<dyn PriceCache>>,
    clock: Option<Arc<dyn Clock>>,
    market_hours: Option<MarketHours>,
    concurrency: Option<usize>,
    freshness: Option<std::time::Duration>,
    metrics: Option<Metrics>,
}

impl IngestionOrchestratorBuilder {
    pub fn router(mut self, router: Arc<SourceRouter>) -> Self {
        self.router = Some(router);
        self
    }

    pub fn writer(mut self, writer: Arc<PriceWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn PriceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn market_hours(mut self, market_hours: MarketHours) -> Self {
        self.market_hours = Some(market_hours);
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn freshness(mut self, freshness: std::time::Duration) -> Self {
        self.freshness = Some(freshness);
        self
    }

    pub fn metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> anyhow::Result<IngestionOrchestrator> {
        let router = self
            .router
            .ok_or_else(|| anyhow::anyhow!("router is required"))?;
        let writer = self
            .writer
            .ok_or_else(|| anyhow::anyhow!("writer is required"))?;
        let cache = self
            .cache
            .ok_or_else(|| anyhow::anyhow!("cache is required"))?;
        let metrics = match self.metrics {
            Some(metrics) => metrics,
            None => Metrics::new()?,
        };
        let freshness = self
            .freshness
            .unwrap_or(std::time::Duration::from_secs(15 * 60));

        Ok(IngestionOrchestrator {
            router,
            writer,
            cache,
            clock: self
                .clock
                .unwrap_or_else(|| Arc::new(crate::domain::market_hours::SystemClock)),
            market_hours: self.market_hours.unwrap_or_default(),
            tracked: TrackedSymbolSet::default(),
            concurrency: self.concurrency.unwrap_or(5).max(1),
            freshness: chrono::Duration::from_std(freshness)
                .unwrap_or_else(|_| chrono::Duration::minutes(15)),
            metrics,
            stats: RwLock::new(IngestionStats::default()),
        })
    }
}
