#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use priceflow::application::ingestion::{
    BackfillEngine, IngestionOrchestrator, IngestionService, PriceWriter,
};
use priceflow::application::routing::{PriorityTable, SourceRegistry, SourceRouter};
use priceflow::domain::errors::SourceError;
use priceflow::domain::market_hours::ManualClock;
use priceflow::domain::observation::PriceObservation;
use priceflow::domain::ports::{FetchTimeouts, PriceCache, PriceFetcher, SourceKind};
use priceflow::domain::rate_budget::RateBudget;
use priceflow::domain::repositories::PriceStore;
use priceflow::domain::symbol::SymbolId;
use priceflow::infrastructure::cache::InMemoryPriceCache;
use priceflow::infrastructure::observability::Metrics;
use priceflow::infrastructure::persistence::{Database, SqlitePriceStore};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    Quote(Decimal),
    NotFound,
    Fail,
    Hang,
}

/// Scriptable fetcher counting every call it receives
pub struct MockFetcher {
    kind: SourceKind,
    budget: RateBudget,
    behavior: Behavior,
    failing_symbols: Vec<String>,
    history: bool,
    stale_rows: usize,
    fresh_rows: bool,
    delay: Duration,
    timeouts: FetchTimeouts,
    pub calls: AtomicUsize,
    pub history_calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockFetcher {
    pub fn new(kind: SourceKind, behavior: Behavior) -> Self {
        Self {
            kind,
            budget: RateBudget::new(kind.as_str(), 1_000),
            behavior,
            failing_symbols: Vec::new(),
            history: true,
            stale_rows: 0,
            fresh_rows: true,
            delay: Duration::ZERO,
            timeouts: kind.default_timeouts(),
            calls: AtomicUsize::new(0),
            history_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn quoting(kind: SourceKind, price: Decimal) -> Self {
        Self::new(kind, Behavior::Quote(price))
    }

    pub fn with_budget(mut self, calls_per_minute: u32) -> Self {
        self.budget = RateBudget::new(self.kind.as_str(), calls_per_minute);
        self
    }

    pub fn failing_for(mut self, symbol: &str) -> Self {
        self.failing_symbols.push(symbol.to_string());
        self
    }

    pub fn without_history(mut self) -> Self {
        self.history = false;
        self
    }

    /// Appends rows older than the accepted timestamp window to every history response.
    pub fn with_stale_rows(mut self, rows: usize) -> Self {
        self.stale_rows = rows;
        self
    }

    /// History responses carry nothing but `rows` out-of-window rows.
    pub fn only_stale_rows(mut self, rows: usize) -> Self {
        self.stale_rows = rows;
        self.fresh_rows = false;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_live_timeout(mut self, live: Duration) -> Self {
        self.timeouts.live = live;
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn history_calls(&self) -> usize {
        self.history_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn price(&self) -> Decimal {
        match self.behavior {
            Behavior::Quote(price) => price,
            _ => Decimal::ONE_HUNDRED,
        }
    }
}

pub fn midnight_days_ago(days: i64) -> DateTime<Utc> {
    Utc::now().date_naive().and_time(NaiveTime::MIN).and_utc() - ChronoDuration::days(days)
}

#[async_trait]
impl PriceFetcher for MockFetcher {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn rate_budget(&self) -> &RateBudget {
        &self.budget
    }

    fn timeouts(&self) -> FetchTimeouts {
        self.timeouts
    }

    async fn fetch_current(
        &self,
        symbol: &SymbolId,
    ) -> Result<Option<PriceObservation>, SourceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing_symbols.iter().any(|s| s == symbol.canonical()) {
            return Err(SourceError::request(self.kind.as_str(), "connection reset"));
        }

        match self.behavior {
            Behavior::Quote(price) => PriceObservation::builder(
                symbol.canonical(),
                price,
                Utc::now(),
                self.kind.as_str(),
            )
            .build()
            .map(Some)
            .map_err(|e| SourceError::payload(self.kind.as_str(), e)),
            Behavior::NotFound => Ok(None),
            Behavior::Fail => Err(SourceError::Status {
                provider: self.kind.as_str().to_string(),
                status: 503,
                body: "service unavailable".to_string(),
            }),
            Behavior::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(None)
            }
        }
    }

    async fn fetch_historical(
        &self,
        symbol: &SymbolId,
        max_days: u32,
    ) -> Result<Vec<PriceObservation>, SourceError> {
        self.history_calls.fetch_add(1, Ordering::SeqCst);
        if !self.history {
            return Ok(Vec::new());
        }
        if matches!(self.behavior, Behavior::Fail) {
            return Err(SourceError::rate_limited(self.kind.as_str(), "quota exceeded"));
        }

        let mut rows = Vec::new();
        for i in 0..self.stale_rows {
            let ts = Utc::now() - ChronoDuration::days(6 * 365 + i as i64);
            let row = PriceObservation::builder(symbol.canonical(), self.price(), ts, self.kind.as_str())
                .build_at(ts)
                .map_err(|e| SourceError::payload(self.kind.as_str(), e))?;
            rows.push(row);
        }
        let fresh_days = if self.fresh_rows { i64::from(max_days) } else { 0 };
        for days_ago in (1..=fresh_days).rev() {
            let row = PriceObservation::builder(
                symbol.canonical(),
                self.price() + Decimal::from(days_ago),
                midnight_days_ago(days_ago),
                self.kind.as_str(),
            )
            .build()
            .map_err(|e| SourceError::payload(self.kind.as_str(), e))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

pub struct Harness {
    pub store: Arc<dyn PriceStore>,
    pub cache: Arc<dyn PriceCache>,
    pub router: Arc<SourceRouter>,
    pub orchestrator: Arc<IngestionOrchestrator>,
    pub backfill: Arc<BackfillEngine>,
    pub service: Arc<IngestionService>,
    pub clock: Arc<ManualClock>,
    pub metrics: Metrics,
}

pub async fn harness(fetchers: Vec<Arc<MockFetcher>>) -> Harness {
    harness_at(fetchers, Utc::now(), 5).await
}

pub async fn harness_at(
    fetchers: Vec<Arc<MockFetcher>>,
    now: DateTime<Utc>,
    concurrency: usize,
) -> Harness {
    let db = Database::in_memory().await.unwrap();
    let store: Arc<dyn PriceStore> = Arc::new(SqlitePriceStore::new(db.pool));
    let cache: Arc<dyn PriceCache> = Arc::new(InMemoryPriceCache::new());
    let metrics = Metrics::new().unwrap();
    let clock = Arc::new(ManualClock::new(now));

    let registry = SourceRegistry::from_fetchers(
        fetchers
            .into_iter()
            .map(|f| f as Arc<dyn PriceFetcher>),
    );
    let router = Arc::new(SourceRouter::new(
        registry,
        PriorityTable::default(),
        metrics.clone(),
    ));
    let writer = Arc::new(PriceWriter::new(
        store.clone(),
        cache.clone(),
        Duration::from_secs(900),
        metrics.clone(),
    ));
    let orchestrator = Arc::new(
        IngestionOrchestrator::builder()
            .router(router.clone())
            .writer(writer.clone())
            .cache(cache.clone())
            .clock(clock.clone())
            .concurrency(concurrency)
            .freshness(Duration::from_secs(15 * 60))
            .metrics(metrics.clone())
            .build()
            .unwrap(),
    );
    let backfill = Arc::new(
        BackfillEngine::new(
            router.clone(),
            writer,
            store.clone(),
            clock.clone(),
            metrics.clone(),
        )
        .with_pacing(Duration::ZERO, Duration::ZERO, Duration::ZERO),
    );
    let service = Arc::new(IngestionService::new(
        orchestrator.clone(),
        backfill.clone(),
        store.clone(),
        cache.clone(),
        30,
    ));

    Harness {
        store,
        cache,
        router,
        orchestrator,
        backfill,
        service,
        clock,
        metrics,
    }
}
