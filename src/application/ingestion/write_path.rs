use crate::domain::errors::IngestionError;
use crate::domain::observation::PriceObservation;
use crate::domain::ports::PriceCache;
use crate::domain::repositories::{BulkInsertSummary, PriceStore};
use crate::domain::symbol::SymbolClass;
use crate::infrastructure::observability::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// The single write path shared by live ingestion and backfill.
///
/// Every confirmed store write is followed by invalidation of the symbol's cache keys
/// and a refresh of its latest-price key. The refreshed entry is never older than the
/// entry it replaces.
pub struct PriceWriter {
    store: Arc<dyn PriceStore>,
    cache: Arc<dyn PriceCache>,
    live_ttl: Duration,
    metrics: Metrics,
}

impl PriceWriter {
    pub fn new(
        store: Arc<dyn PriceStore>,
        cache: Arc<dyn PriceCache>,
        live_ttl: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            cache,
            live_ttl,
            metrics,
        }
    }

    fn partition(observation: &PriceObservation) -> &'static str {
        match observation.class() {
            SymbolClass::Equity => "daily",
            SymbolClass::Crypto => "crypto",
        }
    }

    fn store_error(&self, symbol: &str, partition: &str, e: anyhow::Error) -> IngestionError {
        self.metrics.inc_store_write(partition, "error");
        IngestionError::Store {
            symbol: symbol.to_string(),
            reason: format!("{:#}", e),
        }
    }

    /// Upserts one observation (plus its intraday bar when `intraday`) and refreshes the cache.
    pub async fn persist_live(
        &self,
        observation: &PriceObservation,
        intraday: bool,
    ) -> Result<(), IngestionError> {
        let symbol = observation.symbol();
        let partition = Self::partition(observation);

        self.store
            .upsert(observation)
            .await
            .map_err(|e| self.store_error(symbol, partition, e))?;
        self.metrics.inc_store_write(partition, "success");

        if intraday {
            self.store
                .upsert_intraday(observation)
                .await
                .map_err(|e| self.store_error(symbol, "intraday", e))?;
            self.metrics.inc_store_write("intraday", "success");
        }

        self.refresh_latest(symbol, observation, self.live_ttl).await;
        Ok(())
    }

    /// Bulk stores a validated range, then invalidates and warms the cache with the
    /// most recent stored record and the range itself.
    pub async fn persist_batch(
        &self,
        symbol: &str,
        observations: &[PriceObservation],
        days: u32,
        ttl: Duration,
    ) -> Result<BulkInsertSummary, IngestionError> {
        let summary = self
            .store
            .bulk_insert(symbol, observations)
            .await
            .map_err(|e| self.store_error(symbol, "bulk", e))?;
        self.metrics.add_backfill_rows("stored", summary.stored);
        self.metrics.add_backfill_rows("skipped", summary.skipped);

        if summary.stored == 0 {
            return Ok(summary);
        }

        if let Some(most_recent) = observations.iter().max_by_key(|o| o.timestamp()) {
            self.refresh_latest(symbol, most_recent, ttl).await;
        }
        if let Err(e) = self.cache.set_historical(symbol, days, observations, ttl).await {
            self.metrics.inc_cache_event("error");
            warn!("PriceWriter: failed to cache {} day range for {}: {}", days, symbol, e);
        }
        Ok(summary)
    }

    /// Invalidates every key of `symbol` and re-seeds its latest price with the newer of
    /// `candidate` and the cached entry. The cache performs both steps under one lock so a
    /// concurrent older write can never replace a newer one.
    async fn refresh_latest(&self, symbol: &str, candidate: &PriceObservation, ttl: Duration) {
        match self.cache.replace_latest(symbol, candidate, ttl).await {
            Ok(true) => {}
            Ok(false) => debug!("PriceWriter: keeping fresher cached entry for {}", symbol),
            Err(e) => {
                self.metrics.inc_cache_event("error");
                warn!("PriceWriter: cache refresh failed for {}: {}", symbol, e);
                if let Err(e) = self.cache.invalidate_symbol(symbol).await {
                    warn!("PriceWriter: cache invalidation failed for {}: {}", symbol, e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::errors::CacheError;
    use crate::domain::ports::CacheStats;
    use crate::infrastructure::cache::InMemoryPriceCache;
    use crate::infrastructure::persistence::{Database, SqlitePriceStore};
    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    async fn writer() -> (PriceWriter, Arc<dyn PriceStore>, Arc<dyn PriceCache>) {
        let db = Database::in_memory().await.unwrap();
        let store: Arc<dyn PriceStore> = Arc::new(SqlitePriceStore::new(db.pool));
        let cache: Arc<dyn PriceCache> = Arc::new(InMemoryPriceCache::new());
        let writer = PriceWriter::new(
            store.clone(),
            cache.clone(),
            Duration::from_secs(900),
            Metrics::new().unwrap(),
        );
        (writer, store, cache)
    }

    fn obs(symbol: &str, minutes_ago: i64) -> PriceObservation {
        PriceObservation::builder(
            symbol,
            dec!(100) + rust_decimal::Decimal::from(minutes_ago),
            Utc::now() - ChronoDuration::minutes(minutes_ago),
            "yahoo",
        )
        .build()
        .unwrap()
    }

    #[tokio::test]
    async fn test_live_write_refreshes_cache() {
        let (writer, store, cache) = writer().await;
        let o = obs("SPY", 1);

        writer.persist_live(&o, true).await.unwrap();

        assert_eq!(store.count("SPY").await.unwrap(), 1);
        assert_eq!(store.stats().await.unwrap().intraday_prices, 1);
        let cached = cache.get("SPY").await.unwrap().unwrap();
        assert!(cached.timestamp() >= o.timestamp());
    }

    #[tokio::test]
    async fn test_older_write_does_not_regress_cache() {
        let (writer, _store, cache) = writer().await;
        let fresh = obs("QQQ", 1);
        let stale = obs("QQQ", 60);

        writer.persist_live(&fresh, false).await.unwrap();
        writer.persist_live(&stale, false).await.unwrap();

        let cached = cache.get("QQQ").await.unwrap().unwrap();
        assert_eq!(cached.timestamp(), fresh.timestamp());
    }

    /// Delays the first latest-key refresh so a later write can overtake it.
    struct SlowFirstRefresh {
        inner: InMemoryPriceCache,
        delayed: AtomicBool,
    }

    #[async_trait]
    impl PriceCache for SlowFirstRefresh {
        async fn get(&self, symbol: &str) -> Result<Option<PriceObservation>, CacheError> {
            self.inner.get(symbol).await
        }

        async fn set(
            &self,
            symbol: &str,
            observation: &PriceObservation,
            ttl: Duration,
        ) -> Result<(), CacheError> {
            self.inner.set(symbol, observation, ttl).await
        }

        async fn get_historical(
            &self,
            symbol: &str,
            days: u32,
        ) -> Result<Option<Vec<PriceObservation>>, CacheError> {
            self.inner.get_historical(symbol, days).await
        }

        async fn set_historical(
            &self,
            symbol: &str,
            days: u32,
            observations: &[PriceObservation],
            ttl: Duration,
        ) -> Result<(), CacheError> {
            self.inner.set_historical(symbol, days, observations, ttl).await
        }

        async fn invalidate_symbol(&self, symbol: &str) -> Result<usize, CacheError> {
            self.inner.invalidate_symbol(symbol).await
        }

        async fn replace_latest(
            &self,
            symbol: &str,
            candidate: &PriceObservation,
            ttl: Duration,
        ) -> Result<bool, CacheError> {
            if !self.delayed.swap(true, Ordering::SeqCst) {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            self.inner.replace_latest(symbol, candidate, ttl).await
        }

        async fn prune(&self, pattern: &str) -> Result<usize, CacheError> {
            self.inner.prune(pattern).await
        }

        async fn stats(&self) -> CacheStats {
            self.inner.stats().await
        }
    }

    #[tokio::test]
    async fn test_concurrent_batch_never_regresses_live_entry() {
        let db = Database::in_memory().await.unwrap();
        let store: Arc<dyn PriceStore> = Arc::new(SqlitePriceStore::new(db.pool));
        let cache: Arc<dyn PriceCache> = Arc::new(SlowFirstRefresh {
            inner: InMemoryPriceCache::new(),
            delayed: AtomicBool::new(false),
        });
        let writer = Arc::new(PriceWriter::new(
            store,
            cache.clone(),
            Duration::from_secs(900),
            Metrics::new().unwrap(),
        ));

        let batch: Vec<_> = (1..=3).map(|d| obs("BTC/USD", d * 24 * 60)).collect();
        let batch_writer = writer.clone();
        let backfill = tokio::spawn(async move {
            batch_writer
                .persist_batch("BTC/USD", &batch, 90, Duration::from_secs(3600))
                .await
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        let live = obs("BTC/USD", 0);
        writer.persist_live(&live, false).await.unwrap();
        assert_eq!(backfill.await.unwrap().unwrap().stored, 3);

        let cached = cache.get("BTC/USD").await.unwrap().unwrap();
        assert!(cached.timestamp() >= live.timestamp());
    }

    #[tokio::test]
    async fn test_batch_warms_latest_and_range() {
        let (writer, _store, cache) = writer().await;
        let batch: Vec<_> = (1..=5).map(|d| obs("IWM", d * 24 * 60)).collect();

        let summary = writer
            .persist_batch("IWM", &batch, 90, Duration::from_secs(3600))
            .await
            .unwrap();

        assert_eq!(summary.stored, 5);
        let latest = cache.get("IWM").await.unwrap().unwrap();
        assert_eq!(latest.timestamp(), batch[0].timestamp());
        assert_eq!(cache.get_historical("IWM", 90).await.unwrap().unwrap().len(), 5);
    }
}
