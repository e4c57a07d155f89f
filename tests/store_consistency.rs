mod common;

use common::{MockFetcher, harness};
use priceflow::application::ingestion::CycleScope;
use priceflow::domain::observation::PriceObservation;
use priceflow::domain::ports::SourceKind;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_cache_matches_store_after_cycle() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(321.5)));
    let h = harness(vec![yahoo]).await;
    h.orchestrator.track("AAPL").await;

    h.orchestrator.run_cycle(CycleScope::All).await;

    let stored = h.store.latest("AAPL").await.unwrap().unwrap();
    let cached = h.cache.get("AAPL").await.unwrap().unwrap();
    assert!(cached.timestamp() >= stored.timestamp());
    assert_eq!(cached.close(), stored.close());
}

#[tokio::test]
async fn test_repeated_identical_upsert_is_idempotent() {
    let h = harness(vec![]).await;
    let ts = common::midnight_days_ago(2);
    let observation = PriceObservation::builder("SPY", dec!(500.25), ts, "yahoo")
        .high(Some(dec!(501)))
        .low(Some(dec!(499)))
        .build()
        .unwrap();

    h.store.upsert(&observation).await.unwrap();
    h.store.upsert(&observation).await.unwrap();

    assert_eq!(h.store.count("SPY").await.unwrap(), 1);
    let found = h.store.find("SPY", ts).await.unwrap().unwrap();
    assert_eq!(found.close(), dec!(500.25));
    assert_eq!(found.high(), Some(dec!(501)));
}

#[tokio::test]
async fn test_invalidated_cache_is_repopulated() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(10)));
    let h = harness(vec![yahoo]).await;
    h.orchestrator.track("F").await;

    h.orchestrator.run_cycle(CycleScope::All).await;
    h.cache.invalidate_symbol("F").await.unwrap();
    let stats = h.orchestrator.run_cycle(CycleScope::All).await;

    assert_eq!(stats.succeeded, 1);
    assert_eq!(stats.cache_hits, 0);
    assert!(h.cache.get("F").await.unwrap().is_some());
}
