mod common;

use common::{Behavior, MockFetcher, harness, harness_at};
use priceflow::application::ingestion::{CycleScope, SymbolOutcome};
use priceflow::domain::errors::IngestionError;
use priceflow::domain::ports::SourceKind;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

fn equity_and_crypto() -> (Arc<MockFetcher>, Arc<MockFetcher>) {
    (
        Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(450.10))),
        Arc::new(MockFetcher::quoting(SourceKind::CoinGecko, dec!(64000))),
    )
}

#[tokio::test]
async fn test_cycle_stores_and_caches_every_symbol() {
    let (yahoo, coingecko) = equity_and_crypto();
    let h = harness(vec![yahoo, coingecko]).await;
    h.orchestrator.track("SPY").await;
    h.orchestrator.track("btc-usd").await;

    let stats = h.orchestrator.run_cycle(CycleScope::All).await;

    assert_eq!(stats.processed, 2);
    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.source_usage.get("yahoo"), Some(&1));
    assert_eq!(stats.source_usage.get("coingecko"), Some(&1));

    assert_eq!(h.store.count("SPY").await.unwrap(), 1);
    assert_eq!(h.store.count("BTC/USD").await.unwrap(), 1);
    assert_eq!(h.store.stats().await.unwrap().crypto_prices, 1);
    assert!(h.cache.get("BTC/USD").await.unwrap().is_some());
}

#[tokio::test]
async fn test_one_failing_symbol_does_not_abort_the_cycle() {
    let yahoo = Arc::new(
        MockFetcher::quoting(SourceKind::Yahoo, dec!(100)).failing_for("QQQ"),
    );
    let h = harness(vec![yahoo]).await;
    for symbol in ["SPY", "QQQ", "IWM"] {
        h.orchestrator.track(symbol).await;
    }

    let stats = h.orchestrator.run_cycle(CycleScope::Equity).await;

    assert_eq!(stats.succeeded, 2);
    assert_eq!(stats.failed, 1);
    assert!(stats.errors["QQQ"].contains("connection reset"));
    assert_eq!(h.store.count("QQQ").await.unwrap(), 0);
    assert_eq!(h.store.count("IWM").await.unwrap(), 1);
}

#[tokio::test]
async fn test_fresh_cache_entry_skips_the_fetch() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo.clone()]).await;
    h.orchestrator.track("SPY").await;

    let first = h.orchestrator.run_cycle(CycleScope::All).await;
    let second = h.orchestrator.run_cycle(CycleScope::All).await;

    assert_eq!(first.cache_hits, 0);
    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.succeeded, 1);
    assert_eq!(yahoo.calls(), 1);

    let totals = h.orchestrator.stats().await;
    assert_eq!(totals.cycles_run, 2);
    assert_eq!(totals.symbols_succeeded, 2);
    assert_eq!(totals.cache_hits, 1);
    assert_eq!(totals.source_usage.get("yahoo"), Some(&1));
}

#[tokio::test]
async fn test_stale_cache_entry_is_refetched() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo.clone()]).await;
    h.orchestrator.track("SPY").await;

    h.orchestrator.run_cycle(CycleScope::All).await;
    h.clock.advance(chrono::Duration::minutes(20));
    let stats = h.orchestrator.run_cycle(CycleScope::All).await;

    assert_eq!(stats.cache_hits, 0);
    assert_eq!(yahoo.calls(), 2);
}

#[tokio::test]
async fn test_scope_filters_symbols() {
    let (yahoo, coingecko) = equity_and_crypto();
    let h = harness(vec![yahoo.clone(), coingecko.clone()]).await;
    h.orchestrator.track("SPY").await;
    h.orchestrator.track("ETH/USD").await;

    let stats = h.orchestrator.run_cycle(CycleScope::Crypto).await;

    assert_eq!(stats.processed, 1);
    assert_eq!(coingecko.calls(), 1);
    assert_eq!(yahoo.calls(), 0);
}

#[tokio::test]
async fn test_concurrency_is_bounded() {
    let yahoo = Arc::new(
        MockFetcher::quoting(SourceKind::Yahoo, dec!(100)).with_delay(Duration::from_millis(50)),
    );
    let h = harness_at(vec![yahoo.clone()], chrono::Utc::now(), 2).await;
    for symbol in ["A1", "A2", "A3", "A4", "A5", "A6"] {
        h.orchestrator.track(symbol).await;
    }

    let stats = h.orchestrator.run_cycle(CycleScope::All).await;

    assert_eq!(stats.succeeded, 6);
    assert!(yahoo.max_in_flight() <= 2);
    assert!(yahoo.max_in_flight() >= 1);
}

#[tokio::test]
async fn test_ingest_single_symbol() {
    let yahoo = Arc::new(MockFetcher::new(SourceKind::Yahoo, Behavior::Quote(dec!(7))));
    let h = harness(vec![yahoo]).await;
    h.orchestrator.track("NVDA").await;

    let outcome = assert_ok!(h.orchestrator.ingest_symbol("nvda").await);
    assert_eq!(outcome, SymbolOutcome::Fetched(SourceKind::Yahoo));

    let err = assert_err!(h.orchestrator.ingest_symbol("TSLA").await);
    assert!(matches!(err, IngestionError::NotTracked { .. }));
}

#[tokio::test]
async fn test_add_instrument_tracks_persists_and_backfills() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo.clone()]).await;

    assert!(h.service.add_instrument("msft").await);

    assert_eq!(h.orchestrator.tracked_symbols().await, vec!["MSFT"]);
    assert_eq!(h.store.count("MSFT").await.unwrap(), 90);
    let instruments = h.store.list_instruments().await.unwrap();
    assert_eq!(instruments.len(), 1);
    assert_eq!(instruments[0].symbol, "MSFT");
    assert_eq!(yahoo.history_calls(), 1);
}

#[tokio::test]
async fn test_add_instrument_rejects_empty_and_reports_failed_backfill() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)).without_history());
    let h = harness(vec![yahoo]).await;

    assert!(!h.service.add_instrument("   ").await);
    assert!(!h.service.add_instrument("AMD").await);

    // Still tracked so live cycles cover it
    assert_eq!(h.orchestrator.tracked_symbols().await, vec!["AMD"]);
}

#[tokio::test]
async fn test_seed_merges_config_and_persisted_instruments() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo]).await;
    h.store
        .upsert_instrument("TSLA", priceflow::domain::symbol::SymbolClass::Equity)
        .await
        .unwrap();

    let tracked = h
        .service
        .seed(&["SPY".to_string(), "btc/usd".to_string()])
        .await
        .unwrap();

    assert_eq!(tracked, vec!["SPY", "BTC/USD", "TSLA"]);
    assert_eq!(h.store.list_instruments().await.unwrap().len(), 3);
}
