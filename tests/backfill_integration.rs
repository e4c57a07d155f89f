mod common;

use common::{Behavior, MockFetcher, harness};
use priceflow::application::ingestion::BackfillState;
use priceflow::domain::ports::SourceKind;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_empty_symbol_backfills_full_window() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo]).await;

    let report = h.backfill.backfill_symbol("SPY").await;

    assert!(report.decision.needed);
    assert_eq!(report.decision.max_days, 90);
    assert_eq!(report.decision.reason, "no data");
    assert_eq!(report.source.as_deref(), Some("yahoo"));
    assert_eq!(report.fetched, 90);
    assert_eq!(report.valid, 90);
    assert_eq!(report.stored, 90);
    assert!(report.succeeded());
    assert_eq!(
        report.states,
        vec![
            BackfillState::Check,
            BackfillState::NeedsData,
            BackfillState::SelectSource,
            BackfillState::FetchRange,
            BackfillState::Validate,
            BackfillState::BulkStore,
            BackfillState::Done,
        ]
    );
    assert_eq!(h.store.count("SPY").await.unwrap(), 90);
}

#[tokio::test]
async fn test_backfill_warms_latest_and_range_cache() {
    let coingecko = Arc::new(MockFetcher::quoting(SourceKind::CoinGecko, dec!(3000)));
    let h = harness(vec![coingecko]).await;

    h.backfill.backfill_symbol("ETH").await;

    let latest = h.cache.get("ETH/USD").await.unwrap().unwrap();
    assert_eq!(latest.timestamp(), common::midnight_days_ago(1));
    let range = h.cache.get_historical("ETH/USD", 90).await.unwrap().unwrap();
    assert_eq!(range.len(), 90);
}

#[tokio::test]
async fn test_backfill_never_replaces_fresher_cache_entry() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo]).await;
    h.orchestrator.track("SPY").await;
    h.orchestrator.run_cycle(priceflow::application::ingestion::CycleScope::All).await;
    let live = h.cache.get("SPY").await.unwrap().unwrap();

    h.backfill.backfill_symbol("SPY").await;

    let cached = h.cache.get("SPY").await.unwrap().unwrap();
    assert_eq!(cached.timestamp(), live.timestamp());
}

#[tokio::test]
async fn test_sufficient_coverage_skips_fetch() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo.clone()]).await;
    h.backfill.backfill_symbol("QQQ").await;

    let engine = priceflow::application::ingestion::BackfillEngine::new(
        h.router.clone(),
        Arc::new(priceflow::application::ingestion::PriceWriter::new(
            h.store.clone(),
            h.cache.clone(),
            std::time::Duration::from_secs(900),
            h.metrics.clone(),
        )),
        h.store.clone(),
        h.clock.clone(),
        h.metrics.clone(),
    )
    .with_limits(30, 90);
    let report = engine.backfill_symbol("QQQ").await;

    assert!(!report.decision.needed);
    assert_eq!(
        report.states,
        vec![BackfillState::Check, BackfillState::Sufficient, BackfillState::Done]
    );
    assert_eq!(yahoo.history_calls(), 1);
}

#[tokio::test]
async fn test_invalid_rows_are_dropped_and_counted() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)).with_stale_rows(3));
    let h = harness(vec![yahoo]).await;

    let report = h.backfill.backfill_symbol("IWM").await;

    assert_eq!(report.fetched, 93);
    assert_eq!(report.dropped, 3);
    assert_eq!(report.stored, 90);
}

#[tokio::test]
async fn test_all_invalid_history_fails_without_storing() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)).only_stale_rows(4));
    let h = harness(vec![yahoo]).await;

    let report = h.backfill.backfill_symbol("IWM").await;

    assert!(!report.succeeded());
    assert_eq!(report.error.as_deref(), Some("all 4 rows failed validation"));
    assert_eq!((report.fetched, report.valid, report.dropped), (4, 0, 4));
    assert_eq!(report.stored, 0);
    assert_eq!(report.states.last(), Some(&BackfillState::Done));
    assert!(report.states.contains(&BackfillState::Validate));
    assert!(!report.states.contains(&BackfillState::BulkStore));
    assert_eq!(h.store.count("IWM").await.unwrap(), 0);
    assert!(!h.service.add_instrument("IWM").await);
}

#[tokio::test]
async fn test_history_falls_to_next_admitting_source() {
    let alpha = Arc::new(
        MockFetcher::quoting(SourceKind::AlphaVantage, dec!(100)).with_budget(0),
    );
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![alpha.clone(), yahoo]).await;

    let report = h.backfill.backfill_symbol("DIA").await;

    assert_eq!(report.source.as_deref(), Some("yahoo"));
    assert_eq!(alpha.history_calls(), 0);
}

#[tokio::test]
async fn test_startup_continues_past_failures() {
    let coingecko = Arc::new(MockFetcher::new(SourceKind::CoinGecko, Behavior::Fail));
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![coingecko, yahoo]).await;

    let symbols = vec!["BTC/USD".to_string(), "SPY".to_string()];
    let reports = h.backfill.run_startup(&symbols).await;

    assert_eq!(reports.len(), 2);
    assert!(!reports[0].succeeded());
    assert!(reports[0].error.as_deref().unwrap_or_default().contains("rate limited"));
    assert!(reports[1].succeeded());
    assert_eq!(reports[1].stored, 90);
}

#[tokio::test]
async fn test_refresh_recent_skips_check() {
    let yahoo = Arc::new(MockFetcher::quoting(SourceKind::Yahoo, dec!(100)));
    let h = harness(vec![yahoo.clone()]).await;
    h.backfill.backfill_symbol("SPY").await;

    let summary = h
        .backfill
        .refresh_recent(&["SPY".to_string()], 30)
        .await;

    assert_eq!(summary.symbols, 1);
    assert_eq!(summary.failed, 0);
    assert_eq!(summary.rows_stored, 30);
    assert_eq!(yahoo.history_calls(), 2);
    assert_eq!(h.store.count("SPY").await.unwrap(), 90);
}
