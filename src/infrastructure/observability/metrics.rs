//! Prometheus metrics definitions for priceflow
//!
//! All metrics use the `priceflow_` prefix.

use prometheus::{
    CounterVec, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge},
};
use std::sync::Arc;

/// Prometheus metrics for the ingestion service
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Ingestion cycles by scope
    pub cycles_total: CounterVec,
    /// Per-symbol cycle outcomes
    pub symbols_total: CounterVec,
    /// Upstream calls by source and outcome
    pub source_requests_total: CounterVec,
    /// Upstream call latency in seconds
    pub fetch_latency_seconds: HistogramVec,
    /// Store writes by partition and outcome
    pub store_writes_total: CounterVec,
    /// Cache hits, misses and errors
    pub cache_events_total: CounterVec,
    /// Rows stored by backfill
    pub backfill_rows_total: CounterVec,
    /// Size of the tracked symbol set
    pub tracked_symbols: GenericGauge<AtomicF64>,
    /// Unix timestamp of the last completed cycle
    pub last_cycle_timestamp: GenericGauge<AtomicF64>,
    /// Duration of the last completed cycle
    pub last_cycle_duration_seconds: GenericGauge<AtomicF64>,
    /// Uptime in seconds
    pub uptime_seconds: GenericGauge<AtomicF64>,
    /// 1 = healthy, 0.5 = degraded, 0 = unhealthy
    pub service_status: GenericGauge<AtomicF64>,
}

impl Metrics {
    /// Create a new Metrics instance with all gauges and counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let cycles_total = CounterVec::new(
            Opts::new("priceflow_cycles_total", "Ingestion cycles run by scope"),
            &["scope"],
        )?;
        registry.register(Box::new(cycles_total.clone()))?;

        let symbols_total = CounterVec::new(
            Opts::new(
                "priceflow_symbols_total",
                "Symbols processed by outcome (success, failed, cache_hit)",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(symbols_total.clone()))?;

        let source_requests_total = CounterVec::new(
            Opts::new(
                "priceflow_source_requests_total",
                "Upstream requests by source and outcome",
            ),
            &["source", "outcome"],
        )?;
        registry.register(Box::new(source_requests_total.clone()))?;

        let fetch_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "priceflow_fetch_latency_seconds",
                "Upstream request latency in seconds",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["source", "kind"],
        )?;
        registry.register(Box::new(fetch_latency_seconds.clone()))?;

        let store_writes_total = CounterVec::new(
            Opts::new("priceflow_store_writes_total", "Store writes by partition and outcome"),
            &["partition", "outcome"],
        )?;
        registry.register(Box::new(store_writes_total.clone()))?;

        let cache_events_total = CounterVec::new(
            Opts::new("priceflow_cache_events_total", "Cache lookups and failures"),
            &["event"],
        )?;
        registry.register(Box::new(cache_events_total.clone()))?;

        let backfill_rows_total = CounterVec::new(
            Opts::new("priceflow_backfill_rows_total", "Historical rows by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(backfill_rows_total.clone()))?;

        let tracked_symbols = Gauge::with_opts(Opts::new(
            "priceflow_tracked_symbols",
            "Number of tracked symbols",
        ))?;
        registry.register(Box::new(tracked_symbols.clone()))?;

        let last_cycle_timestamp = Gauge::with_opts(Opts::new(
            "priceflow_last_cycle_timestamp",
            "Unix timestamp of the last completed ingestion cycle",
        ))?;
        registry.register(Box::new(last_cycle_timestamp.clone()))?;

        let last_cycle_duration_seconds = Gauge::with_opts(Opts::new(
            "priceflow_last_cycle_duration_seconds",
            "Duration of the last ingestion cycle in seconds",
        ))?;
        registry.register(Box::new(last_cycle_duration_seconds.clone()))?;

        let uptime_seconds = Gauge::with_opts(Opts::new(
            "priceflow_uptime_seconds",
            "Service uptime in seconds",
        ))?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let service_status = Gauge::with_opts(Opts::new(
            "priceflow_service_status",
            "Service status (1=healthy, 0.5=degraded, 0=unhealthy)",
        ))?;
        registry.register(Box::new(service_status.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            cycles_total,
            symbols_total,
            source_requests_total,
            fetch_latency_seconds,
            store_writes_total,
            cache_events_total,
            backfill_rows_total,
            tracked_symbols,
            last_cycle_timestamp,
            last_cycle_duration_seconds,
            uptime_seconds,
            service_status,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn inc_cycle(&self, scope: &str) {
        self.cycles_total.with_label_values(&[scope]).inc();
    }

    pub fn inc_symbol(&self, outcome: &str) {
        self.symbols_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_source_request(&self, source: &str, outcome: &str) {
        self.source_requests_total
            .with_label_values(&[source, outcome])
            .inc();
    }

    pub fn inc_store_write(&self, partition: &str, outcome: &str) {
        self.store_writes_total
            .with_label_values(&[partition, outcome])
            .inc();
    }

    pub fn inc_cache_event(&self, event: &str) {
        self.cache_events_total.with_label_values(&[event]).inc();
    }

    pub fn add_backfill_rows(&self, outcome: &str, rows: usize) {
        self.backfill_rows_total
            .with_label_values(&[outcome])
            .inc_by(rows as f64);
    }

    pub fn record_cycle(&self, finished_at_secs: i64, duration_secs: f64) {
        self.last_cycle_timestamp.set(finished_at_secs as f64);
        self.last_cycle_duration_seconds.set(duration_secs);
    }
}
