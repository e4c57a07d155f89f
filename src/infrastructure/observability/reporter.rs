//! Push-based status reporter
//!
//! Periodically writes a status snapshot as one JSON line on stdout, prefixed with
//! `STATUS_JSON:` so log shippers can filter it. Nothing listens for requests.

use crate::infrastructure::observability::metrics::Metrics;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Anything that can produce a serializable status snapshot
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn snapshot(&self) -> anyhow::Result<serde_json::Value>;
}

pub struct MetricsReporter {
    source: Arc<dyn SnapshotSource>,
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    pub fn new(source: Arc<dyn SnapshotSource>, metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            source,
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run until the shutdown channel flips to true
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "MetricsReporter: Starting push-based status output (interval: {:?})",
            self.interval
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.render_line().await {
                        Ok(line) => println!("{}", line),
                        Err(e) => warn!("MetricsReporter: Failed to collect snapshot: {}", e),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        debug!("MetricsReporter: shutdown received");
                        break;
                    }
                }
            }
        }
    }

    async fn render_line(&self) -> anyhow::Result<String> {
        self.metrics
            .uptime_seconds
            .set(self.start_time.elapsed().as_secs() as f64);
        let snapshot = self.source.snapshot().await?;
        Ok(format!("STATUS_JSON:{}", serde_json::to_string(&snapshot)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedSource;

    #[async_trait]
    impl SnapshotSource for FixedSource {
        async fn snapshot(&self) -> anyhow::Result<serde_json::Value> {
            Ok(serde_json::json!({ "status": "healthy", "tracked": 4 }))
        }
    }

    #[tokio::test]
    async fn test_status_line_is_prefixed_json() {
        let metrics = Metrics::new().unwrap();
        let reporter = MetricsReporter::new(Arc::new(FixedSource), metrics.clone(), 60);

        let line = reporter.render_line().await.unwrap();
        let json = line.strip_prefix("STATUS_JSON:").unwrap();
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["status"], "healthy");
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let reporter = MetricsReporter::new(Arc::new(FixedSource), Metrics::new().unwrap(), 60);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reporter.run(rx));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
