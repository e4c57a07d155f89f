use crate::application::ingestion::{IngestionOrchestrator, IngestionStats};
use crate::application::routing::SourceRouter;
use crate::application::scheduler::{ScheduleInfo, Scheduler};
use crate::domain::ports::{CacheStats, PriceCache};
use crate::domain::rate_budget::BudgetUsage;
use crate::domain::repositories::{PriceStore, StoreStats};
use crate::infrastructure::observability::{Metrics, SnapshotSource};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn to_metric_value(&self) -> f64 {
        match self {
            HealthStatus::Healthy => 1.0,
            HealthStatus::Degraded => 0.5,
            HealthStatus::Unhealthy => 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceHealth {
    pub healthy: bool,
    pub checked_at: DateTime<Utc>,
}

/// Body of the health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub timestamp: DateTime<Utc>,
    pub store: String,
    pub cache: String,
    pub scheduler_running: bool,
    pub sources: BTreeMap<String, SourceHealth>,
}

/// Body of the status endpoint
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub timestamp: DateTime<Utc>,
    pub health: HealthStatus,
    pub tracked_symbols: Vec<String>,
    pub ingestion: IngestionStats,
    pub schedule: ScheduleInfo,
    pub cache: CacheStats,
    pub store: Option<StoreStats>,
    pub rate_budgets: BTreeMap<String, BudgetUsage>,
}

/// Aggregates component health and runtime statistics into read-only reports.
pub struct ServiceMonitor {
    orchestrator: Arc<IngestionOrchestrator>,
    router: Arc<SourceRouter>,
    scheduler: Arc<Scheduler>,
    store: Arc<dyn PriceStore>,
    cache: Arc<dyn PriceCache>,
    metrics: Metrics,
    sources: RwLock<BTreeMap<String, SourceHealth>>,
}

impl ServiceMonitor {
    pub fn new(
        orchestrator: Arc<IngestionOrchestrator>,
        router: Arc<SourceRouter>,
        scheduler: Arc<Scheduler>,
        store: Arc<dyn PriceStore>,
        cache: Arc<dyn PriceCache>,
        metrics: Metrics,
    ) -> Self {
        Self {
            orchestrator,
            router,
            scheduler,
            store,
            cache,
            metrics,
            sources: RwLock::new(BTreeMap::new()),
        }
    }

    /// Probes every configured source concurrently and remembers the results.
    pub async fn check_sources(&self) -> BTreeMap<String, SourceHealth> {
        let fetchers: Vec<_> = self.router.registry().all().cloned().collect();
        let results = futures::future::join_all(fetchers.iter().map(|f| async move {
            (f.kind().as_str().to_string(), f.health_check().await)
        }))
        .await;

        let checked_at = Utc::now();
        let mut sources = self.sources.write().await;
        for (source, healthy) in results {
            if healthy {
                info!("ServiceMonitor: {} is healthy", source);
            } else {
                warn!("ServiceMonitor: {} failed its health check", source);
            }
            sources.insert(source, SourceHealth { healthy, checked_at });
        }
        sources.clone()
    }

    pub async fn health(&self) -> HealthReport {
        let store = match self.store.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => {
                warn!("ServiceMonitor: store ping failed: {:#}", e);
                format!("error: {:#}", e)
            }
        };
        let cache = self.cache.stats().await.status;
        let sources = self.sources.read().await.clone();
        let scheduler_running = self.scheduler.is_running();

        let any_source_healthy = sources.values().any(|s| s.healthy);
        let all_sources_healthy = sources.values().all(|s| s.healthy);

        let status = if store != "ok" || self.router.registry().is_empty() {
            HealthStatus::Unhealthy
        } else if !sources.is_empty() && !any_source_healthy {
            HealthStatus::Unhealthy
        } else if !all_sources_healthy || !scheduler_running {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };
        self.metrics.service_status.set(status.to_metric_value());

        HealthReport {
            status,
            timestamp: Utc::now(),
            store,
            cache,
            scheduler_running,
            sources,
        }
    }

    pub async fn status(&self) -> StatusReport {
        let health = self.health().await.status;
        let store = match self.store.stats().await {
            Ok(stats) => Some(stats),
            Err(e) => {
                warn!("ServiceMonitor: failed to read store stats: {:#}", e);
                None
            }
        };

        StatusReport {
            timestamp: Utc::now(),
            health,
            tracked_symbols: self.orchestrator.tracked_symbols().await,
            ingestion: self.orchestrator.stats().await,
            schedule: self.scheduler.schedule_info().await,
            cache: self.cache.stats().await,
            store,
            rate_budgets: self.router.budget_usage(),
        }
    }

    /// Prometheus text exposition
    pub fn metrics_text(&self) -> String {
        self.metrics.render()
    }
}

#[async_trait]
impl SnapshotSource for ServiceMonitor {
    async fn snapshot(&self) -> anyhow::Result<serde_json::Value> {
        Ok(serde_json::to_value(self.status().await)?)
    }
}
