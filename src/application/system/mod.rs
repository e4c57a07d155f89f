use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

pub mod shutdown_service;

use crate::application::bootstrap::{
    persistence::{PersistenceBootstrap, PersistenceHandle},
    sources::SourcesBootstrap,
};
use crate::application::ingestion::{
    BackfillEngine, IngestionOrchestrator, IngestionService, PriceWriter,
};
use crate::application::monitoring::ServiceMonitor;
use crate::application::routing::SourceRouter;
use crate::application::scheduler::{Scheduler, SchedulerSettings};
use crate::application::system::shutdown_service::ShutdownService;
use crate::config::Config;
use crate::domain::market_hours::{Clock, SystemClock};
use crate::infrastructure::observability::{Metrics, MetricsReporter};

/// Handles returned by [`Application::start`]
pub struct SystemHandle {
    pub service: Arc<IngestionService>,
    pub scheduler: Arc<Scheduler>,
    pub monitor: Arc<ServiceMonitor>,
    pub metrics: Metrics,
    shutdown: ShutdownService,
}

impl SystemHandle {
    pub async fn shutdown(&self) {
        self.shutdown.shutdown().await;
    }

    /// Blocks until ctrl-c, then shuts down gracefully.
    pub async fn run_until_signal(&self) -> Result<()> {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for shutdown signal")?;
        info!("Shutdown signal received");
        self.shutdown().await;
        Ok(())
    }
}

pub struct Application {
    pub config: Config,
    pub persistence: PersistenceHandle,
    pub router: Arc<SourceRouter>,
    pub service: Arc<IngestionService>,
    pub scheduler: Arc<Scheduler>,
    pub monitor: Arc<ServiceMonitor>,
    pub metrics: Metrics,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let persistence = PersistenceBootstrap::init(&config).await?;
        Self::assemble(config, persistence, Arc::new(SystemClock)).await
    }

    /// Wires every component around an already opened store and cache.
    pub async fn assemble(
        config: Config,
        persistence: PersistenceHandle,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        info!(
            "Building priceflow Application (Env: {:?})...",
            config.environment
        );
        let metrics = Metrics::new()?;
        let sources = SourcesBootstrap::init(&config.sources)?;
        let router = Arc::new(SourceRouter::new(
            sources.registry,
            sources.priorities,
            metrics.clone(),
        ));
        Self::wire(config, persistence, router, clock, metrics)
    }

    /// Wiring shared by [`Application::assemble`] and callers that bring their own router.
    pub fn wire(
        config: Config,
        persistence: PersistenceHandle,
        router: Arc<SourceRouter>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Result<Self> {
        let ingestion = &config.ingestion;

        let writer = Arc::new(PriceWriter::new(
            persistence.store.clone(),
            persistence.cache.clone(),
            ingestion.cache_ttl,
            metrics.clone(),
        ));

        let orchestrator = Arc::new(
            IngestionOrchestrator::builder()
                .router(router.clone())
                .writer(writer.clone())
                .cache(persistence.cache.clone())
                .clock(clock.clone())
                .market_hours(ingestion.market_hours)
                .concurrency(ingestion.concurrency)
                .freshness(ingestion.cache_freshness)
                .metrics(metrics.clone())
                .build()?,
        );

        let backfill = Arc::new(
            BackfillEngine::new(
                router.clone(),
                writer,
                persistence.store.clone(),
                clock.clone(),
                metrics.clone(),
            )
            .with_limits(ingestion.backfill_min_days, ingestion.backfill_max_days),
        );

        let service = Arc::new(IngestionService::new(
            orchestrator.clone(),
            backfill,
            persistence.store.clone(),
            persistence.cache.clone(),
            ingestion.history_refresh_days,
        ));

        let scheduler = Arc::new(Scheduler::new(
            service.clone(),
            clock,
            SchedulerSettings {
                interval_minutes: ingestion.realtime_interval_minutes,
                daily_refresh_time: ingestion.daily_refresh_time,
                maintenance_time: ingestion.maintenance_time,
                market_hours: ingestion.market_hours,
                poll: ingestion.scheduler_poll,
            },
        ));

        let monitor = Arc::new(ServiceMonitor::new(
            orchestrator,
            router.clone(),
            scheduler.clone(),
            persistence.store.clone(),
            persistence.cache.clone(),
            metrics.clone(),
        ));

        Ok(Self {
            config,
            persistence,
            router,
            service,
            scheduler,
            monitor,
            metrics,
        })
    }

    /// Seeds the tracked set, backfills history, then starts the scheduler and reporter.
    pub async fn start(self) -> Result<SystemHandle> {
        self.service
            .seed(&self.config.ingestion.tracked_symbols)
            .await?;

        let sources = self.monitor.check_sources().await;
        let healthy = sources.values().filter(|s| s.healthy).count();
        if healthy == 0 {
            warn!("No price source passed its health check; continuing with fallback routing");
        } else {
            info!("{}/{} price sources healthy", healthy, sources.len());
        }

        let stored = self.service.startup_backfill().await;
        info!("Startup backfill stored {} rows", stored);

        self.scheduler.start().await;

        let (reporter_tx, reporter_rx) = watch::channel(false);
        if self.config.observability.enabled {
            let reporter = MetricsReporter::new(
                self.monitor.clone(),
                self.metrics.clone(),
                self.config.observability.interval_seconds,
            );
            tokio::spawn(reporter.run(reporter_rx));
        }

        let health = self.monitor.health().await;
        info!("Service started (health: {:?})", health.status);

        Ok(SystemHandle {
            service: self.service,
            scheduler: self.scheduler.clone(),
            monitor: self.monitor,
            metrics: self.metrics,
            shutdown: ShutdownService::new(self.scheduler, reporter_tx),
        })
    }

    /// Seeds the tracked set and runs one unscoped cycle without starting the scheduler.
    pub async fn run_once(&self) -> Result<crate::application::ingestion::CycleStats> {
        self.service
            .seed(&self.config.ingestion.tracked_symbols)
            .await?;
        let stats = tokio::time::timeout(
            Duration::from_secs(300),
            self.scheduler.trigger_manual_ingestion(),
        )
        .await
        .context("Ingestion cycle timed out")??;
        Ok(stats)
    }
}
