use crate::application::scheduler::Scheduler;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Ordered teardown: stop firing new jobs, let in-flight cycles finish, then stop reporting.
pub struct ShutdownService {
    scheduler: Arc<Scheduler>,
    reporter_shutdown: watch::Sender<bool>,
}

impl ShutdownService {
    pub fn new(scheduler: Arc<Scheduler>, reporter_shutdown: watch::Sender<bool>) -> Self {
        Self {
            scheduler,
            reporter_shutdown,
        }
    }

    pub async fn shutdown(&self) {
        info!("Initiating Graceful Shutdown Sequence...");

        info!("Step 1: Stopping scheduler and waiting for in-flight jobs...");
        self.scheduler.stop().await;

        info!("Step 2: Stopping status reporter...");
        if self.reporter_shutdown.send(true).is_err() {
            warn!("ShutdownService: status reporter was not running");
        }

        info!("Graceful Shutdown Complete.");
    }
}
