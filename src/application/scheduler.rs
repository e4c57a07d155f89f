//! Dual-cadence job scheduler.
//!
//! Equity ingestion only fires inside the market window; crypto ingestion fires around the
//! clock on the same cadence. Two daily jobs refresh recent history and prune the cache.
//! A single poll loop drives everything; `tick` can be called directly with any instant.

use crate::application::ingestion::{CycleScope, CycleStats};
use crate::domain::market_hours::{Clock, MarketHours};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// The work the scheduler triggers
#[async_trait]
pub trait ScheduledWork: Send + Sync {
    async fn run_cycle(&self, scope: CycleScope) -> Result<CycleStats>;

    /// Returns the number of rows stored.
    async fn refresh_history(&self) -> Result<usize>;

    /// Returns the number of pruned cache entries.
    async fn run_maintenance(&self) -> Result<usize>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    EquityIngestion,
    CryptoIngestion,
    HistoryRefresh,
    Maintenance,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::EquityIngestion => "equity_ingestion",
            JobKind::CryptoIngestion => "crypto_ingestion",
            JobKind::HistoryRefresh => "history_refresh",
            JobKind::Maintenance => "maintenance",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Schedule {
    Every { minutes: i64 },
    DailyAt { time: NaiveTime },
}

impl Schedule {
    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match *self {
            Schedule::Every { minutes } => now + ChronoDuration::minutes(minutes.max(1)),
            Schedule::DailyAt { time } => {
                let today = now.date_naive().and_time(time).and_utc();
                if today > now {
                    today
                } else {
                    today + ChronoDuration::days(1)
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub interval_minutes: u64,
    pub daily_refresh_time: NaiveTime,
    pub maintenance_time: NaiveTime,
    pub market_hours: MarketHours,
    pub poll: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            interval_minutes: 1,
            daily_refresh_time: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or_default(),
            maintenance_time: NaiveTime::from_hms_opt(2, 0, 0).unwrap_or_default(),
            market_hours: MarketHours::default(),
            poll: Duration::from_secs(30),
        }
    }
}

struct Job {
    kind: JobKind,
    schedule: Schedule,
    next_run: DateTime<Utc>,
    last_run: Option<DateTime<Utc>>,
    runs: u64,
    in_flight: Arc<AtomicBool>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobInfo {
    pub kind: JobKind,
    pub schedule: Schedule,
    pub next_run: DateTime<Utc>,
    pub last_run: Option<DateTime<Utc>>,
    pub runs: u64,
    pub in_flight: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleInfo {
    pub running: bool,
    pub market_open: bool,
    pub jobs: Vec<JobInfo>,
}

/// What one `tick` did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub fired: Vec<JobKind>,
    pub skipped_in_flight: Vec<JobKind>,
    pub gated: Vec<JobKind>,
}

pub struct Scheduler {
    work: Arc<dyn ScheduledWork>,
    clock: Arc<dyn Clock>,
    settings: SchedulerSettings,
    jobs: Mutex<Vec<Job>>,
    running: AtomicBool,
    wake: Notify,
    tasks: Mutex<JoinSet<()>>,
    poll_loop: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        work: Arc<dyn ScheduledWork>,
        clock: Arc<dyn Clock>,
        settings: SchedulerSettings,
    ) -> Self {
        let jobs = Self::build_jobs(&settings, clock.now());
        Self {
            work,
            clock,
            settings,
            jobs: Mutex::new(jobs),
            running: AtomicBool::new(false),
            wake: Notify::new(),
            tasks: Mutex::new(JoinSet::new()),
            poll_loop: Mutex::new(None),
        }
    }

    fn build_jobs(settings: &SchedulerSettings, now: DateTime<Utc>) -> Vec<Job> {
        let every = Schedule::Every {
            minutes: settings.interval_minutes as i64,
        };
        [
            (JobKind::EquityIngestion, every),
            (JobKind::CryptoIngestion, every),
            (
                JobKind::HistoryRefresh,
                Schedule::DailyAt {
                    time: settings.daily_refresh_time,
                },
            ),
            (
                JobKind::Maintenance,
                Schedule::DailyAt {
                    time: settings.maintenance_time,
                },
            ),
        ]
        .into_iter()
        .map(|(kind, schedule)| Job {
            kind,
            schedule,
            next_run: schedule.next_after(now),
            last_run: None,
            runs: 0,
            in_flight: Arc::new(AtomicBool::new(false)),
        })
        .collect()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Runs every job due at `now`. Jobs whose previous run is still going are skipped.
    pub async fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let mut tasks = self.tasks.lock().await;
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!("Scheduler: job task aborted: {}", e);
            }
        }

        let mut jobs = self.jobs.lock().await;
        for job in jobs.iter_mut().filter(|job| job.next_run <= now) {
            job.next_run = job.schedule.next_after(now);

            if job.kind == JobKind::EquityIngestion && !self.settings.market_hours.is_open(now) {
                debug!("Scheduler: market closed, equity ingestion gated");
                report.gated.push(job.kind);
                continue;
            }

            if job.in_flight.swap(true, Ordering::SeqCst) {
                warn!(
                    "Scheduler: {} still running, skipping this firing",
                    job.kind.as_str()
                );
                report.skipped_in_flight.push(job.kind);
                continue;
            }

            job.last_run = Some(now);
            job.runs += 1;
            report.fired.push(job.kind);

            let kind = job.kind;
            let work = Arc::clone(&self.work);
            let in_flight = Arc::clone(&job.in_flight);
            tasks.spawn(async move {
                Self::execute(kind, work.as_ref()).await;
                in_flight.store(false, Ordering::SeqCst);
            });
        }
        report
    }

    async fn execute(kind: JobKind, work: &dyn ScheduledWork) {
        debug!("Scheduler: running {}", kind.as_str());
        let result = match kind {
            JobKind::EquityIngestion => work.run_cycle(CycleScope::Equity).await.map(|_| ()),
            JobKind::CryptoIngestion => work.run_cycle(CycleScope::Crypto).await.map(|_| ()),
            JobKind::HistoryRefresh => work.refresh_history().await.map(|rows| {
                info!("Scheduler: history refresh stored {} rows", rows);
            }),
            JobKind::Maintenance => work.run_maintenance().await.map(|pruned| {
                info!("Scheduler: maintenance pruned {} cache entries", pruned);
            }),
        };
        if let Err(e) = result {
            error!("Scheduler: {} failed: {:#}", kind.as_str(), e);
        }
    }

    /// Transitions to RUNNING and spawns the poll loop. A second call is a no-op.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Scheduler: already running");
            return;
        }

        {
            let mut jobs = self.jobs.lock().await;
            if jobs.is_empty() {
                *jobs = Self::build_jobs(&self.settings, self.clock.now());
            }
        }

        info!(
            "Scheduler: started (every {} min, market {}-{} UTC, refresh {}, maintenance {})",
            self.settings.interval_minutes,
            self.settings.market_hours.open.format("%H:%M"),
            self.settings.market_hours.close.format("%H:%M"),
            self.settings.daily_refresh_time.format("%H:%M"),
            self.settings.maintenance_time.format("%H:%M")
        );

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let mut poll = time::interval(this.settings.poll);
            poll.set_missed_tick_behavior(MissedTickBehavior::Skip);

            while this.is_running() {
                tokio::select! {
                    _ = poll.tick() => {
                        if !this.is_running() {
                            break;
                        }
                        let report = this.tick(this.clock.now()).await;
                        if !report.fired.is_empty() {
                            debug!("Scheduler: fired {:?}", report.fired);
                        }
                    }
                    _ = this.wake.notified() => {}
                }
            }
            debug!("Scheduler: poll loop exited");
        });
        *self.poll_loop.lock().await = Some(handle);
    }

    /// Transitions to STOPPED. In-flight jobs are awaited, pending firings are dropped.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.wake.notify_one();
        self.jobs.lock().await.clear();

        if let Some(handle) = self.poll_loop.lock().await.take()
            && let Err(e) = handle.await
        {
            error!("Scheduler: poll loop ended abnormally: {}", e);
        }
        self.wait_idle().await;
        info!("Scheduler: stopped");
    }

    /// Waits for every spawned job to finish.
    pub async fn wait_idle(&self) {
        let mut tasks = std::mem::take(&mut *self.tasks.lock().await);
        while let Some(finished) = tasks.join_next().await {
            if let Err(e) = finished {
                error!("Scheduler: job task aborted: {}", e);
            }
        }
    }

    pub async fn schedule_info(&self) -> ScheduleInfo {
        let jobs = self.jobs.lock().await;
        ScheduleInfo {
            running: self.is_running(),
            market_open: self.settings.market_hours.is_open(self.clock.now()),
            jobs: jobs
                .iter()
                .map(|job| JobInfo {
                    kind: job.kind,
                    schedule: job.schedule,
                    next_run: job.next_run,
                    last_run: job.last_run,
                    runs: job.runs,
                    in_flight: job.in_flight.load(Ordering::SeqCst),
                })
                .collect(),
        }
    }

    /// Runs an unscoped cycle right away, outside the job table.
    pub async fn trigger_manual_ingestion(&self) -> Result<CycleStats> {
        info!("Scheduler: manual ingestion triggered");
        self.work.run_cycle(CycleScope::All).await
    }
}
