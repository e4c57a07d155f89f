use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

/// Sliding-window call admission for one upstream provider.
///
/// `admit` only inspects the window, `record` only appends to it, and
/// `try_acquire` does both under one lock. Denied callers are expected to move on to
/// another provider rather than wait.
#[derive(Debug)]
pub struct RateBudget {
    name: String,
    max_calls: u32,
    window_duration: Duration,
    recent_calls: Mutex<VecDeque<Instant>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BudgetUsage {
    pub used: u32,
    pub ceiling: u32,
}

impl RateBudget {
    pub fn new(name: impl Into<String>, calls_per_minute: u32) -> Self {
        Self::with_window(name, calls_per_minute, Duration::from_secs(60))
    }

    pub fn with_window(
        name: impl Into<String>,
        max_calls: u32,
        window_duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            max_calls,
            window_duration,
            recent_calls: Mutex::new(VecDeque::new()),
        }
    }

    pub fn ceiling(&self) -> u32 {
        self.max_calls
    }

    /// True iff fewer than `ceiling` calls happened in the trailing window.
    pub fn admit(&self) -> bool {
        self.with_window_locked(|calls, now| {
            Self::cleanup_old_timestamps(calls, now, self.window_duration);
            (calls.len() as u32) < self.max_calls
        })
    }

    /// Records a call at the current instant.
    pub fn record(&self) {
        self.with_window_locked(|calls, now| {
            Self::cleanup_old_timestamps(calls, now, self.window_duration);
            calls.push_back(now);
        })
    }

    /// Admits and records atomically. Returns false without recording when denied.
    pub fn try_acquire(&self) -> bool {
        let admitted = self.with_window_locked(|calls, now| {
            Self::cleanup_old_timestamps(calls, now, self.window_duration);
            if (calls.len() as u32) < self.max_calls {
                calls.push_back(now);
                true
            } else {
                false
            }
        });

        if !admitted {
            debug!(
                "RateBudget [{}]: denied ({} calls per {:?})",
                self.name, self.max_calls, self.window_duration
            );
        }
        admitted
    }

    pub fn usage(&self) -> BudgetUsage {
        let used = self.with_window_locked(|calls, now| {
            Self::cleanup_old_timestamps(calls, now, self.window_duration);
            calls.len() as u32
        });
        BudgetUsage {
            used,
            ceiling: self.max_calls,
        }
    }

    fn with_window_locked<T>(&self, f: impl FnOnce(&mut VecDeque<Instant>, Instant) -> T) -> T {
        let now = Instant::now();
        match self.recent_calls.lock() {
            Ok(mut guard) => f(&mut guard, now),
            Err(poisoned) => {
                tracing::error!("RateBudget [{}]: Lock poisoned, recovering", self.name);
                f(&mut poisoned.into_inner(), now)
            }
        }
    }

    fn cleanup_old_timestamps(calls: &mut VecDeque<Instant>, now: Instant, window: Duration) {
        while let Some(&timestamp) = calls.front() {
            if now.duration_since(timestamp) >= window {
                calls.pop_front();
            } else {
                break;
            }
        }
    }
}
