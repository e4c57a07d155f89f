use chrono::{DateTime, Datelike, NaiveTime, Utc, Weekday};
use serde::Serialize;

/// Equity trading window in UTC.
///
/// The gate is open on weekdays for `open <= t < close`. Holidays are not modelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MarketHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl MarketHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> Self {
        Self { open, close }
    }

    pub fn is_trading_day(&self, now: DateTime<Utc>) -> bool {
        !matches!(now.weekday(), Weekday::Sat | Weekday::Sun)
    }

    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        if !self.is_trading_day(now) {
            return false;
        }
        let t = now.time();
        t >= self.open && t < self.close
    }
}

impl Default for MarketHours {
    /// NASDAQ regular session expressed in UTC (14:30 to 21:00)
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(14, 30, 0).unwrap_or_default(),
            close: NaiveTime::from_hms_opt(21, 0, 0).unwrap_or_default(),
        }
    }
}

/// Source of the current instant, swappable in tests
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A manually driven clock
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::RwLock<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::RwLock::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        match self.now.write() {
            Ok(mut guard) => *guard = now,
            Err(poisoned) => *poisoned.into_inner() = now,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let next = self.now() + by;
        self.set(next);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.read() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}
