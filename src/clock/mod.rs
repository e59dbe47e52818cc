//! Time source abstraction.
//!
//! Every wait in the reconciler is a bounded poll, so all sleeping and
//! deadline arithmetic goes through a [`Clock`]. Production code uses
//! [`SystemClock`]; tests inject a [`ManualClock`] whose sleeps advance
//! virtual time instantly.

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[async_trait]
pub trait Clock: Send + Sync {
    /// Monotonic instant used for deadlines and elapsed times.
    fn now(&self) -> Instant;

    /// Local calendar date, used as the default target date of a run.
    fn today(&self) -> NaiveDate;

    /// Suspend the caller for `duration`.
    async fn sleep(&self, duration: Duration);
}

/// Wall-clock time with real tokio sleeps.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn today(&self) -> NaiveDate {
        chrono::Local::now().date_naive()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Deterministic clock: `sleep` returns immediately after advancing virtual time.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    today: NaiveDate,
    elapsed: Mutex<Duration>,
    sleeps: Mutex<u32>,
}

impl ManualClock {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            origin: Instant::now(),
            today,
            elapsed: Mutex::new(Duration::ZERO),
            sleeps: Mutex::new(0),
        }
    }

    /// Move virtual time forward without counting a sleep.
    pub fn advance(&self, duration: Duration) {
        let mut elapsed = self.elapsed.lock().unwrap_or_else(|e| e.into_inner());
        *elapsed += duration;
    }

    /// Total virtual time elapsed since construction.
    pub fn elapsed(&self) -> Duration {
        *self.elapsed.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of `sleep` calls observed.
    pub fn sleep_count(&self) -> u32 {
        *self.sleeps.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.elapsed()
    }

    fn today(&self) -> NaiveDate {
        self.today
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
        let mut sleeps = self.sleeps.lock().unwrap_or_else(|e| e.into_inner());
        *sleeps += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_advances_on_sleep() {
        let date = NaiveDate::from_ymd_opt(2025, 8, 13).unwrap();
        let clock = ManualClock::new(date);
        let start = clock.now();

        clock.sleep(Duration::from_secs(2)).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(clock.now() - start, Duration::from_millis(2500));
        assert_eq!(clock.sleep_count(), 2);
        assert_eq!(clock.today(), date);
    }

    #[test]
    fn test_manual_clock_advance_does_not_count_sleep() {
        let clock = ManualClock::new(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        clock.advance(Duration::from_secs(10));
        assert_eq!(clock.elapsed(), Duration::from_secs(10));
        assert_eq!(clock.sleep_count(), 0);
    }
}
