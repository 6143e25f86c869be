//! Wall-clock access
//!
//! Everything that depends on "now" or waits for time to pass goes through [`Clock`],
//! so tests can drive minute boundaries deterministically.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    async fn sleep(&self, duration: Duration);
}

/// Real time, backed by tokio's timer.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(duration) = duration.to_std() {
            tokio::time::sleep(duration).await;
        }
    }
}

/// Manually driven clock. `sleep` returns immediately after moving time forward.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += duration;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = instant;
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}

/// Time left until the next wall-clock minute starts.
pub fn until_next_minute(now: DateTime<Utc>) -> Duration {
    use chrono::Timelike;
    let elapsed = Duration::seconds(now.second() as i64)
        + Duration::nanoseconds(now.nanosecond().min(999_999_999) as i64);
    Duration::minutes(1) - elapsed
}

/// True once `now` is in a later wall-clock minute than `since`.
pub fn minute_passed(since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    use chrono::{DurationRound, Timelike};
    if now - since >= Duration::minutes(1) {
        return true;
    }
    match (
        since.duration_trunc(Duration::minutes(1)),
        now.duration_trunc(Duration::minutes(1)),
    ) {
        (Ok(a), Ok(b)) => b > a,
        _ => now.minute() != since.minute(),
    }
}
