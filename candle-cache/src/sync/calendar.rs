//! Trading-day lookup
//!
//! Finds the nearest day with a daily candle around a candidate date. The search is bounded:
//! one window around the date, then a fixed number of windows stepping back in time.

use crate::clock::Clock;
use crate::data::{CandleSeries, Interval};
use crate::error::Result;
use crate::exchange::RemoteCandleSource;
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::sync::Arc;
use tracing::debug;

const HALF_WINDOW_DAYS: i64 = 15;
const WINDOW_DAYS: i64 = 2 * HALF_WINDOW_DAYS;

/// Windows stepped back before giving up on an instrument
pub const DEFAULT_MAX_WINDOWS: u32 = 12;

/// Which neighbour wins when the date itself has no candle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// Outcome of a calendar lookup; times are candle open times
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaySnap {
    Exact(DateTime<Utc>),
    Later(DateTime<Utc>),
    Earlier(DateTime<Utc>),
    /// No daily candle on or before the date within the search horizon
    NotListed,
}

pub struct TradingCalendar {
    source: Arc<dyn RemoteCandleSource>,
    clock: Arc<dyn Clock>,
    max_windows: u32,
}

impl TradingCalendar {
    pub fn new(source: Arc<dyn RemoteCandleSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            max_windows: DEFAULT_MAX_WINDOWS,
        }
    }

    pub fn with_max_windows(mut self, max_windows: u32) -> Self {
        self.max_windows = max_windows;
        self
    }

    /// Nearest trading day to `date` for `instrument_id`
    pub async fn snap(
        &self,
        instrument_id: &str,
        date: DateTime<Utc>,
        direction: Direction,
    ) -> Result<DaySnap> {
        let day = date.date_naive();
        let midnight = start_of_day(date);
        let from = midnight - Duration::days(HALF_WINDOW_DAYS);
        let to = (midnight + Duration::days(HALF_WINDOW_DAYS)).min(self.clock.now());

        let around = self.daily(instrument_id, from, to).await?;
        if let Some(candle) = around.iter().find(|c| c.time.date_naive() == day) {
            return Ok(DaySnap::Exact(candle.time));
        }

        let later = around
            .iter()
            .find(|c| c.time.date_naive() > day)
            .map(|c| DaySnap::Later(c.time));
        let earlier = around
            .iter()
            .rev()
            .find(|c| c.time.date_naive() < day)
            .map(|c| DaySnap::Earlier(c.time));
        let nearest = match direction {
            Direction::Forward => later.or(earlier),
            Direction::Backward => earlier.or(later),
        };
        if let Some(snap) = nearest {
            debug!(instrument = instrument_id, %date, ?snap, "snapped to trading day");
            return Ok(snap);
        }

        let mut window_end = from;
        for _ in 0..self.max_windows {
            let window_start = window_end - Duration::days(WINDOW_DAYS);
            let candles = self.daily(instrument_id, window_start, window_end).await?;
            if let Some(last) = candles.last() {
                debug!(instrument = instrument_id, %date, found = %last.time, "trading day found further back");
                return Ok(DaySnap::Earlier(last.time));
            }
            window_end = window_start;
        }

        debug!(instrument = instrument_id, %date, "no trading day within search horizon");
        Ok(DaySnap::NotListed)
    }

    async fn daily(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<CandleSeries> {
        if from > to {
            return Ok(CandleSeries::new());
        }
        self.source.fetch(instrument_id, from, to, Interval::Day1).await
    }
}

/// 00:00:00 UTC of `t`'s day
pub fn start_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    t.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Last second of `t`'s day
pub fn end_of_day(t: DateTime<Utc>) -> DateTime<Utc> {
    start_of_day(t) + Duration::days(1) - Duration::seconds(1)
}
