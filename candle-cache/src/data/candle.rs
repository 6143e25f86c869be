//! OHLCV candle data structures

use crate::error::{Error, Result};
use chrono::{DateTime, Datelike, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// OHLCV candle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Opening price
    pub open: Decimal,
    /// High price
    pub high: Decimal,
    /// Low price
    pub low: Decimal,
    /// Closing price
    pub close: Decimal,
    /// Traded volume in lots
    pub volume: i64,
    /// Bar open time
    pub time: DateTime<Utc>,
    /// Whether the bar period has closed; `None` when unknown (e.g. read back from cache)
    pub complete: Option<bool>,
}

impl Candle {
    /// Create a new candle
    pub fn new(
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: i64,
        time: DateTime<Utc>,
        complete: Option<bool>,
    ) -> Self {
        Self {
            open,
            high,
            low,
            close,
            volume,
            time,
            complete,
        }
    }

    /// Same OHLCV values, regardless of time and completeness
    pub fn same_values(&self, other: &Candle) -> bool {
        self.open == other.open
            && self.high == other.high
            && self.low == other.low
            && self.close == other.close
            && self.volume == other.volume
    }

    /// The bar is known to be still in progress
    pub fn is_incomplete(&self) -> bool {
        self.complete == Some(false)
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self.time.weekday(), Weekday::Sat | Weekday::Sun)
    }
}

/// Time-ordered collection of candles.
///
/// Timestamps never decrease; every constructor except [`CandleSeries::new`] preserves that by
/// construction, `from_vec` checks it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CandleSeries {
    candles: Vec<Candle>,
}

impl CandleSeries {
    /// Create new empty series
    pub fn new() -> Self {
        Self {
            candles: Vec::new(),
        }
    }

    /// Create from vector of candles, rejecting out-of-order input
    pub fn from_vec(candles: Vec<Candle>) -> Result<Self> {
        check_ordering(&candles)?;
        Ok(Self { candles })
    }

    /// Append a candle that must not be earlier than the current last one
    pub fn push(&mut self, candle: Candle) -> Result<()> {
        if let Some(last) = self.candles.last() {
            if candle.time < last.time {
                return Err(Error::InconsistentOrdering {
                    previous: last.time,
                    next: candle.time,
                });
            }
        }
        self.candles.push(candle);
        Ok(())
    }

    /// Concatenate another series after this one
    pub fn extend(&mut self, other: CandleSeries) -> Result<()> {
        if let (Some(last), Some(first)) = (self.candles.last(), other.candles.first()) {
            if first.time < last.time {
                return Err(Error::InconsistentOrdering {
                    previous: last.time,
                    next: first.time,
                });
            }
        }
        self.candles.extend(other.candles);
        Ok(())
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn into_vec(self) -> Vec<Candle> {
        self.candles
    }

    /// Drop the first candle, used where a fetch overlaps the cached tail
    pub fn skip_first(mut self) -> Self {
        if !self.candles.is_empty() {
            self.candles.remove(0);
        }
        self
    }

    /// Drop the last candle, used where a fetch overlaps the cached head
    pub fn skip_last(mut self) -> Self {
        self.candles.pop();
        self
    }

    /// Candles with `from <= time <= to`
    pub fn within(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            candles: self
                .candles
                .iter()
                .filter(|c| c.time >= from && c.time <= to)
                .cloned()
                .collect(),
        }
    }

    /// Only candles whose period is known or assumed to have closed
    pub fn completed(&self) -> Self {
        Self {
            candles: self
                .candles
                .iter()
                .filter(|c| !c.is_incomplete())
                .cloned()
                .collect(),
        }
    }

    /// Drop a trailing in-progress candle
    pub fn trim_incomplete_tail(mut self) -> Self {
        if self.candles.last().is_some_and(Candle::is_incomplete) {
            self.candles.pop();
        }
        self
    }

    pub fn without_weekends(&self) -> Self {
        Self {
            candles: self
                .candles
                .iter()
                .filter(|c| !c.is_weekend())
                .cloned()
                .collect(),
        }
    }

    /// Collapse runs of adjacent candles with identical OHLCV into their latest member.
    ///
    /// The API repeats a bar with an advancing clock while trading is halted.
    pub fn dedup_repeats(&self) -> Self {
        let mut candles: Vec<Candle> = Vec::with_capacity(self.candles.len());
        for candle in &self.candles {
            match candles.last_mut() {
                Some(last) if last.same_values(candle) && last.time != candle.time => {
                    *last = candle.clone();
                }
                _ => candles.push(candle.clone()),
            }
        }
        Self { candles }
    }

    pub fn first_time(&self) -> Option<DateTime<Utc>> {
        self.candles.first().map(|c| c.time)
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.candles.last().map(|c| c.time)
    }
}

impl Deref for CandleSeries {
    type Target = [Candle];

    fn deref(&self) -> &Self::Target {
        &self.candles
    }
}

impl TryFrom<Vec<Candle>> for CandleSeries {
    type Error = Error;

    fn try_from(candles: Vec<Candle>) -> Result<Self> {
        Self::from_vec(candles)
    }
}

impl IntoIterator for CandleSeries {
    type Item = Candle;
    type IntoIter = std::vec::IntoIter<Candle>;

    fn into_iter(self) -> Self::IntoIter {
        self.candles.into_iter()
    }
}

/// Fail on the first adjacent pair whose timestamps go backwards
pub fn check_ordering(candles: &[Candle]) -> Result<()> {
    for pair in candles.windows(2) {
        if pair[1].time < pair[0].time {
            return Err(Error::InconsistentOrdering {
                previous: pair[0].time,
                next: pair[1].time,
            });
        }
    }
    Ok(())
}
