//! Instrument metadata

use crate::data::Interval;
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tradable security as far as candle syncing cares
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    /// Stable instrument id, also the cache file name
    pub uid: String,
    pub figi: String,
    pub ticker: String,
    /// First available 1-minute candle
    pub first_1min_candle_date: Option<DateTime<Utc>>,
    /// First available daily candle
    pub first_1day_candle_date: Option<DateTime<Utc>>,
}

impl Instrument {
    pub fn new(uid: impl Into<String>, figi: impl Into<String>, ticker: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            figi: figi.into(),
            ticker: ticker.into(),
            first_1min_candle_date: None,
            first_1day_candle_date: None,
        }
    }

    pub fn with_first_candles(
        mut self,
        first_1min: Option<DateTime<Utc>>,
        first_1day: Option<DateTime<Utc>>,
    ) -> Self {
        self.first_1min_candle_date = first_1min.and_then(known_date);
        self.first_1day_candle_date = first_1day.and_then(known_date);
        self
    }

    /// Earliest tradable timestamp for `interval`
    pub fn first_candle(&self, interval: Interval) -> Option<DateTime<Utc>> {
        if interval.is_daily() {
            self.first_1day_candle_date
        } else {
            self.first_1min_candle_date
        }
    }
}

/// The API reports unknown first-candle dates as the Unix epoch.
fn known_date(date: DateTime<Utc>) -> Option<DateTime<Utc>> {
    (date.timestamp() != 0).then_some(date)
}

/// Lookup of instrument metadata
#[async_trait]
pub trait InstrumentDirectory: Send + Sync {
    async fn instrument_by_uid(&self, uid: &str) -> Result<Instrument>;
}
