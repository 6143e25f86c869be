//! Candle intervals

use crate::error::Error;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval supported by the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
    #[serde(rename = "1m")]
    Min1,
    #[serde(rename = "5m")]
    Min5,
    #[serde(rename = "15m")]
    Min15,
    #[serde(rename = "1h")]
    Hour1,
    #[serde(rename = "1d")]
    Day1,
}

impl Interval {
    pub const ALL: [Interval; 5] = [
        Interval::Min1,
        Interval::Min5,
        Interval::Min15,
        Interval::Hour1,
        Interval::Day1,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Min1 => "1m",
            Self::Min5 => "5m",
            Self::Min15 => "15m",
            Self::Hour1 => "1h",
            Self::Day1 => "1d",
        }
    }

    /// Length of one bar
    pub fn period(self) -> Duration {
        match self {
            Self::Min1 => Duration::minutes(1),
            Self::Min5 => Duration::minutes(5),
            Self::Min15 => Duration::minutes(15),
            Self::Hour1 => Duration::hours(1),
            Self::Day1 => Duration::days(1),
        }
    }

    /// Widest window the remote source serves in a single request
    pub fn chunk_window(self) -> Duration {
        match self {
            Self::Min1 | Self::Min5 | Self::Min15 => Duration::days(1),
            Self::Hour1 => Duration::days(7),
            Self::Day1 => Duration::days(365),
        }
    }

    pub fn is_daily(self) -> bool {
        matches!(self, Self::Day1)
    }

    /// Cache sub-directory holding this interval's files
    pub fn dir_name(self) -> &'static str {
        match self {
            Self::Min1 => "1min",
            Self::Min5 => "5min",
            Self::Min15 => "15min",
            Self::Hour1 => "1hour",
            Self::Day1 => "1day",
        }
    }

    /// Enum name used by the remote API
    pub fn api_name(self) -> &'static str {
        match self {
            Self::Min1 => "CANDLE_INTERVAL_1_MIN",
            Self::Min5 => "CANDLE_INTERVAL_5_MIN",
            Self::Min15 => "CANDLE_INTERVAL_15_MIN",
            Self::Hour1 => "CANDLE_INTERVAL_HOUR",
            Self::Day1 => "CANDLE_INTERVAL_DAY",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Interval {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1min" => Ok(Self::Min1),
            "5m" | "5min" => Ok(Self::Min5),
            "15m" | "15min" => Ok(Self::Min15),
            "1h" | "1hour" => Ok(Self::Hour1),
            "1d" | "1day" => Ok(Self::Day1),
            other => Err(Error::UnsupportedInterval(other.to_string())),
        }
    }
}
