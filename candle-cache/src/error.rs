//! Error types for the candle cache

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error for cache, sync and remote source operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("inconsistent ordering: candle at {next} follows candle at {previous}")]
    InconsistentOrdering {
        previous: DateTime<Utc>,
        next: DateTime<Utc>,
    },

    #[error("cache corruption in {path:?} at line {line}: {reason}")]
    CacheCorruption {
        path: PathBuf,
        line: usize,
        reason: String,
    },

    #[error("incorrect first candle: cache starts at {stored_first}, requested from {requested_from}")]
    IncorrectFirstCandle {
        stored_first: DateTime<Utc>,
        requested_from: DateTime<Utc>,
    },

    #[error("sync for {instrument} did not converge, status {status} repeated")]
    NotConverged { instrument: String, status: String },

    #[error("credential pool is empty")]
    NoCredentials,

    #[error("unsupported interval: {0}")]
    UnsupportedInterval(String),

    #[error("instrument not found: {0}")]
    InstrumentNotFound(String),

    #[error("API error: {0}")]
    Api(#[from] ApiError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Errors that retrying the same sync cannot fix.
    ///
    /// A batch driver records these for the instrument and moves on.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::InconsistentOrdering { .. }
                | Error::CacheCorruption { .. }
                | Error::IncorrectFirstCandle { .. }
                | Error::NotConverged { .. }
        )
    }
}

/// Errors reported by the remote market data API.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The credential hit its request quota for the current window.
    #[error("resource exhausted")]
    ResourceExhausted,

    /// Remote side hiccup, the same request can be repeated.
    #[error("service unavailable: {0}")]
    Unavailable(String),

    #[error("API status {code}: {message}")]
    Status { code: u16, message: String },

    #[error("decode error: {0}")]
    Decode(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::ResourceExhausted | ApiError::Unavailable(_))
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
