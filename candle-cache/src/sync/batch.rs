//! Batch sync results

use crate::error::Error;

/// Instrument that failed during a batch
#[derive(Debug)]
pub struct BatchFailure {
    pub uid: String,
    pub error: Error,
}

/// Outcome of [`SyncEngine::sync_batch`](crate::sync::SyncEngine::sync_batch)
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Uid and candle count of every synced instrument
    pub synced: Vec<(String, usize)>,
    pub skipped: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn record_success(&mut self, uid: &str, candles: usize) {
        self.synced.push((uid.to_string(), candles));
    }

    pub fn record_failure(&mut self, uid: &str, error: Error) {
        self.failed.push(BatchFailure {
            uid: uid.to_string(),
            error,
        });
    }

    pub fn total_candles(&self) -> usize {
        self.synced.iter().map(|(_, n)| n).sum()
    }

    /// Failures that a rerun would hit again
    pub fn permanent_failures(&self) -> impl Iterator<Item = &BatchFailure> {
        self.failed.iter().filter(|f| f.error.is_permanent())
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}
