//! Remote candle sources
//!
//! [`CandleApi`] is a single request for a single window with a single credential.
//! [`fetch_chunked`] walks a long range in windows the API accepts, and
//! [`RemoteCandleSource`] is what the sync engine talks to.

use crate::clock::Clock;
use crate::data::{Candle, CandleSeries, Interval};
use crate::error::{ApiError, Result};
use crate::exchange::credentials::Credential;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

/// One window of candles for one instrument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub instrument_id: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub interval: Interval,
}

impl FetchRequest {
    pub fn new(
        instrument_id: impl Into<String>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Self {
        Self {
            instrument_id: instrument_id.into(),
            from,
            to,
            interval,
        }
    }

    fn window(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        Self {
            instrument_id: self.instrument_id.clone(),
            from,
            to,
            interval: self.interval,
        }
    }
}

/// Raw market data API
#[async_trait]
pub trait CandleApi: Send + Sync {
    /// Candles of `request.interval` with open time in `[request.from, request.to]`.
    /// The window must not exceed [`Interval::chunk_window`].
    async fn get_candles(
        &self,
        credential: &Credential,
        request: &FetchRequest,
    ) -> std::result::Result<Vec<Candle>, ApiError>;
}

/// Source of remote candles used by the sync engine
#[async_trait]
pub trait RemoteCandleSource: Send + Sync {
    /// Ordered candles with open time in `[from, to]`; the last one may be incomplete.
    async fn fetch(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<CandleSeries>;
}

/// Result of walking a range with one credential
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    Complete(CandleSeries),
    /// The credential ran out of quota; `partial` holds what was gathered before that
    Exhausted {
        partial: CandleSeries,
        resume_from: DateTime<Utc>,
    },
}

/// Retry behaviour for [`fetch_chunked`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchConfig {
    /// Pause before repeating a window that failed as unavailable
    pub unavailable_delay: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            unavailable_delay: Duration::seconds(1),
        }
    }
}

/// Fetch `request` window by window with one credential.
///
/// Windows are `interval.chunk_window()` long. A candle equal in time to the previous window's
/// last candle is dropped, so window boundaries never duplicate. Unavailable windows are
/// repeated after `config.unavailable_delay`; quota exhaustion stops the walk and hands back the
/// partial result.
pub async fn fetch_chunked<A>(
    api: &A,
    credential: &Credential,
    request: &FetchRequest,
    clock: &dyn Clock,
    config: FetchConfig,
) -> Result<FetchOutcome>
where
    A: CandleApi + ?Sized,
{
    let mut candles: Vec<Candle> = Vec::new();
    if request.from > request.to {
        return Ok(FetchOutcome::Complete(CandleSeries::new()));
    }

    let step = request.interval.chunk_window();
    let mut from = request.from;
    loop {
        let to = (from + step).min(request.to);
        let window = request.window(from, to);

        match api.get_candles(credential, &window).await {
            Ok(mut batch) => {
                batch.retain(|c| c.time <= to);
                if let (Some(last), Some(first)) = (candles.last(), batch.first()) {
                    if first.time == last.time {
                        batch.remove(0);
                    }
                }
                debug!(
                    instrument = %request.instrument_id,
                    %from,
                    %to,
                    count = batch.len(),
                    "window fetched"
                );
                candles.extend(batch);
            }
            Err(ApiError::ResourceExhausted) => {
                let resume_from = candles.last().map(|c| c.time).unwrap_or(from);
                return Ok(FetchOutcome::Exhausted {
                    partial: CandleSeries::from_vec(candles)?,
                    resume_from,
                });
            }
            Err(ApiError::Unavailable(message)) => {
                warn!(
                    instrument = %request.instrument_id,
                    %from,
                    %to,
                    "service unavailable, retrying window: {}",
                    message
                );
                clock.sleep(config.unavailable_delay).await;
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        if to >= request.to {
            return Ok(FetchOutcome::Complete(CandleSeries::from_vec(candles)?));
        }
        from = to;
    }
}

/// Append `next` after `acc`, dropping its first candle when it repeats `acc`'s last one
pub(crate) fn splice(acc: &mut CandleSeries, next: CandleSeries) -> Result<()> {
    let overlaps = matches!(
        (acc.last_time(), next.first_time()),
        (Some(last), Some(first)) if last == first
    );
    if overlaps {
        acc.extend(next.skip_first())
    } else {
        acc.extend(next)
    }
}
