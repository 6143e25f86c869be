//! Cache reconciliation
//!
//! [`SyncEngine::sync`] brings one instrument's cached series into agreement with a requested
//! window. It probes the store, fetches whatever is missing at the head or the tail, and probes
//! again until the store covers the window. A status seen on two consecutive probes means the
//! remote side disagrees with the cache, and the sync fails instead of looping.

use crate::clock::Clock;
use crate::data::{CandleSeries, CandleStore, Interval, StatusTag, SyncStatus};
use crate::error::{Error, Result};
use crate::exchange::RemoteCandleSource;
use crate::instrument::Instrument;
use crate::sync::batch::BatchReport;
use crate::sync::calendar::{end_of_day, start_of_day, DaySnap, Direction, TradingCalendar};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

type KeyLock = Arc<tokio::sync::Mutex<()>>;

/// Drives [`CandleStore`] and a [`RemoteCandleSource`] to agreement
pub struct SyncEngine {
    root: PathBuf,
    source: Arc<dyn RemoteCandleSource>,
    clock: Arc<dyn Clock>,
    calendar: TradingCalendar,
    locks: Mutex<HashMap<(String, Interval), KeyLock>>,
}

impl SyncEngine {
    /// Create new engine over the cache rooted at `root`
    pub fn new(
        root: impl Into<PathBuf>,
        source: Arc<dyn RemoteCandleSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let calendar = TradingCalendar::new(source.clone(), clock.clone());
        Self {
            root: root.into(),
            source,
            clock,
            calendar,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store(&self, instrument_uid: &str, interval: Interval) -> CandleStore {
        CandleStore::open(&self.root, instrument_uid, interval)
    }

    /// Candles of `instrument` in `[from, to]`, filling the cache from the remote source as needed
    pub async fn sync(
        &self,
        instrument: &Instrument,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<CandleSeries> {
        let Some((from, to)) = self.clamp_window(instrument, from, to, interval).await? else {
            debug!(instrument = %instrument.uid, %interval, "empty window after clamping");
            return Ok(CandleSeries::new());
        };

        let lock = self.key_lock(&instrument.uid, interval);
        let _guard = lock.lock().await;

        let uid = instrument.uid.as_str();
        let store = self.store(uid, interval);
        let mut previous: Option<StatusTag> = None;

        loop {
            let status = store.probe(from, to)?;
            let tag = status.tag();
            debug!(instrument = uid, %interval, %from, %to, status = %tag, "cache probed");

            if previous == Some(tag) {
                return Err(match status {
                    SyncStatus::NeedInsert { gap_end } => Error::IncorrectFirstCandle {
                        stored_first: gap_end,
                        requested_from: from,
                    },
                    _ => Error::NotConverged {
                        instrument: uid.to_string(),
                        status: tag.to_string(),
                    },
                });
            }
            previous = Some(tag);

            match status {
                SyncStatus::Ok(series) => return Ok(series),

                SyncStatus::NotExists => {
                    store.initialize()?;
                    let fetched = self.source.fetch(uid, from, to, interval).await?;
                    store.append(&fetched.completed())?;
                    info!(
                        instrument = uid,
                        %interval,
                        count = fetched.len(),
                        "cache created"
                    );
                    return Ok(fetched);
                }

                SyncStatus::NeedAppend { gap_start, partial } => {
                    let fetched = self
                        .source
                        .fetch(uid, gap_start, to, interval)
                        .await?
                        .skip_first();
                    store.append(&fetched.completed())?;
                    info!(
                        instrument = uid,
                        %interval,
                        %gap_start,
                        count = fetched.len(),
                        "cache tail filled"
                    );

                    let mut series = partial;
                    series.extend(fetched.within(from, to))?;
                    return Ok(series);
                }

                SyncStatus::NeedInsert { gap_end } => {
                    let fetched = self
                        .source
                        .fetch(uid, from, gap_end, interval)
                        .await?
                        .skip_last();
                    store.insert_at_head(&fetched.completed())?;
                    info!(
                        instrument = uid,
                        %interval,
                        %gap_end,
                        count = fetched.len(),
                        "cache head filled"
                    );
                }
            }
        }
    }

    /// Everything from the instrument's first candle up to now
    pub async fn sync_full_history(
        &self,
        instrument: &Instrument,
        interval: Interval,
    ) -> Result<CandleSeries> {
        let first = instrument.first_candle(interval).ok_or_else(|| {
            Error::UnsupportedInterval(format!(
                "{} has no first {} candle date",
                instrument.uid, interval
            ))
        })?;
        self.sync(instrument, first, self.clock.now(), interval).await
    }

    /// Full-history sync of many instruments; one failure never stops the rest
    pub async fn sync_batch(
        &self,
        instruments: &[Instrument],
        interval: Interval,
        skip: &HashSet<String>,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for instrument in instruments {
            if skip.contains(&instrument.uid) {
                debug!(instrument = %instrument.uid, "skipped by configuration");
                report.skipped.push(instrument.uid.clone());
                continue;
            }

            match self.sync_full_history(instrument, interval).await {
                Ok(series) => {
                    info!(
                        instrument = %instrument.uid,
                        ticker = %instrument.ticker,
                        candles = series.len(),
                        "instrument synced"
                    );
                    report.record_success(&instrument.uid, series.len());
                }
                Err(e) => {
                    warn!(
                        instrument = %instrument.uid,
                        ticker = %instrument.ticker,
                        permanent = e.is_permanent(),
                        "sync failed: {}",
                        e
                    );
                    report.record_failure(&instrument.uid, e);
                }
            }
        }

        report
    }

    /// Apply instrument and calendar bounds to the requested window; `None` when nothing is left
    async fn clamp_window(
        &self,
        instrument: &Instrument,
        mut from: DateTime<Utc>,
        mut to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let uid = instrument.uid.as_str();

        if interval.is_daily() {
            from = start_of_day(from);
        }

        let mut from_clamped = false;
        if let Some(first) = instrument.first_candle(interval) {
            if from < first {
                debug!(instrument = uid, %from, %first, "from raised to first candle");
                from = first;
                from_clamped = true;
            }
        }

        let now = self.clock.now();
        if to > now {
            debug!(instrument = uid, %to, %now, "to clamped to now");
            to = now;
        }

        if interval.is_daily() && from <= to {
            if !from_clamped {
                match self.calendar.snap(uid, from, Direction::Forward).await? {
                    DaySnap::Later(t) | DaySnap::Earlier(t) => {
                        debug!(instrument = uid, %from, trading_day = %t, "from snapped");
                        from = start_of_day(t);
                    }
                    DaySnap::Exact(_) | DaySnap::NotListed => {}
                }
            }
            if let DaySnap::Earlier(t) = self.calendar.snap(uid, to, Direction::Backward).await? {
                debug!(instrument = uid, %to, trading_day = %t, "to snapped");
                to = end_of_day(t).min(now);
            }
        }

        Ok((from <= to).then_some((from, to)))
    }

    fn key_lock(&self, instrument_uid: &str, interval: Interval) -> KeyLock {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry((instrument_uid.to_string(), interval))
            .or_default()
            .clone()
    }
}
