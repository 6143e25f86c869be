//! On-disk candle storage
//!
//! One `;`-delimited text file per instrument and interval:
//!
//! ```text
//! open;high;low;close;volume;time
//! 185.32;186.1;184.9;185.77;102345;2024-02-19T07:00:00+00:00
//! ```
//!
//! Rows are ordered by time. Files only grow: new candles are appended at the tail, older history
//! is prepended by rewriting the file.

use crate::data::convert::{format_price, parse_price};
use crate::data::{Candle, CandleSeries, Interval};
use crate::error::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Column order of the cache file header
pub const COLUMNS: [&str; 6] = ["open", "high", "low", "close", "volume", "time"];
pub const DELIMITER: u8 = b';';

/// Result of comparing a requested window against the stored series
#[derive(Debug, Clone, PartialEq)]
pub enum SyncStatus {
    /// The store covers the window; carries the candles inside it
    Ok(CandleSeries),
    /// No file for this instrument and interval yet
    NotExists,
    /// The store ends too early. `gap_start` is the last stored candle's time,
    /// `partial` the stored candles inside the window.
    NeedAppend {
        gap_start: DateTime<Utc>,
        partial: CandleSeries,
    },
    /// The store starts too late. `gap_end` is the first stored candle's time.
    NeedInsert { gap_end: DateTime<Utc> },
}

impl SyncStatus {
    pub fn tag(&self) -> StatusTag {
        match self {
            SyncStatus::Ok(_) => StatusTag::Ok,
            SyncStatus::NotExists => StatusTag::NotExists,
            SyncStatus::NeedAppend { .. } => StatusTag::NeedAppend,
            SyncStatus::NeedInsert { .. } => StatusTag::NeedInsert,
        }
    }
}

/// Payload-free [`SyncStatus`] discriminant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusTag {
    Ok,
    NotExists,
    NeedAppend,
    NeedInsert,
}

impl fmt::Display for StatusTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StatusTag::Ok => "OK",
            StatusTag::NotExists => "NOT_EXISTS",
            StatusTag::NeedAppend => "NEED_APPEND",
            StatusTag::NeedInsert => "NEED_INSERT",
        };
        f.write_str(name)
    }
}

/// Candle file for one instrument and interval
#[derive(Debug, Clone)]
pub struct CandleStore {
    path: PathBuf,
    interval: Interval,
}

impl CandleStore {
    pub fn new(path: impl Into<PathBuf>, interval: Interval) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// Store for `instrument_uid` under the cache root
    pub fn open(root: &Path, instrument_uid: &str, interval: Interval) -> Self {
        Self::new(Self::path_for(root, instrument_uid, interval), interval)
    }

    /// `<root>/<interval dir>/<uid>.csv`
    pub fn path_for(root: &Path, instrument_uid: &str, interval: Interval) -> PathBuf {
        root.join(interval.dir_name())
            .join(format!("{instrument_uid}.csv"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Classify `[from, to]` against what the file holds.
    ///
    /// A missing or header-only file is `NotExists`. A store that is short at both ends reports
    /// `NeedInsert`; the caller discovers the tail gap on the next probe.
    pub fn probe(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<SyncStatus> {
        if !self.exists() {
            return Ok(SyncStatus::NotExists);
        }

        let series = self.read_all()?;
        let (Some(first), Some(last)) = (series.first_time(), series.last_time()) else {
            return Ok(SyncStatus::NotExists);
        };

        if self.starts_too_late(first, from) {
            return Ok(SyncStatus::NeedInsert { gap_end: first });
        }
        if self.ends_too_early(last, to) {
            return Ok(SyncStatus::NeedAppend {
                gap_start: last,
                partial: series.within(from, to),
            });
        }

        Ok(SyncStatus::Ok(series.within(from, to)))
    }

    fn starts_too_late(&self, first: DateTime<Utc>, from: DateTime<Utc>) -> bool {
        if first <= from {
            return false;
        }
        // a daily bar stamped later on the requested day still covers it
        !(self.interval.is_daily() && first.date_naive() == from.date_naive())
    }

    fn ends_too_early(&self, last: DateTime<Utc>, to: DateTime<Utc>) -> bool {
        if self.interval.is_daily() {
            last.date_naive() < to.date_naive()
        } else {
            to - last > self.interval.period()
        }
    }

    /// Write a header-only file, replacing anything already there
    pub fn initialize(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&self.path)?;
        writeln!(file, "{}", COLUMNS.join(";"))?;
        debug!(path = ?self.path, "initialized candle store");
        Ok(())
    }

    /// Append candles at the tail. Adjacent repeats are collapsed first.
    pub fn append(&self, series: &CandleSeries) -> Result<()> {
        if series.is_empty() {
            return Ok(());
        }
        let series = series.dedup_repeats();
        let file = OpenOptions::new().append(true).open(&self.path)?;
        write_rows(file, &series)?;
        debug!(path = ?self.path, count = series.len(), "appended candles");
        Ok(())
    }

    /// Put candles in front of the stored ones by rewriting the file.
    ///
    /// Every candle in `series` must be at or before the first stored candle.
    pub fn insert_at_head(&self, series: &CandleSeries) -> Result<()> {
        if series.is_empty() {
            return Ok(());
        }

        let existing = self.read_all()?;
        if let (Some(new_last), Some(old_first)) = (series.last_time(), existing.first_time()) {
            if new_last > old_first {
                return Err(Error::InconsistentOrdering {
                    previous: new_last,
                    next: old_first,
                });
            }
        }

        let content = fs::read_to_string(&self.path)?;
        let body = content.split_once('\n').map(|(_, body)| body).unwrap_or("");

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut file = File::create(&tmp)?;
            writeln!(file, "{}", COLUMNS.join(";"))?;
            write_rows(&mut file, &series.dedup_repeats())?;
            file.write_all(body.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = ?self.path, count = series.len(), "inserted candles at head");
        Ok(())
    }

    /// Read and validate the whole stored series
    pub fn read_all(&self) -> Result<CandleSeries> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(true)
            .trim(csv::Trim::All)
            .from_path(&self.path)
            .map_err(|e| self.csv_error(e))?;

        let headers = reader.headers().map_err(|e| self.csv_error(e))?.clone();
        let columns = ColumnMap::from_headers(&headers).ok_or_else(|| Error::CacheCorruption {
            path: self.path.clone(),
            line: 1,
            reason: format!("unexpected header {:?}", headers.iter().collect::<Vec<_>>()),
        })?;

        let mut candles = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|e| self.csv_error(e))?;
            let line = record.position().map(|p| p.line() as usize).unwrap_or(0);
            let candle = columns
                .parse(&record)
                .map_err(|reason| Error::CacheCorruption {
                    path: self.path.clone(),
                    line,
                    reason,
                })?;
            candles.push(candle);
        }

        CandleSeries::from_vec(candles)
    }

    fn csv_error(&self, err: csv::Error) -> Error {
        let line = err.position().map(|p| p.line() as usize).unwrap_or(0);
        let reason = err.to_string();
        match err.into_kind() {
            csv::ErrorKind::Io(io) => Error::Io(io),
            _ => Error::CacheCorruption {
                path: self.path.clone(),
                line,
                reason,
            },
        }
    }
}

fn write_rows<W: Write>(writer: W, series: &CandleSeries) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(DELIMITER)
        .has_headers(false)
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    for candle in series.iter() {
        writer
            .write_record([
                format_price(candle.open),
                format_price(candle.high),
                format_price(candle.low),
                format_price(candle.close),
                candle.volume.to_string(),
                candle.time.to_rfc3339(),
            ])
            .map_err(csv_write_error)?;
    }
    writer.flush()?;
    Ok(())
}

fn csv_write_error(err: csv::Error) -> Error {
    match err.into_kind() {
        csv::ErrorKind::Io(io) => Error::Io(io),
        other => Error::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            format!("{other:?}"),
        )),
    }
}

/// Positions of the expected columns in a file header
struct ColumnMap {
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    time: usize,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Option<Self> {
        let index = |name: &str| headers.iter().position(|h| h == name);
        Some(Self {
            open: index("open")?,
            high: index("high")?,
            low: index("low")?,
            close: index("close")?,
            volume: index("volume")?,
            time: index("time")?,
        })
    }

    fn parse(&self, record: &csv::StringRecord) -> std::result::Result<Candle, String> {
        let field = |i: usize, name: &str| {
            record
                .get(i)
                .ok_or_else(|| format!("missing column {name}"))
        };
        let price = |i: usize, name: &str| {
            let raw = field(i, name)?;
            parse_price(raw).ok_or_else(|| format!("bad {name} value {raw:?}"))
        };

        let volume_raw = field(self.volume, "volume")?;
        let volume = volume_raw
            .parse::<i64>()
            .map_err(|_| format!("bad volume value {volume_raw:?}"))?;
        let time_raw = field(self.time, "time")?;
        let time = parse_time(time_raw).ok_or_else(|| format!("bad time value {time_raw:?}"))?;

        Ok(Candle {
            open: price(self.open, "open")?,
            high: price(self.high, "high")?,
            low: price(self.low, "low")?,
            close: price(self.close, "close")?,
            volume,
            time,
            // only closed bars are ever written
            complete: Some(true),
        })
    }
}

/// Parse an RFC 3339 timestamp, also accepting a space between date and time
pub fn parse_time(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%:z"))
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f%:z"))
        .ok()
        .map(|t: DateTime<FixedOffset>| t.with_timezone(&Utc))
}
