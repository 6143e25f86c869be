//! Integration tests for candle-cache

use async_trait::async_trait;
use candle_cache::prelude::*;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc, Weekday};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

fn at(day: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, day, hour, minute, 0).unwrap()
}

/// Helper function to create a test candle; `n` makes OHLCV unique
fn bar(time: DateTime<Utc>, n: i64) -> Candle {
    let price = Decimal::from(100 + n);
    Candle::new(price, price + Decimal::ONE, price - Decimal::ONE, price, 10 + n, time, Some(true))
}

/// `count` consecutive minute bars starting at `start`
fn minute_bars(start: DateTime<Utc>, count: i64) -> Vec<Candle> {
    (0..count)
        .map(|i| bar(start + Duration::minutes(i), i))
        .collect()
}

/// 811 one-minute bars inside [2024-02-19T07:00Z, 2024-02-22T07:00Z]:
/// 07:00-11:29 on the 19th, 20th and 21st, plus one bar at 06:59 on the 22nd
fn scenario_811() -> Vec<Candle> {
    let mut candles = Vec::new();
    let mut n = 0;
    for day in 19..=21 {
        for minute in 0..270 {
            candles.push(bar(at(day, 7, 0) + Duration::minutes(minute), n));
            n += 1;
        }
    }
    candles.push(bar(at(22, 6, 59), n));
    candles
}

/// Remote market holding a fixed set of bars
struct FakeMarket {
    candles: Vec<Candle>,
    windows: Mutex<Vec<(DateTime<Utc>, DateTime<Utc>)>>,
}

impl FakeMarket {
    fn new(candles: Vec<Candle>) -> Arc<Self> {
        Arc::new(Self {
            candles,
            windows: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.windows.lock().unwrap().len()
    }

    fn answer(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<Candle> {
        self.candles
            .iter()
            .filter(|c| c.time >= from && c.time <= to)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RemoteCandleSource for FakeMarket {
    async fn fetch(
        &self,
        _instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _interval: Interval,
    ) -> Result<CandleSeries> {
        self.windows.lock().unwrap().push((from, to));
        CandleSeries::from_vec(self.answer(from, to))
    }
}

/// Raw API over a fixed set of bars, with scripted failures and an optional per-minute quota
struct FakeApi {
    market: Arc<FakeMarket>,
    clock: Arc<ManualClock>,
    quota: Option<usize>,
    failures: Mutex<VecDeque<ApiError>>,
    used: Mutex<HashMap<(String, i64), usize>>,
    attempts: Mutex<usize>,
    served: Mutex<Vec<String>>,
}

impl FakeApi {
    fn new(candles: Vec<Candle>, clock: Arc<ManualClock>) -> Self {
        Self {
            market: FakeMarket::new(candles),
            clock,
            quota: None,
            failures: Mutex::new(VecDeque::new()),
            used: Mutex::new(HashMap::new()),
            attempts: Mutex::new(0),
            served: Mutex::new(Vec::new()),
        }
    }

    fn served(&self) -> Vec<String> {
        self.served.lock().unwrap().clone()
    }
}

#[async_trait]
impl CandleApi for FakeApi {
    async fn get_candles(
        &self,
        credential: &Credential,
        request: &FetchRequest,
    ) -> std::result::Result<Vec<Candle>, ApiError> {
        *self.attempts.lock().unwrap() += 1;
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(quota) = self.quota {
            let minute = self.clock.now().timestamp() / 60;
            let mut used = self.used.lock().unwrap();
            let count = used
                .entry((credential.token().to_string(), minute))
                .or_default();
            if *count >= quota {
                return Err(ApiError::ResourceExhausted);
            }
            *count += 1;
        }
        self.served.lock().unwrap().push(credential.token().to_string());
        Ok(self.market.answer(request.from, request.to))
    }
}

struct Rig {
    _dir: TempDir,
    clock: Arc<ManualClock>,
    engine: SyncEngine,
}

fn rig(source: Arc<dyn RemoteCandleSource>, now: DateTime<Utc>) -> Rig {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::new(now));
    let engine = SyncEngine::new(dir.path(), source, clock.clone());
    Rig {
        _dir: dir,
        clock,
        engine,
    }
}

fn rotating(api: FakeApi, clock: Arc<ManualClock>) -> Arc<RotatingSource<FakeApi>> {
    let pool = Arc::new(CredentialPool::from_tokens(["t1", "t2"], clock.clone()).unwrap());
    Arc::new(RotatingSource::new(api, pool, clock))
}

fn instrument(uid: &str) -> Instrument {
    Instrument::new(uid, "BBG000000001", "ABCD")
}

fn data_rows(engine: &SyncEngine, uid: &str, interval: Interval) -> Vec<String> {
    let content = fs::read_to_string(engine.store(uid, interval).path()).unwrap();
    let mut lines = content.lines().map(str::to_string);
    assert_eq!(lines.next().as_deref(), Some("open;high;low;close;volume;time"));
    lines.collect()
}

fn assert_strictly_increasing(series: &CandleSeries) {
    assert!(series.windows(2).all(|w| w[0].time < w[1].time));
}

#[tokio::test]
async fn test_new_cache_811_minute_bars() {
    let clock = Arc::new(ManualClock::new(at(23, 12, 0)));
    let source = rotating(FakeApi::new(scenario_811(), clock.clone()), clock.clone());
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::new(dir.path(), source.clone(), clock);

    let series = engine
        .sync(&instrument("uid-811"), at(19, 7, 0), at(22, 7, 0), Interval::Min1)
        .await
        .unwrap();

    assert_eq!(series.len(), 811);
    assert_eq!(series.first_time(), Some(at(19, 7, 0)));
    assert_eq!(series.last_time(), Some(at(22, 6, 59)));
    assert_strictly_increasing(&series);

    assert!(engine.store("uid-811", Interval::Min1).exists());
    let rows = data_rows(&engine, "uid-811", Interval::Min1);
    assert_eq!(rows.len(), 811);
    assert!(rows[0].ends_with(";2024-02-19T07:00:00+00:00"));

    // one-day windows: the 07:00 boundary bars of the 20th and 21st come back twice
    assert_eq!(source.api().served().len(), 3);
}

#[tokio::test]
async fn test_second_sync_is_served_from_cache() {
    let clock = Arc::new(ManualClock::new(at(23, 12, 0)));
    let source = rotating(FakeApi::new(scenario_811(), clock.clone()), clock.clone());
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::new(dir.path(), source.clone(), clock);
    let uid = instrument("uid-811");

    let first = engine
        .sync(&uid, at(19, 7, 0), at(22, 7, 0), Interval::Min1)
        .await
        .unwrap();
    let calls = *source.api().attempts.lock().unwrap();

    let second = engine
        .sync(&uid, at(19, 7, 0), at(22, 7, 0), Interval::Min1)
        .await
        .unwrap();

    assert_eq!(*source.api().attempts.lock().unwrap(), calls);
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_exhaustion_resumes_without_loss_or_duplicates() {
    let clock = Arc::new(ManualClock::new(at(23, 12, 0)));
    let mut api = FakeApi::new(scenario_811(), clock.clone());
    api.quota = Some(1);
    let source = rotating(api, clock.clone());
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::new(dir.path(), source.clone(), clock.clone());

    let series = engine
        .sync(&instrument("uid-811"), at(19, 7, 0), at(22, 7, 0), Interval::Min1)
        .await
        .unwrap();

    let expected = CandleSeries::from_vec(scenario_811()).unwrap();
    assert_eq!(series, expected);
    assert_eq!(source.api().served(), vec!["t1", "t2", "t1"]);
    // both tokens were spent in the first minute
    assert_eq!(clock.now(), at(23, 12, 1));
}

#[tokio::test]
async fn test_unavailable_window_is_retried() {
    let clock = Arc::new(ManualClock::new(at(23, 12, 0)));
    let api = FakeApi::new(scenario_811(), clock.clone());
    api.failures
        .lock()
        .unwrap()
        .extend([ApiError::Unavailable("502".into()), ApiError::Unavailable("503".into())]);
    let source = rotating(api, clock.clone());
    let dir = TempDir::new().unwrap();
    let engine = SyncEngine::new(dir.path(), source.clone(), clock.clone());

    let series = engine
        .sync(&instrument("uid-811"), at(19, 7, 0), at(22, 7, 0), Interval::Min1)
        .await
        .unwrap();

    assert_eq!(series.len(), 811);
    assert_eq!(*source.api().attempts.lock().unwrap(), 5);
    assert_eq!(source.api().served(), vec!["t1", "t1", "t1"]);
    assert_eq!(clock.now(), at(23, 12, 0) + Duration::seconds(2));
}

#[tokio::test]
async fn test_append_fills_tail_gap() {
    let market = FakeMarket::new(minute_bars(at(19, 7, 0), 301));
    let rig = rig(market.clone(), at(23, 12, 0));
    let uid = instrument("uid-append");

    let head = rig
        .engine
        .sync(&uid, at(19, 7, 0), at(19, 8, 0), Interval::Min1)
        .await
        .unwrap();
    assert_eq!(head.len(), 61);

    let series = rig
        .engine
        .sync(&uid, at(19, 7, 0), at(19, 9, 0), Interval::Min1)
        .await
        .unwrap();

    assert_eq!(series.len(), 121);
    assert_eq!(series.first_time(), Some(at(19, 7, 0)));
    assert_eq!(series.last_time(), Some(at(19, 9, 0)));
    assert!(series.windows(2).all(|w| w[1].time - w[0].time == Duration::minutes(1)));
    assert_eq!(market.windows.lock().unwrap()[1], (at(19, 8, 0), at(19, 9, 0)));
    assert_eq!(data_rows(&rig.engine, "uid-append", Interval::Min1).len(), 121);

    rig.engine
        .sync(&uid, at(19, 7, 0), at(19, 9, 0), Interval::Min1)
        .await
        .unwrap();
    assert_eq!(market.calls(), 2);
}

#[tokio::test]
async fn test_insert_fills_head_gap() {
    let market = FakeMarket::new(minute_bars(at(19, 7, 0), 301));
    let rig = rig(market.clone(), at(23, 12, 0));
    let uid = instrument("uid-insert");

    rig.engine
        .sync(&uid, at(19, 8, 0), at(19, 9, 0), Interval::Min1)
        .await
        .unwrap();

    let series = rig
        .engine
        .sync(&uid, at(19, 7, 0), at(19, 9, 0), Interval::Min1)
        .await
        .unwrap();

    assert_eq!(series.len(), 121);
    assert_eq!(series.first_time(), Some(at(19, 7, 0)));
    assert_eq!(series.last_time(), Some(at(19, 9, 0)));
    assert_strictly_increasing(&series);
    assert_eq!(market.calls(), 2);

    let rows = data_rows(&rig.engine, "uid-insert", Interval::Min1);
    assert_eq!(rows.len(), 121);
    assert!(rows[0].ends_with(";2024-02-19T07:00:00+00:00"));
}

#[tokio::test]
async fn test_unreachable_history_trips_convergence_guard() {
    // the remote side has nothing before 08:00
    let market = FakeMarket::new(minute_bars(at(19, 8, 0), 61));
    let rig = rig(market.clone(), at(23, 12, 0));
    let uid = instrument("uid-guard");

    rig.engine
        .sync(&uid, at(19, 8, 0), at(19, 9, 0), Interval::Min1)
        .await
        .unwrap();
    assert_eq!(market.calls(), 1);

    let result = rig
        .engine
        .sync(&uid, at(19, 7, 0), at(19, 9, 0), Interval::Min1)
        .await;

    match result {
        Err(Error::IncorrectFirstCandle {
            stored_first,
            requested_from,
        }) => {
            assert_eq!(stored_first, at(19, 8, 0));
            assert_eq!(requested_from, at(19, 7, 0));
        }
        other => panic!("expected IncorrectFirstCandle, got {other:?}"),
    }
    // a single head fetch between the two NEED_INSERT probes
    assert_eq!(market.calls(), 2);
    assert_eq!(data_rows(&rig.engine, "uid-guard", Interval::Min1).len(), 61);
}

#[tokio::test]
async fn test_incomplete_bar_returned_but_not_persisted() {
    let mut candles = minute_bars(at(19, 7, 0), 121);
    if let Some(last) = candles.last_mut() {
        last.complete = Some(false);
    }
    let market = FakeMarket::new(candles);
    let rig = rig(market.clone(), at(19, 9, 0));
    let uid = instrument("uid-live");

    let series = rig
        .engine
        .sync(&uid, at(19, 7, 0), at(19, 9, 0), Interval::Min1)
        .await
        .unwrap();

    assert_eq!(series.len(), 121);
    assert!(series.last().is_some_and(Candle::is_incomplete));
    assert_eq!(data_rows(&rig.engine, "uid-live", Interval::Min1).len(), 120);
}

#[tokio::test]
async fn test_from_raised_to_first_candle() {
    let market = FakeMarket::new(minute_bars(at(19, 7, 0), 301));
    let rig = rig(market.clone(), at(23, 12, 0));
    let uid = instrument("uid-young").with_first_candles(Some(at(19, 7, 30)), None);

    let series = rig
        .engine
        .sync(&uid, at(19, 7, 0), at(19, 8, 0), Interval::Min1)
        .await
        .unwrap();

    assert_eq!(series.len(), 31);
    assert_eq!(series.first_time(), Some(at(19, 7, 30)));
}

#[tokio::test]
async fn test_future_window_is_empty() {
    let market = FakeMarket::new(minute_bars(at(19, 7, 0), 301));
    let rig = rig(market.clone(), at(19, 12, 0));
    let uid = instrument("uid-future");

    let series = rig
        .engine
        .sync(&uid, at(20, 7, 0), at(21, 7, 0), Interval::Min1)
        .await
        .unwrap();

    assert!(series.is_empty());
    assert_eq!(market.calls(), 0);
    assert!(!rig.engine.store("uid-future", Interval::Min1).exists());
}

#[tokio::test]
async fn test_daily_window_snaps_to_trading_days() {
    let weekdays: Vec<Candle> = (1..=29)
        .filter_map(|d| NaiveDate::from_ymd_opt(2024, 2, d))
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .enumerate()
        .map(|(n, d)| bar(d.and_hms_opt(7, 0, 0).unwrap().and_utc(), n as i64))
        .collect();
    let market = FakeMarket::new(weekdays);
    let rig = rig(market.clone(), Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap());
    let uid = instrument("uid-daily");

    // Saturday 3rd to Sunday 11th
    let saturday = at(3, 0, 0);
    let sunday = at(11, 0, 0);
    let series = rig
        .engine
        .sync(&uid, saturday, sunday, Interval::Day1)
        .await
        .unwrap();

    assert_eq!(series.len(), 5);
    assert_eq!(series.first_time(), Some(at(5, 7, 0)));
    assert_eq!(series.last_time(), Some(at(9, 7, 0)));
    assert_eq!(
        market.windows.lock().unwrap().last().copied(),
        Some((at(5, 0, 0), at(9, 23, 59) + Duration::seconds(59)))
    );

    // only the two calendar lookups hit the remote side again
    let before = market.calls();
    let again = rig
        .engine
        .sync(&uid, saturday, sunday, Interval::Day1)
        .await
        .unwrap();
    assert_eq!(again, series);
    assert_eq!(market.calls(), before + 2);
}

#[tokio::test]
async fn test_concurrent_syncs_of_one_key() {
    let market = FakeMarket::new(minute_bars(at(19, 7, 0), 301));
    let rig = rig(market.clone(), at(23, 12, 0));
    let uid = instrument("uid-shared");

    let (a, b) = tokio::join!(
        rig.engine.sync(&uid, at(19, 7, 0), at(19, 9, 0), Interval::Min1),
        rig.engine.sync(&uid, at(19, 7, 0), at(19, 9, 0), Interval::Min1),
    );

    assert_eq!(a.unwrap(), b.unwrap());
    assert_eq!(market.calls(), 1);
    assert_eq!(data_rows(&rig.engine, "uid-shared", Interval::Min1).len(), 121);
}

#[tokio::test]
async fn test_batch_continues_past_failures() {
    let market = FakeMarket::new(minute_bars(at(19, 7, 0), 301));
    let rig = rig(market.clone(), at(19, 12, 0));
    let listed = |uid: &str| instrument(uid).with_first_candles(Some(at(19, 7, 0)), None);
    let instruments = vec![
        listed("uid-a"),
        listed("uid-broken"),
        instrument("uid-unlisted"),
        listed("uid-c"),
        listed("uid-skip"),
    ];

    let broken = rig.engine.store("uid-broken", Interval::Min1);
    broken.initialize().unwrap();
    fs::write(
        broken.path(),
        "open;high;low;close;volume;time\n1;2;0;1;10;not-a-time\n",
    )
    .unwrap();

    let skip: HashSet<String> = ["uid-skip".to_string()].into_iter().collect();
    let report = rig
        .engine
        .sync_batch(&instruments, Interval::Min1, &skip)
        .await;

    assert_eq!(
        report.synced,
        vec![("uid-a".to_string(), 301), ("uid-c".to_string(), 301)]
    );
    assert_eq!(report.skipped, vec!["uid-skip".to_string()]);
    assert_eq!(report.failed.len(), 2);
    assert_eq!(report.failed[0].uid, "uid-broken");
    assert!(matches!(report.failed[0].error, Error::CacheCorruption { .. }));
    assert_eq!(report.failed[1].uid, "uid-unlisted");
    assert!(matches!(report.failed[1].error, Error::UnsupportedInterval(_)));
    assert_eq!(report.permanent_failures().count(), 1);
    assert_eq!(rig.clock.now(), at(19, 12, 0));
}
