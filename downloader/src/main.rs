use anyhow::Result;
use candle_cache::instrument::{Instrument, InstrumentDirectory};
use tracing_subscriber::EnvFilter;

mod state;

use state::AppState;

/// Look up metadata for every configured uid; unknown ones are logged and left out
async fn resolve_instruments(app_state: &AppState) -> Vec<Instrument> {
    let mut instruments = Vec::with_capacity(app_state.instruments.len());
    for uid in &app_state.instruments {
        if app_state.skip.contains(uid) {
            continue;
        }
        match app_state.source.instrument_by_uid(uid).await {
            Ok(instrument) => {
                tracing::debug!(uid = %uid, ticker = %instrument.ticker, "instrument resolved");
                instruments.push(instrument);
            }
            Err(e) => tracing::error!(uid = %uid, "cannot resolve instrument: {}", e),
        }
    }
    instruments
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        git_hash = env!("GIT_HASH"),
        "Starting candle downloader..."
    );

    let app_state = AppState::new()?;
    if app_state.instruments.is_empty() {
        tracing::warn!("SYNC_INSTRUMENTS is empty, nothing to do");
        return Ok(());
    }

    let instruments = resolve_instruments(&app_state).await;
    let report = app_state
        .engine
        .sync_batch(&instruments, app_state.interval, &app_state.skip)
        .await;

    for failure in &report.failed {
        tracing::error!(
            uid = %failure.uid,
            permanent = failure.error.is_permanent(),
            "{}",
            failure.error
        );
    }
    tracing::info!(
        synced = report.synced.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        candles = report.total_candles(),
        "Batch finished"
    );
    if !report.is_clean() {
        tracing::warn!("some instruments were not synced, see errors above");
    }

    Ok(())
}
