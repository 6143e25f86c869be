use anyhow::Context;
use candle_cache::clock::{Clock, SystemClock};
use candle_cache::data::Interval;
use candle_cache::exchange::{CredentialPool, FetchConfig, RotatingSource, TinkoffClient};
use candle_cache::sync::SyncEngine;
use shared::Config;
use std::collections::HashSet;
use std::sync::Arc;

pub struct AppState {
    pub source: Arc<RotatingSource<TinkoffClient>>,
    pub engine: SyncEngine,
    pub interval: Interval,
    pub instruments: Vec<String>,
    pub skip: HashSet<String>,
}

impl AppState {
    pub fn new() -> Result<Self, anyhow::Error> {
        let config = Config::from_env()?;
        let interval: Interval = config
            .sync_interval
            .parse()
            .with_context(|| format!("SYNC_INTERVAL={}", config.sync_interval))?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let pool = CredentialPool::from_tokens(config.credentials(), clock.clone())
            .context("set TOKENS_FULL_ACCESS or TOKENS_READ_ONLY")?;
        let client = TinkoffClient::new(&config.api_base_url)?;
        let fetch_config = FetchConfig {
            unavailable_delay: chrono::Duration::milliseconds(config.unavailable_retry_delay_ms as i64),
        };
        let source = Arc::new(
            RotatingSource::new(client, Arc::new(pool), clock.clone()).with_config(fetch_config),
        );
        let engine = SyncEngine::new(&config.candles_dir, source.clone(), clock);
        tracing::info!(
            candles_dir = %config.candles_dir,
            %interval,
            instruments = config.sync_instruments.len(),
            "AppState initialized"
        );

        Ok(AppState {
            source,
            engine,
            interval,
            instruments: config.sync_instruments.clone(),
            skip: config.sync_skip.iter().cloned().collect(),
        })
    }
}
