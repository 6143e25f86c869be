//! Credential-rotating remote source

use crate::clock::Clock;
use crate::data::{CandleSeries, Interval};
use crate::error::Result;
use crate::exchange::credentials::CredentialPool;
use crate::exchange::source::{
    fetch_chunked, splice, CandleApi, FetchConfig, FetchOutcome, FetchRequest, RemoteCandleSource,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Remote source that spreads requests over a [`CredentialPool`].
///
/// When a credential runs out of quota mid-range, the gathered candles are kept and the fetch
/// continues from the last of them with the next free credential.
pub struct RotatingSource<A> {
    api: A,
    pool: Arc<CredentialPool>,
    clock: Arc<dyn Clock>,
    config: FetchConfig,
}

impl<A: CandleApi> RotatingSource<A> {
    pub fn new(api: A, pool: Arc<CredentialPool>, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            pool,
            clock,
            config: FetchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: FetchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> FetchConfig {
        self.config
    }
}

#[async_trait]
impl<A: CandleApi> RemoteCandleSource for RotatingSource<A> {
    async fn fetch(
        &self,
        instrument_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        interval: Interval,
    ) -> Result<CandleSeries> {
        let mut request = FetchRequest::new(instrument_id, from, to, interval);
        let mut gathered = CandleSeries::new();

        loop {
            let credential = self.pool.acquire().await;
            let outcome = fetch_chunked(
                &self.api,
                &credential,
                &request,
                self.clock.as_ref(),
                self.config,
            )
            .await?;

            match outcome {
                FetchOutcome::Complete(series) => {
                    splice(&mut gathered, series)?;
                    return Ok(gathered);
                }
                FetchOutcome::Exhausted {
                    partial,
                    resume_from,
                } => {
                    warn!(
                        instrument = instrument_id,
                        ?credential,
                        %resume_from,
                        gathered = gathered.len() + partial.len(),
                        "credential exhausted, rotating"
                    );
                    self.pool.mark_exhausted(&credential).await;
                    splice(&mut gathered, partial)?;
                    request.from = resume_from;
                    info!(instrument = instrument_id, "resuming fetch from {}", resume_from);
                }
            }
        }
    }
}
