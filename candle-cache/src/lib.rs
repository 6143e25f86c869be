//! Candle-Cache: local, append-only cache of market candles
//!
//! This crate keeps per-instrument candle files consistent with a rate-limited remote API without
//! downloading what is already held:
//!
//! # Features
//!
//! - **Data**: OHLCV candles, intervals, the `;`-delimited on-disk store
//! - **Sync**: probe/fetch reconciliation with a convergence guard
//! - **Exchange**: chunked fetching, credential rotation, Tinkoff Invest REST transport
//! - **Calendar**: bounded trading-day lookup for daily data
//!
//! # Example
//!
//! ```no_run
//! use candle_cache::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
//!     let pool = Arc::new(CredentialPool::from_tokens(["t.token"], clock.clone())?);
//!     let client = TinkoffClient::new(DEFAULT_API_URL)?;
//!     let source = Arc::new(RotatingSource::new(client, pool, clock.clone()));
//!
//!     let instrument = source.instrument_by_uid("e6123145-9665-43e0-8413-cd61b8aa9b13").await?;
//!     let engine = SyncEngine::new("./data/csv/instruments", source, clock);
//!     let candles = engine.sync_full_history(&instrument, Interval::Day1).await?;
//!     println!("{} candles", candles.len());
//!     Ok(())
//! }
//! ```

pub mod clock;
pub mod data;
pub mod error;
pub mod exchange;
pub mod instrument;
pub mod sync;

pub use error::{ApiError, Error, Result};

// Re-export commonly used types
pub mod prelude {
    pub use crate::clock::*;
    pub use crate::data::*;
    pub use crate::exchange::*;
    pub use crate::instrument::*;
    pub use crate::sync::*;

    pub use crate::error::{ApiError, Error, Result};
}
