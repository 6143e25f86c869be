//! Data management module
//!
//! Candle model, intervals, numeric conversions and the on-disk candle store.

pub mod candle;
pub mod convert;
pub mod interval;
pub mod storage;

pub use candle::*;
pub use convert::Quotation;
pub use interval::Interval;
pub use storage::{CandleStore, StatusTag, SyncStatus};
