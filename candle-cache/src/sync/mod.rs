//! Cache synchronization
//!
//! Probe/fetch state machine, trading-day lookup and batch driving.

pub mod batch;
pub mod calendar;
pub mod engine;

pub use batch::{BatchFailure, BatchReport};
pub use calendar::{DaySnap, Direction, TradingCalendar};
pub use engine::SyncEngine;
