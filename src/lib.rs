//! # Strategy Scheduler
//!
//! Discovers trading strategies due inside a lookahead window, waits until
//! the precise execution instant via a timed workflow, and splits each
//! order across ranked broker accounts with proportional lot allocation.
//!
//! ## Architecture
//!
//! - `config`: Configuration management and validation
//! - `calendar`: Weekday/holiday trading-day gate
//! - `timing`: Sub-minute wait computation and workflow tiers
//! - `model`: Strategies, schedule keys, destinations, execution records
//! - `store`: Keyed lookup store boundary (SQLite + in-memory fake)
//! - `scheduler`: Discovery, allocation, dispatch, and recording pipeline
//! - `workflow`: Timed-workflow collaborator boundary

pub mod calendar;
pub mod config;
pub mod error;
pub mod model;
pub mod scheduler;
pub mod store;
pub mod timing;
pub mod workflow;

pub use config::Config;
pub use error::SchedulerError;
