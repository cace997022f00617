//! Core scheduling pipeline.
//!
//! Contains the four stages between a discovery trigger and a persisted
//! execution record:
//! - Window discovery over the schedule index
//! - Tiered lot allocation across ranked destinations
//! - Batch dispatch to the timed workflow, grouped by execution time
//! - Per-strategy execution with idempotent recording

pub mod allocator;
mod discoverer;
mod dispatcher;
mod executor;
mod recorder;

pub use allocator::allocate;
pub use discoverer::{DiscoveryOutcome, RetryPolicy, WindowDiscoverer};
pub use dispatcher::{BatchDispatcher, DispatchSummary, GroupOutcome};
pub use executor::{ExecutionReport, StrategyExecutor};
pub use recorder::{execution_id, ExecutionRecorder, RecordOutcome};

/// Aggregate of one trigger cycle: discovery counts plus dispatch counts.
/// A cycle with failures still produces a report; the trigger loop never
/// dies with it.
#[derive(Debug, Default)]
pub struct CycleReport {
    pub cycle: u64,
    pub candidates: usize,
    pub failed_minutes: u32,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed_groups: usize,
}
