//! Store traits at the external keyed-lookup boundary.
//!
//! The production store is a keyed lookup service supporting point/range
//! reads by `(identity, sortable-key-prefix)` and conditional writes for
//! idempotent record creation. Every component takes its store as a trait
//! object or generic parameter, so tests substitute the in-memory fake.

use crate::error::SchedulerError;
use crate::model::{
    ExecutionRecord, ExecutionStatus, ScheduleEntry, Strategy, WeekdayCode,
};
use async_trait::async_trait;

/// Strategy definitions plus the derived schedule index.
///
/// The index invariant: after `put_strategy`, the set of schedule entries
/// for that strategy exactly mirrors its current `weekdays x execution_type`
/// cross-product. Stale entries are a correctness bug, so writes replace the
/// full entry set atomically.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Upsert a strategy and rebuild its schedule index entries.
    async fn put_strategy(&self, strategy: &Strategy) -> Result<(), SchedulerError>;

    /// Mark a strategy inactive and drop all of its index entries.
    async fn deactivate_strategy(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<(), SchedulerError>;

    async fn get_strategy(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<Option<Strategy>, SchedulerError>;

    /// One indexed minute lookup: every ACTIVE strategy of `owner_id` due at
    /// `(weekday, time)`, both entry and exit types, in sort-key order.
    async fn strategies_due(
        &self,
        owner_id: &str,
        weekday: WeekdayCode,
        time: &str,
    ) -> Result<Vec<Strategy>, SchedulerError>;

    /// Current index entries for one strategy, in sort-key order.
    async fn schedule_entries(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<Vec<ScheduleEntry>, SchedulerError>;
}

/// Idempotent execution-record persistence.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Conditional create keyed on `execution_id`. Returns `false` without
    /// writing when a record with that id already exists.
    async fn create_if_absent(&self, record: &ExecutionRecord) -> Result<bool, SchedulerError>;

    async fn get_record(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, SchedulerError>;

    /// Append a terminal status (and optional note) to an existing record.
    /// The only permitted mutation after creation.
    async fn finalize_record(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        note: Option<&str>,
    ) -> Result<(), SchedulerError>;
}
