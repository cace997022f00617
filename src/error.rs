//! Error taxonomy for the scheduling pipeline.
//!
//! Three failure classes with distinct handling policies:
//! - `Validation`: malformed input (bad time string, missing field). Never
//!   retried; the offending unit is logged and skipped.
//! - `TransientLookup`: store throttling or timeout. Retried with bounded
//!   backoff at the call site; if exhausted, only the affected minute or
//!   strategy is dropped from the current cycle.
//! - `Dispatch`: the workflow collaborator rejected or failed to start a
//!   time-group. Recorded per group; sibling groups are unaffected.
//!
//! Errors never cross component boundaries as panics. Batch-level callers
//! receive structured outcome types (success/failure counts plus an error
//! list) and make their own partial-success decisions.

use thiserror::Error;

/// Failure classes for scheduling, lookup, and dispatch operations.
#[derive(Debug, Clone, Error)]
pub enum SchedulerError {
    /// Malformed input: bad time string, unparseable key, missing field.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Store throttling, timeout, or connectivity failure. Retryable.
    #[error("transient lookup failure: {0}")]
    TransientLookup(String),

    /// The timed-workflow collaborator rejected or failed to start a group.
    #[error("dispatch failed for group {group}: {reason}")]
    Dispatch { group: String, reason: String },
}

impl SchedulerError {
    /// Whether the call site may retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SchedulerError::TransientLookup(_))
    }
}
