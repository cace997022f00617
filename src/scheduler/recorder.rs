//! Idempotent execution record creation.
//!
//! Every dispatch attempt yields one record keyed by a deterministic
//! execution id derived from (owner, strategy, execution time, attempt
//! second). The upstream queue delivers at least once, so the id doubles as
//! a natural idempotency key: a second attempt with the same inputs finds
//! the existing record and does not duplicate it.

use crate::error::SchedulerError;
use crate::model::{AllocationPlan, ExecutionRecord, ExecutionStatus};
use crate::store::{with_deadline, ExecutionStore, DEFAULT_STORE_TIMEOUT};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Deterministic id over owner, strategy, execution time, and the attempt
/// timestamp floored to whole seconds. SHA-256, hex-encoded.
pub fn execution_id(
    owner_id: &str,
    strategy_id: &str,
    execution_time: &str,
    now: DateTime<Utc>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(owner_id.as_bytes());
    hasher.update(b"#");
    hasher.update(strategy_id.as_bytes());
    hasher.update(b"#");
    hasher.update(execution_time.as_bytes());
    hasher.update(b"#");
    hasher.update(now.timestamp().to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Result of a record attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Created(ExecutionRecord),
    /// A record with this id already exists; nothing was written.
    Duplicate(String),
}

/// Builds and persists execution records through the store's conditional
/// write. Every store call is bounded by a per-call deadline.
pub struct ExecutionRecorder<E: ExecutionStore> {
    store: Arc<E>,
    store_timeout: Duration,
}

impl<E: ExecutionStore> ExecutionRecorder<E> {
    pub fn new(store: Arc<E>) -> Self {
        Self {
            store,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.store_timeout = store_timeout;
        self
    }

    /// Persist one dispatch attempt. Status derives from the allocation:
    /// `partial` when lots were left unplaced, `success` otherwise.
    /// Calendar-gate rejections go through [`record_skipped`] instead.
    ///
    /// [`record_skipped`]: ExecutionRecorder::record_skipped
    pub async fn record_allocation(
        &self,
        owner_id: &str,
        strategy_id: &str,
        execution_time: &str,
        plan: &AllocationPlan,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, SchedulerError> {
        let status = if plan.is_partial() {
            ExecutionStatus::Partial
        } else {
            ExecutionStatus::Success
        };
        let note = plan.is_partial().then(|| {
            format!("partial fill: {} lots unplaced", plan.remainder)
        });
        self.record(
            owner_id,
            strategy_id,
            execution_time,
            status,
            plan.allocations.clone(),
            plan.remainder,
            note,
            now,
        )
        .await
    }

    /// Record a calendar-gate rejection. `skipped` is reserved for this.
    pub async fn record_skipped(
        &self,
        owner_id: &str,
        strategy_id: &str,
        execution_time: &str,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, SchedulerError> {
        self.record(
            owner_id,
            strategy_id,
            execution_time,
            ExecutionStatus::Skipped,
            Vec::new(),
            0,
            Some(reason.to_string()),
            now,
        )
        .await
    }

    /// Record a per-strategy execution failure.
    pub async fn record_error(
        &self,
        owner_id: &str,
        strategy_id: &str,
        execution_time: &str,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, SchedulerError> {
        self.record(
            owner_id,
            strategy_id,
            execution_time,
            ExecutionStatus::Error,
            Vec::new(),
            0,
            Some(error.to_string()),
            now,
        )
        .await
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        owner_id: &str,
        strategy_id: &str,
        execution_time: &str,
        status: ExecutionStatus,
        allocations: Vec<crate::model::Allocation>,
        remainder: u32,
        note: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<RecordOutcome, SchedulerError> {
        let id = execution_id(owner_id, strategy_id, execution_time, now);
        let mut record = ExecutionRecord {
            execution_id: id.clone(),
            owner_id: owner_id.to_string(),
            strategy_id: strategy_id.to_string(),
            execution_time: execution_time.to_string(),
            status,
            allocations,
            remainder,
            requested_at: now,
            completed_at: None,
            note,
        };

        let created = with_deadline(
            self.store_timeout,
            "execution record create",
            self.store.create_if_absent(&record),
        )
        .await?;
        if created {
            // The execution step completes synchronously, so the terminal
            // status is appended in the same call; the conditional create
            // alone keeps repeated attempts idempotent.
            with_deadline(
                self.store_timeout,
                "execution record finalize",
                self.store.finalize_record(&id, status, None),
            )
            .await?;
            record.completed_at = Some(now);
            info!(
                execution_id = %id,
                owner_id,
                strategy_id,
                status = status.as_str(),
                "Execution record created"
            );
            Ok(RecordOutcome::Created(record))
        } else {
            warn!(
                execution_id = %id,
                owner_id,
                strategy_id,
                "Duplicate execution attempt, record already exists"
            );
            Ok(RecordOutcome::Duplicate(id))
        }
    }
}
