//! Per-strategy execution step.
//!
//! Runs after the timed workflow's wait elapses: re-applies the calendar
//! gate (the discovery-time check ran on an earlier clock read; the
//! stricter answer wins), allocates the order's lots across destinations,
//! and persists an idempotent execution record. One strategy's failure
//! never prevents its siblings in the same request from executing.

use crate::calendar::TradingCalendar;
use crate::error::SchedulerError;
use crate::model::{Destination, DispatchPayload, DispatchRequest, Strategy};
use crate::scheduler::allocator::allocate;
use crate::scheduler::recorder::{ExecutionRecorder, RecordOutcome};
use crate::store::{with_deadline, ExecutionStore, ScheduleStore, DEFAULT_STORE_TIMEOUT};
use crate::workflow::DispatchHandler;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Per-request execution report. Counts are per strategy.
#[derive(Debug, Default)]
pub struct ExecutionReport {
    pub succeeded: usize,
    /// Allocations that left a remainder unplaced.
    pub partial: usize,
    /// Calendar-gate rejections.
    pub skipped: usize,
    /// Attempts that found an existing execution record.
    pub duplicates: usize,
    pub failed: usize,
    pub errors: Vec<SchedulerError>,
}

/// Executes one dispatch request's strategies through the allocation and
/// recording pipeline.
pub struct StrategyExecutor<S: ScheduleStore, E: ExecutionStore> {
    schedule_store: Arc<S>,
    recorder: ExecutionRecorder<E>,
    calendar: TradingCalendar,
    destinations: Vec<Destination>,
    store_timeout: Duration,
}

impl<S: ScheduleStore, E: ExecutionStore> StrategyExecutor<S, E> {
    pub fn new(
        schedule_store: Arc<S>,
        execution_store: Arc<E>,
        calendar: TradingCalendar,
        destinations: Vec<Destination>,
    ) -> Self {
        Self {
            schedule_store,
            recorder: ExecutionRecorder::new(execution_store),
            calendar,
            destinations,
            store_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }

    /// Per-call budget for every store call this executor makes, re-fetches
    /// and record writes alike.
    pub fn with_store_timeout(mut self, store_timeout: Duration) -> Self {
        self.recorder = self.recorder.with_store_timeout(store_timeout);
        self.store_timeout = store_timeout;
        self
    }

    /// Execute every strategy in the request. Runs at the target instant,
    /// immediately after the workflow's wait elapses.
    pub async fn execute(&self, request: &DispatchRequest, now: DateTime<Utc>) -> ExecutionReport {
        let mut report = ExecutionReport::default();

        let strategies = self.resolve_strategies(request, &mut report).await;
        for strategy in &strategies {
            self.execute_one(strategy, now, &mut report).await;
        }

        info!(
            owner_id = %request.owner_id,
            execution_time = %request.execution_time,
            succeeded = report.succeeded,
            partial = report.partial,
            skipped = report.skipped,
            duplicates = report.duplicates,
            failed = report.failed,
            "Execution step complete"
        );
        report
    }

    /// Materialize the payload: embedded strategies as-is, identifier
    /// payloads re-fetched for freshness. A missing or unreadable strategy
    /// fails only itself.
    async fn resolve_strategies(
        &self,
        request: &DispatchRequest,
        report: &mut ExecutionReport,
    ) -> Vec<Strategy> {
        match &request.payload {
            DispatchPayload::Heavy { strategies } => strategies.clone(),
            DispatchPayload::JustInTime { strategy_ids } => {
                let mut out = Vec::with_capacity(strategy_ids.len());
                for id in strategy_ids {
                    let fetch = with_deadline(
                        self.store_timeout,
                        "strategy re-fetch",
                        self.schedule_store.get_strategy(&request.owner_id, id),
                    );
                    match fetch.await {
                        Ok(Some(strategy)) => out.push(strategy),
                        Ok(None) => {
                            let err = SchedulerError::Validation(format!(
                                "strategy {id} no longer exists for {}",
                                request.owner_id
                            ));
                            warn!(strategy_id = %id, "Strategy vanished between dispatch and execution");
                            report.failed += 1;
                            report.errors.push(err);
                        }
                        Err(err) => {
                            error!(strategy_id = %id, error = %err, "Strategy re-fetch failed");
                            report.failed += 1;
                            report.errors.push(err);
                        }
                    }
                }
                out
            }
        }
    }

    async fn execute_one(
        &self,
        strategy: &Strategy,
        now: DateTime<Utc>,
        report: &mut ExecutionReport,
    ) {
        // Final gate: discovery may have run on an earlier clock read.
        if !self.calendar.is_trading_day(now.date_naive()) {
            let reason = format!("non-trading day {}", now.date_naive());
            match self
                .recorder
                .record_skipped(
                    &strategy.owner_id,
                    &strategy.strategy_id,
                    &strategy.execution_time,
                    &reason,
                    now,
                )
                .await
            {
                Ok(_) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    report.errors.push(err);
                }
            }
            return;
        }

        let plan = allocate(strategy.total_lots(), &self.destinations);
        if plan.is_partial() {
            warn!(
                strategy_id = %strategy.strategy_id,
                remainder = plan.remainder,
                "Allocation shortfall, recording partial fill"
            );
        }

        match self
            .recorder
            .record_allocation(
                &strategy.owner_id,
                &strategy.strategy_id,
                &strategy.execution_time,
                &plan,
                now,
            )
            .await
        {
            Ok(RecordOutcome::Created(record)) => {
                if plan.is_partial() {
                    report.partial += 1;
                } else {
                    report.succeeded += 1;
                }
                info!(
                    execution_id = %record.execution_id,
                    strategy_id = %strategy.strategy_id,
                    lots = plan.allocated(),
                    remainder = plan.remainder,
                    "Strategy executed"
                );
            }
            Ok(RecordOutcome::Duplicate(_)) => report.duplicates += 1,
            Err(err) => {
                error!(
                    strategy_id = %strategy.strategy_id,
                    error = %err,
                    "Failed to persist execution record"
                );
                report.failed += 1;
                report.errors.push(err);
            }
        }
    }
}

#[async_trait]
impl<S: ScheduleStore + 'static, E: ExecutionStore + 'static> DispatchHandler
    for StrategyExecutor<S, E>
{
    async fn handle(&self, request: DispatchRequest) {
        self.execute(&request, Utc::now()).await;
    }
}
