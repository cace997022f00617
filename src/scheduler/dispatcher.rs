//! Batch dispatch of discovered strategies to the timed workflow.
//!
//! Candidates are grouped by execution time so the wait computation runs
//! once per distinct time, not once per strategy. Each group becomes one
//! dispatch request; groups fan out concurrently and fail independently.

use crate::calendar::TradingCalendar;
use crate::error::SchedulerError;
use crate::model::{
    parse_hhmm, CandidateStrategy, DispatchPayload, DispatchRequest, MarketPhase, PayloadMode,
};
use crate::timing::{compute_wait_seconds, WorkflowTier};
use crate::workflow::WorkflowClient;
use chrono::{DateTime, Timelike, Utc};
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Outcome for one time-group.
#[derive(Debug)]
pub struct GroupOutcome {
    pub execution_time: String,
    pub strategies: usize,
    pub wait_seconds: i64,
    /// The final calendar guard rejected the group's date.
    pub calendar_skipped: bool,
    pub error: Option<SchedulerError>,
}

/// Batch-level dispatch result. Callers make partial-success decisions from
/// the counts; a failed group never fails the batch.
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub groups: Vec<GroupOutcome>,
    pub dispatched: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Groups candidates by execution time and hands each group to the
/// workflow collaborator.
pub struct BatchDispatcher<W: WorkflowClient> {
    workflow: Arc<W>,
    tier: WorkflowTier,
    payload_mode: PayloadMode,
    calendar: TradingCalendar,
    /// Per-call budget for the workflow start; a slow collaborator cannot
    /// stall the rest of the cycle.
    call_timeout: Duration,
}

impl<W: WorkflowClient> BatchDispatcher<W> {
    pub fn new(
        workflow: Arc<W>,
        tier: WorkflowTier,
        payload_mode: PayloadMode,
        calendar: TradingCalendar,
        call_timeout: Duration,
    ) -> Self {
        Self {
            workflow,
            tier,
            payload_mode,
            calendar,
            call_timeout,
        }
    }

    /// Dispatch all candidates, one workflow start per distinct execution
    /// time. The precise wait is computed here, immediately before handing
    /// off, from the supplied clock read.
    pub async fn dispatch(
        &self,
        identity: &str,
        candidates: Vec<CandidateStrategy>,
        now: DateTime<Utc>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        if candidates.is_empty() {
            return summary;
        }

        // BTreeMap keeps group order deterministic for reproducible runs.
        let mut groups: BTreeMap<String, Vec<CandidateStrategy>> = BTreeMap::new();
        for candidate in candidates {
            let time = format!(
                "{:02}:{:02}",
                candidate.entry_time.hour(),
                candidate.entry_time.minute()
            );
            groups.entry(time).or_default().push(candidate);
        }

        let mut pending = Vec::new();
        for (time, group) in groups {
            match self.prepare_group(identity, &time, &group, now) {
                Ok(Some(request)) => pending.push((time, group.len(), request)),
                Ok(None) => {
                    summary.skipped += 1;
                    summary.groups.push(GroupOutcome {
                        execution_time: time,
                        strategies: group.len(),
                        wait_seconds: 0,
                        calendar_skipped: true,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(%time, error = %err, "Dispatch request rejected before start");
                    summary.failed += 1;
                    summary.groups.push(GroupOutcome {
                        execution_time: time,
                        strategies: group.len(),
                        wait_seconds: 0,
                        calendar_skipped: false,
                        error: Some(err),
                    });
                }
            }
        }

        // Concurrent fan-out with isolated failure domains.
        let starts = pending.into_iter().map(|(time, size, request)| {
            let workflow = self.workflow.clone();
            let timeout = self.call_timeout;
            async move {
                let wait_seconds = request.wait_seconds;
                let result = match tokio::time::timeout(timeout, workflow.start(request)).await {
                    Ok(result) => result,
                    Err(_) => Err(SchedulerError::Dispatch {
                        group: time.clone(),
                        reason: format!("workflow start timed out after {timeout:?}"),
                    }),
                };
                (time, size, wait_seconds, result)
            }
        });

        for (time, size, wait_seconds, result) in join_all(starts).await {
            match result {
                Ok(()) => {
                    summary.dispatched += 1;
                    summary.groups.push(GroupOutcome {
                        execution_time: time,
                        strategies: size,
                        wait_seconds,
                        calendar_skipped: false,
                        error: None,
                    });
                }
                Err(err) => {
                    warn!(%time, error = %err, "Group dispatch failed");
                    summary.failed += 1;
                    summary.groups.push(GroupOutcome {
                        execution_time: time,
                        strategies: size,
                        wait_seconds,
                        calendar_skipped: false,
                        error: Some(err),
                    });
                }
            }
        }

        info!(
            identity,
            dispatched = summary.dispatched,
            skipped = summary.skipped,
            failed = summary.failed,
            "Batch dispatch complete"
        );
        summary
    }

    /// Build and validate one group's request. `Ok(None)` means the
    /// calendar guard rejected the group's date.
    fn prepare_group(
        &self,
        identity: &str,
        time: &str,
        group: &[CandidateStrategy],
        now: DateTime<Utc>,
    ) -> Result<Option<DispatchRequest>, SchedulerError> {
        let group_date = group
            .first()
            .map(|c| c.entry_time.date_naive())
            .unwrap_or_else(|| now.date_naive());
        if !self.calendar.is_trading_day(group_date) {
            info!(time, date = %group_date, "Calendar gate rejected group before dispatch");
            return Ok(None);
        }

        let target = parse_hhmm(time).ok_or_else(|| {
            SchedulerError::Validation(format!("group time {time:?} is not HH:MM"))
        })?;

        // One wait computation per group, the key efficiency property.
        let wait_seconds = compute_wait_seconds(now, time, self.tier.ceiling_seconds());

        let payload = match self.payload_mode {
            PayloadMode::Heavy => DispatchPayload::Heavy {
                strategies: group.iter().map(|c| c.strategy.clone()).collect(),
            },
            PayloadMode::JustInTime => DispatchPayload::JustInTime {
                strategy_ids: group
                    .iter()
                    .map(|c| c.strategy.strategy_id.clone())
                    .collect(),
            },
        };
        if payload.is_empty() {
            return Err(SchedulerError::Validation(format!(
                "empty dispatch group at {time}"
            )));
        }

        Ok(Some(DispatchRequest {
            owner_id: identity.to_string(),
            execution_time: time.to_string(),
            wait_seconds,
            priority: MarketPhase::from_time(target),
            payload,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        ExecutionType, LegDefinition, OrderSide, Strategy, StrategyStatus, WeekdayCode,
    };
    use crate::workflow::RecordingWorkflow;
    use chrono::{NaiveDate, TimeZone};
    use mockall::mock;

    mock! {
        pub Workflow {}

        #[async_trait::async_trait]
        impl WorkflowClient for Workflow {
            async fn start(&self, request: DispatchRequest) -> Result<(), SchedulerError>;
        }
    }

    fn test_strategy(id: &str, time: &str) -> Strategy {
        Strategy {
            strategy_id: id.to_string(),
            owner_id: "owner-1".to_string(),
            execution_time: time.to_string(),
            execution_type: ExecutionType::Entry,
            weekdays: [WeekdayCode::Mon].into_iter().collect(),
            legs: vec![LegDefinition {
                leg_id: 1,
                instrument: "NIFTY-FUT".to_string(),
                side: OrderSide::Buy,
                lots: 2,
                strike: None,
                premium_cap: None,
            }],
            underlying: "NIFTY".to_string(),
            status: StrategyStatus::Active,
        }
    }

    fn candidate(id: &str, h: u32, m: u32) -> CandidateStrategy {
        CandidateStrategy {
            strategy: test_strategy(id, &format!("{h:02}:{m:02}")),
            entry_time: Utc.with_ymd_and_hms(2024, 1, 8, h, m, 0).unwrap(),
        }
    }

    fn dispatcher(workflow: Arc<RecordingWorkflow>) -> BatchDispatcher<RecordingWorkflow> {
        BatchDispatcher::new(
            workflow,
            WorkflowTier::Standard,
            PayloadMode::JustInTime,
            TradingCalendar::new(),
            Duration::from_secs(5),
        )
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, 9, 25, 0).unwrap()
    }

    #[tokio::test]
    async fn test_one_request_per_distinct_time() {
        let workflow = Arc::new(RecordingWorkflow::new());
        let d = dispatcher(workflow.clone());
        let candidates = vec![
            candidate("s1", 9, 30),
            candidate("s2", 9, 30),
            candidate("s3", 9, 32),
        ];

        let summary = d.dispatch("owner-1", candidates, now()).await;
        assert_eq!(summary.dispatched, 2);
        assert_eq!(summary.failed, 0);

        let started = workflow.started().await;
        assert_eq!(started.len(), 2);
        let group_0930 = started
            .iter()
            .find(|r| r.execution_time == "09:30")
            .unwrap();
        assert_eq!(group_0930.payload.len(), 2);
        // 09:25 -> 09:30 is 300 whole seconds.
        assert_eq!(group_0930.wait_seconds, 300);
    }

    #[tokio::test]
    async fn test_calendar_guard_skips_group_before_dispatch() {
        let workflow = Arc::new(RecordingWorkflow::new());
        let holiday = NaiveDate::from_ymd_opt(2024, 1, 8).unwrap();
        let d = BatchDispatcher::new(
            workflow.clone(),
            WorkflowTier::Standard,
            PayloadMode::JustInTime,
            TradingCalendar::with_holidays([holiday]),
            Duration::from_secs(5),
        );

        let summary = d.dispatch("owner-1", vec![candidate("s1", 9, 30)], now()).await;
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.dispatched, 0);
        assert!(workflow.started().await.is_empty());
    }

    #[tokio::test]
    async fn test_group_failure_does_not_affect_siblings() {
        let mut mock = MockWorkflow::new();
        mock.expect_start()
            .returning(|request: DispatchRequest| {
                if request.execution_time == "09:30" {
                    Err(SchedulerError::Dispatch {
                        group: request.execution_time,
                        reason: "workflow unavailable".into(),
                    })
                } else {
                    Ok(())
                }
            });
        let d = BatchDispatcher::new(
            Arc::new(mock),
            WorkflowTier::Standard,
            PayloadMode::JustInTime,
            TradingCalendar::new(),
            Duration::from_secs(5),
        );

        let summary = d
            .dispatch(
                "owner-1",
                vec![candidate("s1", 9, 30), candidate("s2", 9, 32)],
                now(),
            )
            .await;
        assert_eq!(summary.dispatched, 1);
        assert_eq!(summary.failed, 1);
        let failed = summary
            .groups
            .iter()
            .find(|g| g.error.is_some())
            .unwrap();
        assert_eq!(failed.execution_time, "09:30");
    }

    #[tokio::test]
    async fn test_heavy_mode_embeds_strategies() {
        let workflow = Arc::new(RecordingWorkflow::new());
        let d = BatchDispatcher::new(
            workflow.clone(),
            WorkflowTier::Standard,
            PayloadMode::Heavy,
            TradingCalendar::new(),
            Duration::from_secs(5),
        );

        d.dispatch("owner-1", vec![candidate("s1", 9, 30)], now()).await;
        let started = workflow.started().await;
        match &started[0].payload {
            DispatchPayload::Heavy { strategies } => {
                assert_eq!(strategies[0].strategy_id, "s1");
            }
            other => panic!("expected heavy payload, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_past_time_dispatches_with_minimum_wait() {
        let workflow = Arc::new(RecordingWorkflow::new());
        let d = dispatcher(workflow.clone());
        let late_now = Utc.with_ymd_and_hms(2024, 1, 8, 9, 31, 0).unwrap();

        d.dispatch("owner-1", vec![candidate("s1", 9, 30)], late_now)
            .await;
        assert_eq!(workflow.started().await[0].wait_seconds, 1);
    }

    #[tokio::test]
    async fn test_empty_candidate_list_is_a_noop() {
        let workflow = Arc::new(RecordingWorkflow::new());
        let d = dispatcher(workflow.clone());
        let summary = d.dispatch("owner-1", Vec::new(), now()).await;
        assert!(summary.groups.is_empty());
        assert!(workflow.started().await.is_empty());
    }

    #[tokio::test]
    async fn test_market_phase_hint_follows_time() {
        let workflow = Arc::new(RecordingWorkflow::new());
        let d = dispatcher(workflow.clone());
        let candidates = vec![candidate("s1", 9, 30), candidate("s2", 15, 10)];

        d.dispatch("owner-1", candidates, now()).await;
        let started = workflow.started().await;
        let phase_of = |time: &str| {
            started
                .iter()
                .find(|r| r.execution_time == time)
                .unwrap()
                .priority
        };
        assert_eq!(phase_of("09:30"), MarketPhase::Open);
        assert_eq!(phase_of("15:10"), MarketPhase::Close);
    }
}
