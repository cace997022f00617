//! Minute-by-minute strategy discovery over a half-open window.
//!
//! Walks every whole minute in `[start, end)` and issues one indexed lookup
//! per non-weekend minute, so the store load is bounded by window size, not
//! by how many strategies exist. A lookup failure for one minute never
//! aborts the remaining minutes; partial results come back with a failed
//! minute count so the caller can decide whether the cycle is usable.

use crate::error::SchedulerError;
use crate::model::{CandidateStrategy, DiscoveryWindow, WeekdayCode};
use crate::store::{with_deadline, ScheduleStore, DEFAULT_STORE_TIMEOUT};
use chrono::{Datelike, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Bounded retry for transient lookup failures. Each attempt carries its
/// own deadline, so a hung store call is indistinguishable from a throttled
/// one: it times out, retries, and at worst drops the minute.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    /// Per-attempt budget for one store call.
    pub attempt_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(100),
            attempt_timeout: DEFAULT_STORE_TIMEOUT,
        }
    }
}

/// Outcome of one discovery pass. Candidates are ordered by minute, then by
/// the store's natural sort order within a minute, so downstream batching
/// is reproducible.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub candidates: Vec<CandidateStrategy>,
    /// Minutes that were queried (non-weekend minutes in the window).
    pub scanned_minutes: u32,
    /// Minutes skipped by the local weekend filter, before any lookup.
    pub skipped_weekend_minutes: u32,
    /// Minutes whose lookup failed after retries; dropped from this cycle.
    pub failed_minutes: u32,
    pub errors: Vec<SchedulerError>,
}

/// Queries the schedule index for all strategies due inside a window.
pub struct WindowDiscoverer<S: ScheduleStore> {
    store: Arc<S>,
    retry: RetryPolicy,
}

impl<S: ScheduleStore> WindowDiscoverer<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Discover every active strategy of `identity` due at some minute in
    /// the window. Exactly one indexed lookup per non-weekend minute.
    pub async fn discover(&self, identity: &str, window: &DiscoveryWindow) -> DiscoveryOutcome {
        let mut outcome = DiscoveryOutcome::default();

        for minute in window.minutes() {
            let weekday = WeekdayCode::from(minute.weekday());
            if weekday.is_weekend() {
                // Cheap local filter, independent of the holiday calendar.
                outcome.skipped_weekend_minutes += 1;
                continue;
            }

            let time = format!("{:02}:{:02}", minute.hour(), minute.minute());
            outcome.scanned_minutes += 1;

            match self.lookup_with_retry(identity, weekday, &time).await {
                Ok(strategies) => {
                    for strategy in strategies {
                        outcome.candidates.push(CandidateStrategy {
                            strategy,
                            entry_time: minute,
                        });
                    }
                }
                Err(err) => {
                    warn!(
                        identity,
                        %weekday,
                        %time,
                        error = %err,
                        "Minute lookup dropped from cycle"
                    );
                    outcome.failed_minutes += 1;
                    outcome.errors.push(err);
                }
            }
        }

        info!(
            identity,
            window_start = %window.start,
            window_end = %window.end,
            candidates = outcome.candidates.len(),
            scanned = outcome.scanned_minutes,
            weekend_skipped = outcome.skipped_weekend_minutes,
            failed = outcome.failed_minutes,
            "Discovery pass complete"
        );
        outcome
    }

    async fn lookup_with_retry(
        &self,
        identity: &str,
        weekday: WeekdayCode,
        time: &str,
    ) -> Result<Vec<crate::model::Strategy>, SchedulerError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match with_deadline(
                self.retry.attempt_timeout,
                "minute lookup",
                self.store.strategies_due(identity, weekday, time),
            )
            .await
            {
                Ok(strategies) => return Ok(strategies),
                Err(err) if err.is_retryable() && attempt < self.retry.max_attempts => {
                    debug!(
                        %time,
                        attempt,
                        error = %err,
                        "Transient lookup failure, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff * attempt).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
