//! Sub-minute wait computation for precision dispatch.
//!
//! The downstream timed workflow sleeps a whole number of seconds and then
//! fires; landing execution exactly on the target `HH:MM:00` boundary means
//! computing that sleep from the current clock read. The computation runs
//! twice per strategy group: coarsely at discovery time and precisely right
//! before handing the group to the workflow.

use crate::model::parse_hhmm;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;

/// The workflow never accepts a non-positive wait.
pub const MIN_WAIT_SECONDS: i64 = 1;

/// Returned when the target time string fails to parse. A late execution is
/// preferred over a crashed scheduler, so the parse failure is logged and
/// this conservative value returned instead of propagating the error into
/// the dispatch path.
pub const FALLBACK_WAIT_SECONDS: i64 = 60;

/// Runtime tier of the timed-workflow collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowTier {
    /// Long-running workflow; waits up to 24 hours.
    #[serde(rename = "standard")]
    Standard,
    /// Short-running workflow with a 300s hard runtime cap; waits are held
    /// to 260s to leave 40s of execution headroom inside the cap.
    #[serde(rename = "fast")]
    Fast,
}

impl WorkflowTier {
    pub fn ceiling_seconds(&self) -> i64 {
        match self {
            WorkflowTier::Standard => 86_400,
            WorkflowTier::Fast => 260,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowTier::Standard => "standard",
            WorkflowTier::Fast => "fast",
        }
    }
}

/// Whole seconds to wait from `now` to land on today's `target_hhmm:00`.
///
/// If the target minute has already passed today, returns the minimum wait
/// of 1 so the caller dispatches immediately (the workflow rejects 0). The
/// result is clamped to `[1, ceiling_seconds]`. A malformed `target_hhmm`
/// yields [`FALLBACK_WAIT_SECONDS`] rather than an error.
pub fn compute_wait_seconds(now: DateTime<Utc>, target_hhmm: &str, ceiling_seconds: i64) -> i64 {
    let Some(target_time) = parse_hhmm(target_hhmm) else {
        error!(time = %target_hhmm, "Unparseable execution time, using fallback wait");
        return FALLBACK_WAIT_SECONDS;
    };

    let target = now
        .date_naive()
        .and_time(target_time)
        .and_utc();

    if target <= now {
        return MIN_WAIT_SECONDS;
    }

    // Positive duration, so truncation equals floor.
    (target - now)
        .num_seconds()
        .clamp(MIN_WAIT_SECONDS, ceiling_seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 8, h, m, s).unwrap()
    }

    // =========================================================================
    // Future targets
    // =========================================================================

    #[test]
    fn test_future_target_returns_floor_of_delta() {
        // 09:25:30 -> 09:30:00 is 270 seconds.
        assert_eq!(
            compute_wait_seconds(at(9, 25, 30), "09:30", WorkflowTier::Standard.ceiling_seconds()),
            270
        );
    }

    #[test]
    fn test_subsecond_now_floors_not_rounds() {
        let now = at(9, 29, 0) + chrono::Duration::milliseconds(400);
        assert_eq!(compute_wait_seconds(now, "09:30", 86_400), 59);
    }

    #[test]
    fn test_wait_clamped_to_fast_ceiling() {
        // 09:00 -> 15:25 is far beyond the fast tier's 260s ceiling.
        assert_eq!(
            compute_wait_seconds(at(9, 0, 0), "15:25", WorkflowTier::Fast.ceiling_seconds()),
            260
        );
    }

    #[test]
    fn test_wait_clamped_to_standard_ceiling() {
        // 00:00:00 -> 23:59 is 86_340s, inside the standard ceiling.
        assert_eq!(compute_wait_seconds(at(0, 0, 0), "23:59", 86_400), 86_340);
    }

    // =========================================================================
    // Past or current targets
    // =========================================================================

    #[test]
    fn test_past_target_returns_one_not_negative() {
        assert_eq!(compute_wait_seconds(at(9, 31, 0), "09:30", 86_400), 1);
    }

    #[test]
    fn test_exact_boundary_returns_one() {
        assert_eq!(compute_wait_seconds(at(9, 30, 0), "09:30", 86_400), 1);
    }

    // =========================================================================
    // Parse failures
    // =========================================================================

    #[test]
    fn test_malformed_target_returns_fallback() {
        assert_eq!(compute_wait_seconds(at(9, 0, 0), "930", 86_400), 60);
        assert_eq!(compute_wait_seconds(at(9, 0, 0), "9:30", 86_400), 60);
        assert_eq!(compute_wait_seconds(at(9, 0, 0), "", 86_400), 60);
        assert_eq!(compute_wait_seconds(at(9, 0, 0), "25:99", 86_400), 60);
    }

    #[test]
    fn test_tier_ceilings() {
        assert_eq!(WorkflowTier::Standard.ceiling_seconds(), 86_400);
        assert_eq!(WorkflowTier::Fast.ceiling_seconds(), 260);
    }
}
