//! Domain types for strategy scheduling and execution.
//!
//! Strategies and their derived schedule-index entries are created and
//! updated by an external owner surface; this crate treats them as read-only
//! input. Dispatch and trigger payloads are explicit tagged structures that
//! reject unknown shapes at the boundary.

mod key;

pub use key::{parse_hhmm, ScheduleKey};

use chrono::{DateTime, NaiveTime, Timelike, Utc, Weekday};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Weekday code as stored in schedule index keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum WeekdayCode {
    #[serde(rename = "MON")]
    Mon,
    #[serde(rename = "TUE")]
    Tue,
    #[serde(rename = "WED")]
    Wed,
    #[serde(rename = "THU")]
    Thu,
    #[serde(rename = "FRI")]
    Fri,
    #[serde(rename = "SAT")]
    Sat,
    #[serde(rename = "SUN")]
    Sun,
}

impl WeekdayCode {
    /// Stable three-letter code used in sortable keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            WeekdayCode::Mon => "MON",
            WeekdayCode::Tue => "TUE",
            WeekdayCode::Wed => "WED",
            WeekdayCode::Thu => "THU",
            WeekdayCode::Fri => "FRI",
            WeekdayCode::Sat => "SAT",
            WeekdayCode::Sun => "SUN",
        }
    }

    /// Parse a three-letter code.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MON" => Some(WeekdayCode::Mon),
            "TUE" => Some(WeekdayCode::Tue),
            "WED" => Some(WeekdayCode::Wed),
            "THU" => Some(WeekdayCode::Thu),
            "FRI" => Some(WeekdayCode::Fri),
            "SAT" => Some(WeekdayCode::Sat),
            "SUN" => Some(WeekdayCode::Sun),
            _ => None,
        }
    }

    pub fn is_weekend(&self) -> bool {
        matches!(self, WeekdayCode::Sat | WeekdayCode::Sun)
    }
}

impl From<Weekday> for WeekdayCode {
    fn from(w: Weekday) -> Self {
        match w {
            Weekday::Mon => WeekdayCode::Mon,
            Weekday::Tue => WeekdayCode::Tue,
            Weekday::Wed => WeekdayCode::Wed,
            Weekday::Thu => WeekdayCode::Thu,
            Weekday::Fri => WeekdayCode::Fri,
            Weekday::Sat => WeekdayCode::Sat,
            Weekday::Sun => WeekdayCode::Sun,
        }
    }
}

impl fmt::Display for WeekdayCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a strategy opens or closes a position when it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ExecutionType {
    #[serde(rename = "ENTRY")]
    Entry,
    #[serde(rename = "EXIT")]
    Exit,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Entry => "ENTRY",
            ExecutionType::Exit => "EXIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ENTRY" => Some(ExecutionType::Entry),
            "EXIT" => Some(ExecutionType::Exit),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyStatus {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "INACTIVE")]
    Inactive,
}

impl StrategyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyStatus::Active => "ACTIVE",
            StrategyStatus::Inactive => "INACTIVE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACTIVE" => Some(StrategyStatus::Active),
            "INACTIVE" => Some(StrategyStatus::Inactive),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    #[serde(rename = "BUY")]
    Buy,
    #[serde(rename = "SELL")]
    Sell,
}

/// One leg of a multi-leg strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegDefinition {
    pub leg_id: u32,
    pub instrument: String,
    pub side: OrderSide,
    /// Quantity in lots for this leg.
    pub lots: u32,
    /// Strike price for option legs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strike: Option<Decimal>,
    /// Maximum acceptable premium per lot.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_cap: Option<Decimal>,
}

/// A tradeable configuration owned by an external strategy surface.
///
/// Read-only to this crate. The schedule index derived from `weekdays` and
/// `execution_type` must exactly mirror the current configuration; stale
/// index rows are a correctness bug.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    /// Unique per owner.
    pub strategy_id: String,
    pub owner_id: String,
    /// Minute-resolution execution time, `HH:MM`.
    pub execution_time: String,
    pub execution_type: ExecutionType,
    /// Weekdays on which the strategy is eligible to fire.
    pub weekdays: BTreeSet<WeekdayCode>,
    pub legs: Vec<LegDefinition>,
    pub underlying: String,
    pub status: StrategyStatus,
}

impl Strategy {
    /// Total order quantity across all legs.
    pub fn total_lots(&self) -> u32 {
        self.legs.iter().map(|l| l.lots).sum()
    }
}

/// Derived, denormalized schedule index record: one per
/// (strategy, weekday, execution type).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub owner_id: String,
    pub key: ScheduleKey,
}

/// Ephemeral half-open discovery interval: `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiscoveryWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DiscoveryWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// Every whole minute `m` with `start <= m < end`.
    ///
    /// The exclusive end is load-bearing: a strategy scheduled exactly at
    /// `end` belongs to the next window, never to both or neither.
    pub fn minutes(&self) -> Vec<DateTime<Utc>> {
        let mut out = Vec::new();
        let floored = self
            .start
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(self.start);
        let mut m = if floored < self.start {
            floored + chrono::Duration::minutes(1)
        } else {
            floored
        };
        while m < self.end {
            out.push(m);
            m += chrono::Duration::minutes(1);
        }
        out
    }
}

/// A discovered strategy annotated with its resolved entry minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateStrategy {
    pub strategy: Strategy,
    /// The exact minute within the discovery window at which it fires.
    pub entry_time: DateTime<Utc>,
}

/// A downstream broker account that receives a share of an order.
///
/// Supplied by external configuration; read-only input to allocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Destination {
    pub destination_id: String,
    /// Lower value = preferred.
    pub priority: u8,
    /// Maximum lots acceptable in one allocation pass. Advisory in the
    /// top allocation tier, where the last destination absorbs overflow.
    pub capacity: u32,
}

/// One destination's share of an allocated order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub destination_id: String,
    pub lots: u32,
}

/// Full allocation result. `allocations` may contain zero-lot entries;
/// callers needing an active-destination count must filter them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub allocations: Vec<Allocation>,
    /// Lots left unplaced when total capacity was insufficient. Non-zero
    /// remainder is a partial-fill condition, never silently dropped.
    pub remainder: u32,
}

impl AllocationPlan {
    pub fn allocated(&self) -> u32 {
        self.allocations.iter().map(|a| a.lots).sum()
    }

    pub fn is_partial(&self) -> bool {
        self.remainder > 0
    }
}

/// Terminal status of one execution attempt.
///
/// `Skipped` is reserved for calendar-gate rejections, `Partial` for
/// remainder-carrying allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    #[serde(rename = "success")]
    Success,
    #[serde(rename = "partial")]
    Partial,
    #[serde(rename = "skipped")]
    Skipped,
    #[serde(rename = "error")]
    Error,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Success => "success",
            ExecutionStatus::Partial => "partial",
            ExecutionStatus::Skipped => "skipped",
            ExecutionStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(ExecutionStatus::Success),
            "partial" => Some(ExecutionStatus::Partial),
            "skipped" => Some(ExecutionStatus::Skipped),
            "error" => Some(ExecutionStatus::Error),
            _ => None,
        }
    }
}

/// Idempotent record of one dispatch attempt.
///
/// `execution_id` is deterministic over (owner, strategy, time, attempt
/// second) so at-least-once delivery upstream cannot double-record. Never
/// mutated after creation except to append a terminal status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub execution_id: String,
    pub owner_id: String,
    pub strategy_id: String,
    pub execution_time: String,
    pub status: ExecutionStatus,
    pub allocations: Vec<Allocation>,
    pub remainder: u32,
    pub requested_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Coarse market phase, used as a dispatch priority hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketPhase {
    #[serde(rename = "OPEN")]
    Open,
    #[serde(rename = "MID_SESSION")]
    MidSession,
    #[serde(rename = "CLOSE")]
    Close,
}

impl MarketPhase {
    /// Classify an execution time: the first half hour of the session is
    /// the open phase, the last half hour the close phase.
    pub fn from_time(t: NaiveTime) -> Self {
        const OPEN_END: (u32, u32) = (9, 45);
        const CLOSE_START: (u32, u32) = (15, 0);
        let hm = (t.hour(), t.minute());
        if hm < OPEN_END {
            MarketPhase::Open
        } else if hm >= CLOSE_START {
            MarketPhase::Close
        } else {
            MarketPhase::MidSession
        }
    }
}

/// Upstream discovery trigger, delivered by the event bus on a schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TriggerEvent {
    pub identity: String,
    pub weekday: WeekdayCode,
    pub trigger_time: DateTime<Utc>,
    pub lookahead_minutes: u32,
}

impl TriggerEvent {
    /// The half-open discovery window this trigger covers.
    pub fn window(&self) -> DiscoveryWindow {
        DiscoveryWindow::new(
            self.trigger_time,
            self.trigger_time + chrono::Duration::minutes(i64::from(self.lookahead_minutes)),
        )
    }
}

/// Payload carried on a dispatch request.
///
/// Two strategies exist: embed full strategy data (`Heavy`) or pass only
/// identifiers and re-fetch at execution time (`JustInTime`). One mode is
/// chosen at configuration load and used for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode")]
pub enum DispatchPayload {
    #[serde(rename = "heavy")]
    Heavy { strategies: Vec<Strategy> },
    #[serde(rename = "jit")]
    JustInTime { strategy_ids: Vec<String> },
}

impl DispatchPayload {
    pub fn len(&self) -> usize {
        match self {
            DispatchPayload::Heavy { strategies } => strategies.len(),
            DispatchPayload::JustInTime { strategy_ids } => strategy_ids.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Which payload strategy the pipeline uses. Chosen once at configuration
/// load; the two modes are never mixed within one pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayloadMode {
    /// Embed full strategy data in dispatch messages. Larger messages, no
    /// re-fetch at execution time.
    #[serde(rename = "heavy")]
    Heavy,
    /// Pass only identifiers and re-fetch at execution time. One extra
    /// lookup buys guaranteed data freshness and smaller messages.
    #[serde(rename = "jit")]
    JustInTime,
}

/// One validated request handed to the timed-workflow collaborator:
/// sleep `wait_seconds`, then execute the payload's strategies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatchRequest {
    pub owner_id: String,
    /// The group's shared execution time, `HH:MM`.
    pub execution_time: String,
    /// Strictly positive whole seconds the workflow must wait.
    pub wait_seconds: i64,
    pub priority: MarketPhase,
    pub payload: DispatchPayload,
}
