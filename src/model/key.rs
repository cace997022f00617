//! Typed schedule index key.
//!
//! The store sorts index rows by a composite string key of the form
//! `{type}#{weekday}#{time}#{strategy_id}`, which makes all strategies due
//! at one minute a contiguous range. The shape lives here as a documented
//! formatter/parser pair rather than ad hoc string splitting, so any drift
//! in the key layout fails loudly at the boundary.

use crate::error::SchedulerError;
use crate::model::{ExecutionType, WeekdayCode};
use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use std::fmt;

const SEPARATOR: char = '#';

/// Strict `HH:MM` parse, minute resolution. Rejects seconds, single-digit
/// hours, and trailing garbage.
pub fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    if s.len() != 5 || s.as_bytes()[2] != b':' {
        return None;
    }
    NaiveTime::parse_from_str(s, "%H:%M").ok()
}

/// Sortable composite key for one schedule index row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ScheduleKey {
    pub execution_type: ExecutionType,
    pub weekday: WeekdayCode,
    /// `HH:MM`, minute resolution.
    pub time: String,
    pub strategy_id: String,
}

impl ScheduleKey {
    /// Build a key, validating the time token.
    pub fn new(
        execution_type: ExecutionType,
        weekday: WeekdayCode,
        time: &str,
        strategy_id: &str,
    ) -> Result<Self, SchedulerError> {
        if parse_hhmm(time).is_none() {
            return Err(SchedulerError::Validation(format!(
                "schedule key time must be HH:MM, got {time:?}"
            )));
        }
        if strategy_id.is_empty() || strategy_id.contains(SEPARATOR) {
            return Err(SchedulerError::Validation(format!(
                "invalid strategy id in schedule key: {strategy_id:?}"
            )));
        }
        Ok(Self {
            execution_type,
            weekday,
            time: time.to_string(),
            strategy_id: strategy_id.to_string(),
        })
    }

    /// Wire form: `{type}#{weekday}#{time}#{strategy_id}`.
    pub fn encode(&self) -> String {
        format!(
            "{}{SEPARATOR}{}{SEPARATOR}{}{SEPARATOR}{}",
            self.execution_type, self.weekday, self.time, self.strategy_id
        )
    }

    /// Parse the wire form back into a typed key.
    pub fn decode(raw: &str) -> Result<Self, SchedulerError> {
        let mut parts = raw.splitn(4, SEPARATOR);
        let (Some(ty), Some(day), Some(time), Some(id)) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SchedulerError::Validation(format!(
                "schedule key has too few segments: {raw:?}"
            )));
        };
        let execution_type = ExecutionType::parse(ty).ok_or_else(|| {
            SchedulerError::Validation(format!("unknown execution type in key: {ty:?}"))
        })?;
        let weekday = WeekdayCode::parse(day).ok_or_else(|| {
            SchedulerError::Validation(format!("unknown weekday in key: {day:?}"))
        })?;
        Self::new(execution_type, weekday, time, id)
    }

    /// Range prefix covering every strategy of one type due at one minute:
    /// `{type}#{weekday}#{time}#`.
    pub fn minute_prefix(execution_type: ExecutionType, weekday: WeekdayCode, time: &str) -> String {
        format!("{execution_type}{SEPARATOR}{weekday}{SEPARATOR}{time}{SEPARATOR}")
    }
}

impl fmt::Display for ScheduleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_roundtrip() {
        let key = ScheduleKey::new(
            ExecutionType::Entry,
            WeekdayCode::Mon,
            "09:30",
            "strat-42",
        )
        .unwrap();
        assert_eq!(key.encode(), "ENTRY#MON#09:30#strat-42");
        assert_eq!(ScheduleKey::decode("ENTRY#MON#09:30#strat-42").unwrap(), key);
    }

    #[test]
    fn test_minute_prefix_matches_encoded_keys() {
        let key = ScheduleKey::new(ExecutionType::Exit, WeekdayCode::Fri, "15:25", "s9").unwrap();
        let prefix = ScheduleKey::minute_prefix(ExecutionType::Exit, WeekdayCode::Fri, "15:25");
        assert!(key.encode().starts_with(&prefix));
    }

    #[test]
    fn test_decode_rejects_malformed_keys() {
        assert!(ScheduleKey::decode("ENTRY#MON#09:30").is_err());
        assert!(ScheduleKey::decode("LIMIT#MON#09:30#s1").is_err());
        assert!(ScheduleKey::decode("ENTRY#MONDAY#09:30#s1").is_err());
        assert!(ScheduleKey::decode("ENTRY#MON#9:30#s1").is_err());
    }

    #[test]
    fn test_new_rejects_bad_time_and_id() {
        assert!(ScheduleKey::new(ExecutionType::Entry, WeekdayCode::Mon, "09:30:00", "s1").is_err());
        assert!(ScheduleKey::new(ExecutionType::Entry, WeekdayCode::Mon, "25:00", "s1").is_err());
        assert!(ScheduleKey::new(ExecutionType::Entry, WeekdayCode::Mon, "09:30", "a#b").is_err());
        assert!(ScheduleKey::new(ExecutionType::Entry, WeekdayCode::Mon, "09:30", "").is_err());
    }

    #[test]
    fn test_parse_hhmm_strictness() {
        assert!(parse_hhmm("09:30").is_some());
        assert!(parse_hhmm("00:00").is_some());
        assert!(parse_hhmm("23:59").is_some());
        assert!(parse_hhmm("9:30").is_none());
        assert!(parse_hhmm("09:30:00").is_none());
        assert!(parse_hhmm("0930").is_none());
        assert!(parse_hhmm("24:00").is_none());
    }

    #[test]
    fn test_keys_sort_by_time_within_one_day() {
        let early = ScheduleKey::new(ExecutionType::Entry, WeekdayCode::Mon, "09:30", "z").unwrap();
        let late = ScheduleKey::new(ExecutionType::Entry, WeekdayCode::Mon, "15:25", "a").unwrap();
        assert!(early.encode() < late.encode());
    }
}
