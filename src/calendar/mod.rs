//! Trading-day calendar gate.
//!
//! Deterministic, pure logic. No IO, no wall-clock reads. A date is a
//! trading day unless it falls on a weekend or appears in the configured
//! holiday set.
//!
//! The gate is applied twice per cycle: once when filtering schedule index
//! membership and again as a final guard right before dispatch. The two
//! checks can run on different clock reads during a long discovery cycle;
//! when they disagree, the stricter (non-trading) answer wins, which is what
//! re-checking immediately before dispatch achieves.

use chrono::{Datelike, NaiveDate, Weekday};
use std::collections::HashSet;

/// Weekend test independent of any holiday data.
pub fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Holiday-aware trading calendar.
#[derive(Debug, Clone, Default)]
pub struct TradingCalendar {
    holidays: HashSet<NaiveDate>,
}

impl TradingCalendar {
    /// Calendar with no holidays; only the weekend rule applies.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_holidays<I: IntoIterator<Item = NaiveDate>>(holidays: I) -> Self {
        Self {
            holidays: holidays.into_iter().collect(),
        }
    }

    pub fn holiday_count(&self) -> usize {
        self.holidays.len()
    }

    /// Returns false on Saturday, Sunday, or any configured holiday.
    pub fn is_trading_day(&self, date: NaiveDate) -> bool {
        !is_weekend(date) && !self.holidays.contains(&date)
    }
}
