//! In-memory store fake for tests and local runs.
//!
//! Mirrors the sorted-key semantics of the production store with a
//! `BTreeMap` keyed on the encoded schedule key, and supports injectable
//! per-minute lookup failures so discovery's partial-failure isolation can
//! be exercised.

use crate::error::SchedulerError;
use crate::model::{
    ExecutionRecord, ExecutionStatus, ScheduleEntry, ScheduleKey, Strategy, StrategyStatus,
    WeekdayCode,
};
use crate::store::{ExecutionStore, ScheduleStore};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryState {
    /// (owner_id, strategy_id) -> strategy
    strategies: HashMap<(String, String), Strategy>,
    /// (owner_id, encoded sort key) -> strategy_id
    entries: BTreeMap<(String, String), String>,
    /// execution_id -> record
    records: HashMap<String, ExecutionRecord>,
}

/// In-memory implementation of both store traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
    /// `"{weekday}#{time}"` minute lookups that fail with a transient error.
    failing_minutes: RwLock<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `strategies_due` call for `(weekday, time)` fail with a
    /// transient lookup error.
    pub async fn fail_minute(&self, weekday: WeekdayCode, time: &str) {
        self.failing_minutes
            .write()
            .await
            .insert(format!("{weekday}#{time}"));
    }

    pub async fn clear_failures(&self) {
        self.failing_minutes.write().await.clear();
    }

    pub async fn record_count(&self) -> usize {
        self.state.read().await.records.len()
    }

    fn index_keys(strategy: &Strategy) -> Result<Vec<ScheduleKey>, SchedulerError> {
        strategy
            .weekdays
            .iter()
            .map(|weekday| {
                ScheduleKey::new(
                    strategy.execution_type,
                    *weekday,
                    &strategy.execution_time,
                    &strategy.strategy_id,
                )
            })
            .collect()
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn put_strategy(&self, strategy: &Strategy) -> Result<(), SchedulerError> {
        let keys = Self::index_keys(strategy)?;
        let mut state = self.state.write().await;
        let owner = strategy.owner_id.clone();
        state
            .entries
            .retain(|(o, _), sid| !(*o == owner && *sid == strategy.strategy_id));
        for key in keys {
            state.entries.insert(
                (owner.clone(), key.encode()),
                strategy.strategy_id.clone(),
            );
        }
        state.strategies.insert(
            (owner, strategy.strategy_id.clone()),
            strategy.clone(),
        );
        Ok(())
    }

    async fn deactivate_strategy(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        state
            .entries
            .retain(|(o, _), sid| !(o == owner_id && sid == strategy_id));
        if let Some(strategy) = state
            .strategies
            .get_mut(&(owner_id.to_string(), strategy_id.to_string()))
        {
            strategy.status = StrategyStatus::Inactive;
        }
        Ok(())
    }

    async fn get_strategy(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<Option<Strategy>, SchedulerError> {
        Ok(self
            .state
            .read()
            .await
            .strategies
            .get(&(owner_id.to_string(), strategy_id.to_string()))
            .cloned())
    }

    async fn strategies_due(
        &self,
        owner_id: &str,
        weekday: WeekdayCode,
        time: &str,
    ) -> Result<Vec<Strategy>, SchedulerError> {
        if self
            .failing_minutes
            .read()
            .await
            .contains(&format!("{weekday}#{time}"))
        {
            return Err(SchedulerError::TransientLookup(format!(
                "injected failure for {weekday} {time}"
            )));
        }

        let state = self.state.read().await;
        let mut out = Vec::new();
        for (key, strategy_id) in state.entries.iter().filter_map(|((o, k), sid)| {
            (o == owner_id).then_some((k, sid))
        }) {
            let decoded = ScheduleKey::decode(key)?;
            if decoded.weekday != weekday || decoded.time != time {
                continue;
            }
            if let Some(strategy) = state
                .strategies
                .get(&(owner_id.to_string(), strategy_id.clone()))
            {
                if strategy.status == StrategyStatus::Active {
                    out.push(strategy.clone());
                }
            }
        }
        Ok(out)
    }

    async fn schedule_entries(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<Vec<ScheduleEntry>, SchedulerError> {
        let state = self.state.read().await;
        let mut out = Vec::new();
        for ((o, key), sid) in state.entries.iter() {
            if o == owner_id && sid == strategy_id {
                out.push(ScheduleEntry {
                    owner_id: owner_id.to_string(),
                    key: ScheduleKey::decode(key)?,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn create_if_absent(&self, record: &ExecutionRecord) -> Result<bool, SchedulerError> {
        let mut state = self.state.write().await;
        if state.records.contains_key(&record.execution_id) {
            return Ok(false);
        }
        state
            .records
            .insert(record.execution_id.clone(), record.clone());
        Ok(true)
    }

    async fn get_record(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, SchedulerError> {
        Ok(self.state.read().await.records.get(execution_id).cloned())
    }

    async fn finalize_record(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        note: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let mut state = self.state.write().await;
        let record = state.records.get_mut(execution_id).ok_or_else(|| {
            SchedulerError::Validation(format!("no execution record {execution_id}"))
        })?;
        record.status = status;
        record.completed_at = Some(Utc::now());
        if let Some(note) = note {
            record.note = Some(note.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionType, LegDefinition, OrderSide};

    fn test_strategy(id: &str, time: &str, weekdays: &[WeekdayCode]) -> Strategy {
        Strategy {
            strategy_id: id.to_string(),
            owner_id: "owner-1".to_string(),
            execution_time: time.to_string(),
            execution_type: ExecutionType::Entry,
            weekdays: weekdays.iter().copied().collect(),
            legs: vec![LegDefinition {
                leg_id: 1,
                instrument: "NIFTY-FUT".to_string(),
                side: OrderSide::Buy,
                lots: 4,
                strike: None,
                premium_cap: None,
            }],
            underlying: "NIFTY".to_string(),
            status: StrategyStatus::Active,
        }
    }

    #[tokio::test]
    async fn test_index_mirrors_weekday_set() {
        let store = MemoryStore::new();
        let mut strategy = test_strategy("s1", "09:30", &[WeekdayCode::Mon, WeekdayCode::Wed]);
        store.put_strategy(&strategy).await.unwrap();
        assert_eq!(store.schedule_entries("owner-1", "s1").await.unwrap().len(), 2);

        // Narrowing the weekday set must delete the stale Wednesday entry.
        strategy.weekdays = [WeekdayCode::Mon].into_iter().collect();
        store.put_strategy(&strategy).await.unwrap();
        let entries = store.schedule_entries("owner-1", "s1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key.weekday, WeekdayCode::Mon);
    }

    #[tokio::test]
    async fn test_due_lookup_filters_inactive() {
        let store = MemoryStore::new();
        store
            .put_strategy(&test_strategy("s1", "09:30", &[WeekdayCode::Mon]))
            .await
            .unwrap();
        store
            .put_strategy(&test_strategy("s2", "09:30", &[WeekdayCode::Mon]))
            .await
            .unwrap();
        store.deactivate_strategy("owner-1", "s2").await.unwrap();

        let due = store
            .strategies_due("owner-1", WeekdayCode::Mon, "09:30")
            .await
            .unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].strategy_id, "s1");
    }

    #[tokio::test]
    async fn test_injected_minute_failure() {
        let store = MemoryStore::new();
        store.fail_minute(WeekdayCode::Mon, "09:30").await;
        let err = store
            .strategies_due("owner-1", WeekdayCode::Mon, "09:30")
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_conditional_record_create() {
        let store = MemoryStore::new();
        let record = ExecutionRecord {
            execution_id: "abc".to_string(),
            owner_id: "owner-1".to_string(),
            strategy_id: "s1".to_string(),
            execution_time: "09:30".to_string(),
            status: ExecutionStatus::Success,
            allocations: vec![],
            remainder: 0,
            requested_at: Utc::now(),
            completed_at: None,
            note: None,
        };
        assert!(store.create_if_absent(&record).await.unwrap());
        assert!(!store.create_if_absent(&record).await.unwrap());
        assert_eq!(store.record_count().await, 1);
    }
}
