//! SQLite-backed store implementation.
//!
//! Persists strategy definitions, the derived schedule index, and execution
//! records. Decimals and timestamps are stored as TEXT; weekday sets, legs,
//! and allocation lists as JSON. The schedule index lives in its own table
//! keyed `(owner_id, sort_key)` so one minute's strategies are a contiguous
//! prefix range, matching the production keyed-lookup store's access
//! pattern.

use crate::error::SchedulerError;
use crate::model::{
    ExecutionRecord, ExecutionStatus, ExecutionType, ScheduleEntry, ScheduleKey, Strategy,
    StrategyStatus, WeekdayCode,
};
use crate::store::{ExecutionStore, ScheduleStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use tracing::info;

/// SQLite store implementing both schedule and execution persistence.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `db_path` and initialize the schema.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let conn = Connection::open(db_path.as_ref())
            .with_context(|| format!("Failed to open database at {:?}", db_path.as_ref()))?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("Schedule store initialized at {:?}", db_path.as_ref());
        Ok(store)
    }

    /// In-memory database, used by the seed command and tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow::anyhow!("store lock poisoned"))?;
        conn.execute_batch(
            r#"
            -- Strategy definitions (read-only to the scheduler)
            CREATE TABLE IF NOT EXISTS strategies (
                owner_id TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                execution_time TEXT NOT NULL,
                execution_type TEXT NOT NULL,
                weekdays TEXT NOT NULL,
                legs TEXT NOT NULL,
                underlying TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (owner_id, strategy_id)
            );

            -- Derived schedule index: one row per (strategy, weekday, type)
            CREATE TABLE IF NOT EXISTS schedule_entries (
                owner_id TEXT NOT NULL,
                sort_key TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                PRIMARY KEY (owner_id, sort_key)
            );

            -- Idempotent execution records
            CREATE TABLE IF NOT EXISTS execution_records (
                execution_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                strategy_id TEXT NOT NULL,
                execution_time TEXT NOT NULL,
                status TEXT NOT NULL,
                allocations TEXT NOT NULL,
                remainder INTEGER NOT NULL,
                requested_at TEXT NOT NULL,
                completed_at TEXT,
                note TEXT
            );
            "#,
        )
        .context("Failed to initialize schema")?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, SchedulerError> {
        self.conn
            .lock()
            .map_err(|_| SchedulerError::TransientLookup("store lock poisoned".into()))
    }
}

fn sql_err(e: rusqlite::Error) -> SchedulerError {
    SchedulerError::TransientLookup(e.to_string())
}

fn json_err(e: serde_json::Error) -> SchedulerError {
    SchedulerError::Validation(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, SchedulerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| SchedulerError::Validation(format!("bad timestamp {raw:?}: {e}")))
}

// Two-stage reads: the rusqlite closure only extracts raw TEXT columns, so
// decode failures surface as validation errors instead of being coerced to
// a default. A strategy whose stored type or status text is damaged must be
// rejected, never silently executed as something else.

struct StrategyRow {
    owner_id: String,
    strategy_id: String,
    execution_time: String,
    execution_type: String,
    weekdays: String,
    legs: String,
    underlying: String,
    status: String,
}

fn row_to_strategy(row: &rusqlite::Row<'_>) -> rusqlite::Result<StrategyRow> {
    Ok(StrategyRow {
        owner_id: row.get("owner_id")?,
        strategy_id: row.get("strategy_id")?,
        execution_time: row.get("execution_time")?,
        execution_type: row.get("execution_type")?,
        weekdays: row.get("weekdays")?,
        legs: row.get("legs")?,
        underlying: row.get("underlying")?,
        status: row.get("status")?,
    })
}

fn hydrate_strategy(row: StrategyRow) -> Result<Strategy, SchedulerError> {
    let execution_type = ExecutionType::parse(&row.execution_type).ok_or_else(|| {
        SchedulerError::Validation(format!(
            "corrupt execution type {:?} for strategy {}",
            row.execution_type, row.strategy_id
        ))
    })?;
    let status = StrategyStatus::parse(&row.status).ok_or_else(|| {
        SchedulerError::Validation(format!(
            "corrupt status {:?} for strategy {}",
            row.status, row.strategy_id
        ))
    })?;
    Ok(Strategy {
        owner_id: row.owner_id,
        strategy_id: row.strategy_id,
        execution_time: row.execution_time,
        execution_type,
        weekdays: serde_json::from_str(&row.weekdays).map_err(json_err)?,
        legs: serde_json::from_str(&row.legs).map_err(json_err)?,
        underlying: row.underlying,
        status,
    })
}

struct RecordRow {
    execution_id: String,
    owner_id: String,
    strategy_id: String,
    execution_time: String,
    status: String,
    allocations: String,
    remainder: u32,
    requested_at: String,
    completed_at: Option<String>,
    note: Option<String>,
}

fn hydrate_record(row: RecordRow) -> Result<ExecutionRecord, SchedulerError> {
    let status = ExecutionStatus::parse(&row.status).ok_or_else(|| {
        SchedulerError::Validation(format!(
            "corrupt status {:?} for execution record {}",
            row.status, row.execution_id
        ))
    })?;
    Ok(ExecutionRecord {
        execution_id: row.execution_id,
        owner_id: row.owner_id,
        strategy_id: row.strategy_id,
        execution_time: row.execution_time,
        status,
        allocations: serde_json::from_str(&row.allocations).map_err(json_err)?,
        remainder: row.remainder,
        requested_at: parse_timestamp(&row.requested_at)?,
        completed_at: row
            .completed_at
            .as_deref()
            .map(parse_timestamp)
            .transpose()?,
        note: row.note,
    })
}

#[async_trait]
impl ScheduleStore for SqliteStore {
    async fn put_strategy(&self, strategy: &Strategy) -> Result<(), SchedulerError> {
        let keys: Vec<ScheduleKey> = strategy
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
            .collect::<Result<_, _>>()?;
        let weekdays_json = serde_json::to_string(&strategy.weekdays).map_err(json_err)?;
        let legs_json = serde_json::to_string(&strategy.legs).map_err(json_err)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute(
            r#"
            INSERT INTO strategies
                (owner_id, strategy_id, execution_time, execution_type,
                 weekdays, legs, underlying, status)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (owner_id, strategy_id) DO UPDATE SET
                execution_time = excluded.execution_time,
                execution_type = excluded.execution_type,
                weekdays = excluded.weekdays,
                legs = excluded.legs,
                underlying = excluded.underlying,
                status = excluded.status
            "#,
            params![
                strategy.owner_id,
                strategy.strategy_id,
                strategy.execution_time,
                strategy.execution_type.as_str(),
                weekdays_json,
                legs_json,
                strategy.underlying,
                strategy.status.as_str(),
            ],
        )
        .map_err(sql_err)?;

        // Replace the full index set so stale entries cannot survive a
        // weekday or time change.
        tx.execute(
            "DELETE FROM schedule_entries WHERE owner_id = ?1 AND strategy_id = ?2",
            params![strategy.owner_id, strategy.strategy_id],
        )
        .map_err(sql_err)?;
        for key in &keys {
            tx.execute(
                "INSERT INTO schedule_entries (owner_id, sort_key, strategy_id) VALUES (?1, ?2, ?3)",
                params![strategy.owner_id, key.encode(), strategy.strategy_id],
            )
            .map_err(sql_err)?;
        }
        tx.commit().map_err(sql_err)
    }

    async fn deactivate_strategy(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<(), SchedulerError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction().map_err(sql_err)?;
        tx.execute(
            "UPDATE strategies SET status = 'INACTIVE' WHERE owner_id = ?1 AND strategy_id = ?2",
            params![owner_id, strategy_id],
        )
        .map_err(sql_err)?;
        tx.execute(
            "DELETE FROM schedule_entries WHERE owner_id = ?1 AND strategy_id = ?2",
            params![owner_id, strategy_id],
        )
        .map_err(sql_err)?;
        tx.commit().map_err(sql_err)
    }

    async fn get_strategy(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<Option<Strategy>, SchedulerError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT * FROM strategies WHERE owner_id = ?1 AND strategy_id = ?2",
                params![owner_id, strategy_id],
                row_to_strategy,
            )
            .optional()
            .map_err(sql_err)?;
        raw.map(hydrate_strategy).transpose()
    }

    async fn strategies_due(
        &self,
        owner_id: &str,
        weekday: WeekdayCode,
        time: &str,
    ) -> Result<Vec<Strategy>, SchedulerError> {
        let entry_prefix = ScheduleKey::minute_prefix(ExecutionType::Entry, weekday, time);
        let exit_prefix = ScheduleKey::minute_prefix(ExecutionType::Exit, weekday, time);

        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                r#"
                SELECT s.*, e.sort_key FROM schedule_entries e
                JOIN strategies s
                  ON s.owner_id = e.owner_id AND s.strategy_id = e.strategy_id
                WHERE e.owner_id = ?1
                  AND (e.sort_key LIKE ?2 OR e.sort_key LIKE ?3)
                  AND s.status = 'ACTIVE'
                ORDER BY e.sort_key
                "#,
            )
            .map_err(sql_err)?;
        let rows = stmt
            .query_map(
                params![
                    owner_id,
                    format!("{entry_prefix}%"),
                    format!("{exit_prefix}%"),
                ],
                row_to_strategy,
            )
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        rows.into_iter().map(hydrate_strategy).collect()
    }

    async fn schedule_entries(
        &self,
        owner_id: &str,
        strategy_id: &str,
    ) -> Result<Vec<ScheduleEntry>, SchedulerError> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(
                "SELECT sort_key FROM schedule_entries
                 WHERE owner_id = ?1 AND strategy_id = ?2 ORDER BY sort_key",
            )
            .map_err(sql_err)?;
        let keys = stmt
            .query_map(params![owner_id, strategy_id], |row| {
                row.get::<_, String>(0)
            })
            .map_err(sql_err)?
            .collect::<rusqlite::Result<Vec<_>>>()
            .map_err(sql_err)?;
        keys.into_iter()
            .map(|raw| {
                Ok(ScheduleEntry {
                    owner_id: owner_id.to_string(),
                    key: ScheduleKey::decode(&raw)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ExecutionStore for SqliteStore {
    async fn create_if_absent(&self, record: &ExecutionRecord) -> Result<bool, SchedulerError> {
        let allocations_json = serde_json::to_string(&record.allocations).map_err(json_err)?;
        let conn = self.lock()?;
        let changed = conn
            .execute(
                r#"
                INSERT INTO execution_records
                    (execution_id, owner_id, strategy_id, execution_time, status,
                     allocations, remainder, requested_at, completed_at, note)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                ON CONFLICT (execution_id) DO NOTHING
                "#,
                params![
                    record.execution_id,
                    record.owner_id,
                    record.strategy_id,
                    record.execution_time,
                    record.status.as_str(),
                    allocations_json,
                    record.remainder,
                    record.requested_at.to_rfc3339(),
                    record.completed_at.map(|t| t.to_rfc3339()),
                    record.note,
                ],
            )
            .map_err(sql_err)?;
        Ok(changed == 1)
    }

    async fn get_record(
        &self,
        execution_id: &str,
    ) -> Result<Option<ExecutionRecord>, SchedulerError> {
        let conn = self.lock()?;
        let raw = conn
            .query_row(
                "SELECT * FROM execution_records WHERE execution_id = ?1",
                params![execution_id],
                |row| {
                    Ok(RecordRow {
                        execution_id: row.get("execution_id")?,
                        owner_id: row.get("owner_id")?,
                        strategy_id: row.get("strategy_id")?,
                        execution_time: row.get("execution_time")?,
                        status: row.get("status")?,
                        allocations: row.get("allocations")?,
                        remainder: row.get("remainder")?,
                        requested_at: row.get("requested_at")?,
                        completed_at: row.get("completed_at")?,
                        note: row.get("note")?,
                    })
                },
            )
            .optional()
            .map_err(sql_err)?;
        raw.map(hydrate_record).transpose()
    }

    async fn finalize_record(
        &self,
        execution_id: &str,
        status: ExecutionStatus,
        note: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let conn = self.lock()?;
        let changed = conn
            .execute(
                r#"
                UPDATE execution_records
                SET status = ?2, completed_at = ?3, note = COALESCE(?4, note)
                WHERE execution_id = ?1
                "#,
                params![
                    execution_id,
                    status.as_str(),
                    Utc::now().to_rfc3339(),
                    note,
                ],
            )
            .map_err(sql_err)?;
        if changed == 0 {
            return Err(SchedulerError::Validation(format!(
                "no execution record {execution_id}"
            )));
        }
        Ok(())
    }
}
