//! Keyed lookup store boundary.
//!
//! Traits for the external store plus two implementations: a SQLite-backed
//! store for real runs and an in-memory fake with failure injection for
//! tests.
//!
//! Every call across this boundary is bounded by a caller-side deadline
//! ([`with_deadline`]); a hung store lookup costs one minute or one
//! strategy, never a whole cycle.

mod memory;
mod sqlite;
mod traits;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;
pub use traits::{ExecutionStore, ScheduleStore};

use crate::error::SchedulerError;
use std::future::Future;
use std::time::Duration;

/// Default per-call budget for store operations.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound one store call to `budget`. Elapse maps to a retryable
/// [`SchedulerError::TransientLookup`], so callers treat a hung store the
/// same way as a throttled one.
pub async fn with_deadline<T, F>(budget: Duration, op: &str, fut: F) -> Result<T, SchedulerError>
where
    F: Future<Output = Result<T, SchedulerError>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(SchedulerError::TransientLookup(format!(
            "{op} timed out after {budget:?}"
        ))),
    }
}
