//! Aggregate Store Adapters
//!
//! Implementations of [`AggregateStore`](crate::application::ports::AggregateStore):
//!
//! - `SqliteAggregateStore`: durable, one transaction per merge
//! - `MemoryAggregateStore`: process-local, for tests and throwaway runs

mod memory;
mod sqlite;

use std::sync::Arc;

pub use memory::MemoryAggregateStore;
pub use sqlite::SqliteAggregateStore;

use crate::application::ports::{AggregateStore, StoreError};
use crate::infrastructure::config::StorageSettings;

/// Open the store selected by `settings`.
///
/// # Errors
///
/// Returns `StoreError` if the SQLite database cannot be opened.
pub fn open_store(settings: &StorageSettings) -> Result<Arc<dyn AggregateStore>, StoreError> {
    match settings {
        StorageSettings::Sqlite { path } => Ok(Arc::new(SqliteAggregateStore::open(path)?)),
        StorageSettings::Memory => {
            tracing::warn!("Using in-memory aggregate store; buckets are lost on exit");
            Ok(Arc::new(MemoryAggregateStore::new()))
        }
    }
}
