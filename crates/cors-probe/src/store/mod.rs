//! Append-only log of captured exchanges, keyed by correlation id.
//!
//! Writers (the relay's capture sink) and readers (the evaluator, the settle
//! poller) share one store behind [`SharedStore`]. Implementations must keep
//! per-id insertion order: the evaluator's verdict is taken from the first
//! exchange of a run.

mod memory;
mod sqlite;

use std::sync::Arc;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::config::{StoreConfig, StoreKind};
use crate::error::StoreError;
use crate::model::Exchange;

/// Storage contract consumed by the relay (writer) and evaluator (reader).
///
/// Methods may block; async callers go through the `*_blocking` helpers
/// below, which hop onto the blocking pool.
pub trait ExchangeStore: Send + Sync {
    fn append(&self, correlation_id: &str, exchange: &Exchange) -> Result<(), StoreError>;

    /// All exchanges for `correlation_id` in insertion order. Unknown ids
    /// yield an empty vec.
    fn read_all(&self, correlation_id: &str) -> Result<Vec<Exchange>, StoreError>;

    fn count(&self, correlation_id: &str) -> Result<usize, StoreError>;
}

pub type SharedStore = Arc<dyn ExchangeStore>;

/// Open the store selected by configuration.
pub fn open(config: &StoreConfig) -> Result<SharedStore, StoreError> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Sqlite => Ok(Arc::new(SqliteStore::open(&config.path)?)),
    }
}

pub async fn append_blocking(
    store: SharedStore,
    correlation_id: String,
    exchange: Exchange,
) -> Result<(), StoreError> {
    tokio::task::spawn_blocking(move || store.append(&correlation_id, &exchange)).await?
}

pub async fn read_all_blocking(
    store: SharedStore,
    correlation_id: String,
) -> Result<Vec<Exchange>, StoreError> {
    tokio::task::spawn_blocking(move || store.read_all(&correlation_id)).await?
}

pub async fn count_blocking(store: SharedStore, correlation_id: String) -> Result<usize, StoreError> {
    tokio::task::spawn_blocking(move || store.count(&correlation_id)).await?
}
