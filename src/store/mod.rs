//! Durable-tier interfaces.
//!
//! The store is the system of record. Records are addressed by their
//! primary-key tuple and are spread over a 64-bit token space (the entity's
//! cache key), which bulk loads scan in half-open ranges.

mod memory;

use async_trait::async_trait;

pub use memory::{MemoryStore, StoreStats};

use crate::key::KeyValue;

/// Receives rows streamed out of the store by [`PersistentStore::load`].
#[async_trait]
pub trait RowConsumer<T>: Send + Sync {
    async fn accept(&self, row: T) -> anyhow::Result<()>;
}

/// Async CRUD against durable storage.
#[async_trait]
pub trait PersistentStore<T: Send + Sync + 'static>: Send + Sync + 'static {
    /// Find a record by its ordered primary-key values.
    async fn find_one(&self, keys: &[KeyValue]) -> anyhow::Result<Option<T>>;

    /// Insert or replace a record. Returns whether the write was applied.
    async fn save(&self, entity: &T) -> anyhow::Result<bool>;

    /// Delete a record. Returns whether a record was deleted.
    async fn remove(&self, entity: &T) -> anyhow::Result<bool>;

    /// Stream every record with a token in `[start_token, end_token)` to
    /// `consumer`, returning how many rows were streamed.
    async fn load(
        &self,
        start_token: i64,
        end_token: i64,
        consumer: &dyn RowConsumer<T>,
    ) -> anyhow::Result<u64>;
}
