//! Cache grid interfaces and the in-process grid.
//!
//! The grid is a set of named key-value maps keyed by [`CacheKey`]. It is
//! never the system of record: a missing entry is a miss, not an error.
//!
//! ## Architecture
//!
//! - [`CacheGrid`] - One map: get/put/remove plus per-key entry processors
//! - [`ReplaceEntry`] / [`InsertIfAbsent`] - Write and refill processors
//! - [`GridInstance`] - Hands out maps by name and holds their configuration
//! - [`LocalGrid`] / [`LocalMap`] - In-process implementation over Moka
//!
//! ## Usage
//!
//! ```rust,ignore
//! let grid = LocalGrid::new();
//! grid.configure_map("accounts", MapConfig::with_capacity(50_000));
//!
//! let accounts: LocalMap<Account> = grid.map("accounts")?;
//! accounts.submit_to_key(key, ReplaceEntry::new(account)).await?;
//! ```

mod config;
mod grid;
mod map;

use async_trait::async_trait;

pub use config::{EvictionPolicy, InMemoryFormat, MapConfig};
pub use grid::LocalGrid;
pub use map::LocalMap;

use crate::key::CacheKey;

/// A function run by the grid against a single entry.
///
/// The grid runs at most one processor per key at a time, so `process` sees
/// and leaves the entry without interleaving writes from other processors.
/// Setting the entry to `None` removes it.
pub trait EntryProcessor<V>: Send + 'static {
    type Output: Send + 'static;

    fn process(self, entry: &mut Option<V>) -> Self::Output;
}

/// Replaces the entry's value with a new one.
#[derive(Debug, Clone)]
pub struct ReplaceEntry<V>(V);

impl<V> ReplaceEntry<V> {
    pub fn new(value: V) -> Self {
        Self(value)
    }
}

impl<V: Send + 'static> EntryProcessor<V> for ReplaceEntry<V> {
    type Output = bool;

    fn process(self, entry: &mut Option<V>) -> bool {
        *entry = Some(self.0);
        true
    }
}

/// Inserts a value only if the entry is empty.
///
/// Used for read-through refills so a concurrent write through
/// [`ReplaceEntry`] is never overwritten by an older store read.
#[derive(Debug, Clone)]
pub struct InsertIfAbsent<V>(V);

impl<V> InsertIfAbsent<V> {
    pub fn new(value: V) -> Self {
        Self(value)
    }
}

impl<V: Send + 'static> EntryProcessor<V> for InsertIfAbsent<V> {
    /// Whether the value was inserted.
    type Output = bool;

    fn process(self, entry: &mut Option<V>) -> bool {
        if entry.is_some() {
            return false;
        }
        *entry = Some(self.0);
        true
    }
}

/// A single map in the cache grid.
#[async_trait]
pub trait CacheGrid<V: Send + Sync + 'static>: Send + Sync + 'static {
    /// Name of the map.
    fn name(&self) -> &str;

    async fn get(&self, key: CacheKey) -> anyhow::Result<Option<V>>;

    async fn put(&self, key: CacheKey, value: V) -> anyhow::Result<()>;

    /// Remove the entry, returning the previous value if there was one.
    async fn remove(&self, key: CacheKey) -> anyhow::Result<Option<V>>;

    /// Run `processor` against the entry for `key`, serialized with every
    /// other processor submitted for the same key.
    async fn submit_to_key<P>(&self, key: CacheKey, processor: P) -> anyhow::Result<P::Output>
    where
        P: EntryProcessor<V>;
}

/// A grid: named maps plus their administrative configuration.
pub trait GridInstance: Send + Sync + 'static {
    type Map<V: Clone + Send + Sync + 'static>: CacheGrid<V> + Clone;

    /// Set the configuration for a map.
    ///
    /// Takes effect when the map is first created. Returns `false` if the map
    /// already exists, in which case it keeps its current settings.
    fn configure_map(&self, name: &str, config: MapConfig) -> bool;

    /// Get a map by name, creating it on first use.
    fn map<V: Clone + Send + Sync + 'static>(&self, name: &str) -> anyhow::Result<Self::Map<V>>;
}
