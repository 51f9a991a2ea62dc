//! In-process grid map backed by Moka.

use std::sync::Arc;

use async_trait::async_trait;
use moka::ops::compute::Op;
use moka::sync::Cache;
use tracing::debug;

use super::{CacheGrid, EntryProcessor, InMemoryFormat, MapConfig};
use crate::key::CacheKey;

/// A named grid map holding values of one type.
///
/// This map is:
/// - Thread-safe and clone-friendly (clones share the same entries)
/// - Bounded or unbounded, with optional TTL/TTI, per its [`MapConfig`]
/// - Serialized per key for entry processors
pub struct LocalMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    inner: Arc<Cache<CacheKey, V>>,
    name: Arc<str>,
    config: Arc<MapConfig>,
}

// Manual Clone implementation that doesn't require V: Clone
impl<V> Clone for LocalMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
            name: Arc::clone(&self.name),
            config: Arc::clone(&self.config),
        }
    }
}

impl<V> LocalMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    /// Create a new map with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: MapConfig) -> Self {
        let name = name.into();
        let mut builder = Cache::builder().name(&name);

        if let Some(capacity) = config.effective_capacity() {
            builder = builder.max_capacity(capacity);
        }

        if let Some(ttl) = config.ttl {
            builder = builder.time_to_live(ttl);
        }

        if let Some(tti) = config.tti {
            builder = builder.time_to_idle(tti);
        }

        if config.in_memory_format == InMemoryFormat::Binary {
            debug!("Map {} requested binary format; local maps hold objects", name);
        }

        Self {
            inner: Arc::new(builder.build()),
            name,
            config: Arc::new(config),
        }
    }

    pub fn config(&self) -> &MapConfig {
        &self.config
    }

    /// Check if a key exists in the map.
    pub fn contains(&self, key: CacheKey) -> bool {
        self.inner.contains_key(&key)
    }

    /// Get a value without going through the async grid interface.
    pub fn peek(&self, key: CacheKey) -> Option<V> {
        self.inner.get(&key)
    }

    /// Remove all entries from the map.
    pub fn invalidate_all(&self) {
        self.inner.invalidate_all();
        self.inner.run_pending_tasks();
    }

    /// Get the number of entries in the map.
    pub fn entry_count(&self) -> u64 {
        self.inner.run_pending_tasks();
        self.inner.entry_count()
    }
}

#[async_trait]
impl<V> CacheGrid<V> for LocalMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn get(&self, key: CacheKey) -> anyhow::Result<Option<V>> {
        Ok(self.inner.get(&key))
    }

    async fn put(&self, key: CacheKey, value: V) -> anyhow::Result<()> {
        self.inner.insert(key, value);
        Ok(())
    }

    async fn remove(&self, key: CacheKey) -> anyhow::Result<Option<V>> {
        Ok(self.inner.remove(&key))
    }

    async fn submit_to_key<P>(&self, key: CacheKey, processor: P) -> anyhow::Result<P::Output>
    where
        P: EntryProcessor<V>,
    {
        let mut output = None;

        // Moka never runs two compute closures for the same key at once.
        self.inner.entry(key).and_compute_with(|current| {
            let mut slot = current.map(|entry| entry.into_value());
            let existed = slot.is_some();
            output = Some(processor.process(&mut slot));

            match slot {
                Some(value) => Op::Put(value),
                None if existed => Op::Remove,
                None => Op::Nop,
            }
        });

        output.ok_or_else(|| anyhow::anyhow!("entry processor did not run on map {}", self.name))
    }
}

impl<V> std::fmt::Debug for LocalMap<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalMap")
            .field("name", &self.name)
            .field("entry_count", &self.inner.entry_count())
            .finish()
    }
}
