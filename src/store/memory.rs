//! In-process store.
//!
//! Holds records in a `DashMap` keyed by cache key. Useful for embedding,
//! warm-up dry runs and tests; it is not durable.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use super::{PersistentStore, RowConsumer};
use crate::entity::Cacheable;
use crate::key::{self, CacheKey, KeyValue};

/// In-memory store for any [`Cacheable`] entity.
pub struct MemoryStore<T: Cacheable> {
    rows: DashMap<CacheKey, T>,
    stats: Arc<Counters>,
}

#[derive(Default)]
struct Counters {
    finds: AtomicU64,
    saves: AtomicU64,
    removes: AtomicU64,
    loads: AtomicU64,
}

/// Call counts for a [`MemoryStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub finds: u64,
    pub saves: u64,
    pub removes: u64,
    pub loads: u64,
}

impl<T: Cacheable> MemoryStore<T> {
    pub fn new() -> Self {
        Self {
            rows: DashMap::new(),
            stats: Arc::new(Counters::default()),
        }
    }

    /// Insert rows directly, bypassing the call counters.
    pub fn seed(&self, rows: impl IntoIterator<Item = T>) -> anyhow::Result<()> {
        for row in rows {
            let key = Self::key_of(&row)?;
            self.rows.insert(key, row);
        }
        Ok(())
    }

    /// Read a row directly, bypassing the call counters.
    pub fn peek(&self, keys: &[KeyValue]) -> anyhow::Result<Option<T>> {
        let key = key::derive_key(keys).context("can't derive store key")?;
        Ok(self.rows.get(&key).map(|row| row.clone()))
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            finds: self.stats.finds.load(Ordering::Relaxed),
            saves: self.stats.saves.load(Ordering::Relaxed),
            removes: self.stats.removes.load(Ordering::Relaxed),
            loads: self.stats.loads.load(Ordering::Relaxed),
        }
    }

    fn key_of(row: &T) -> anyhow::Result<CacheKey> {
        match row.cache_key() {
            Some(key) => Ok(key),
            None => key::derive_key(&row.primary_key_values())
                .with_context(|| format!("can't derive store key for {}", T::ENTITY_NAME)),
        }
    }
}

impl<T: Cacheable> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Cacheable> PersistentStore<T> for MemoryStore<T> {
    async fn find_one(&self, keys: &[KeyValue]) -> anyhow::Result<Option<T>> {
        self.stats.finds.fetch_add(1, Ordering::Relaxed);
        self.peek(keys)
    }

    async fn save(&self, entity: &T) -> anyhow::Result<bool> {
        self.stats.saves.fetch_add(1, Ordering::Relaxed);
        let key = Self::key_of(entity)?;
        self.rows.insert(key, entity.clone());
        debug!("Saved {} {}", T::ENTITY_NAME, key);
        Ok(true)
    }

    async fn remove(&self, entity: &T) -> anyhow::Result<bool> {
        self.stats.removes.fetch_add(1, Ordering::Relaxed);
        let key = Self::key_of(entity)?;
        let removed = self.rows.remove(&key).is_some();
        debug!("Removed {} {}: {}", T::ENTITY_NAME, key, removed);
        Ok(removed)
    }

    async fn load(
        &self,
        start_token: i64,
        end_token: i64,
        consumer: &dyn RowConsumer<T>,
    ) -> anyhow::Result<u64> {
        self.stats.loads.fetch_add(1, Ordering::Relaxed);

        // Snapshot first: DashMap guards must not be held across an await.
        let rows: Vec<T> = self
            .rows
            .iter()
            .filter(|row| (start_token..end_token).contains(&row.key().token()))
            .map(|row| row.value().clone())
            .collect();

        let mut count = 0;
        for row in rows {
            consumer.accept(row).await?;
            count += 1;
        }

        debug!(
            "Loaded {} {} rows in [{}, {})",
            count,
            T::ENTITY_NAME,
            start_token,
            end_token
        );
        Ok(count)
    }
}
