//! One unit of bulk-load work: a single token range.

use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Context;
use async_trait::async_trait;
use tracing::debug;

use super::TokenRange;
use crate::cache::CacheGrid;
use crate::entity::Cacheable;
use crate::key;
use crate::store::{PersistentStore, RowConsumer};

/// Loads every record in one token range into a grid map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTask {
    pub range: TokenRange,
    pub map_name: String,
}

impl LoadTask {
    pub fn new(range: TokenRange, map_name: impl Into<String>) -> Self {
        Self {
            range,
            map_name: map_name.into(),
        }
    }

    /// Stream the range out of `store` into `map`, returning the row count.
    pub async fn run<T, M, S>(self, map: M, store: Arc<S>) -> anyhow::Result<u64>
    where
        T: Cacheable,
        M: CacheGrid<T>,
        S: PersistentStore<T>,
    {
        let consumer = GridLoadConsumer::new(map);

        let count = store
            .load(self.range.start(), self.range.end(), &consumer)
            .await
            .with_context(|| format!("loading {} into {}", self.range, self.map_name))?;

        debug!(
            "Loaded {} rows of {} {} into {}",
            count,
            T::ENTITY_NAME,
            self.range,
            self.map_name
        );
        Ok(count)
    }
}

/// Puts each streamed row into a grid map under its cache key.
pub struct GridLoadConsumer<T, M> {
    map: M,
    inserted: AtomicU64,
    _entity: PhantomData<fn() -> T>,
}

impl<T, M> GridLoadConsumer<T, M>
where
    T: Cacheable,
    M: CacheGrid<T>,
{
    pub fn new(map: M) -> Self {
        Self {
            map,
            inserted: AtomicU64::new(0),
            _entity: PhantomData,
        }
    }

    pub fn inserted(&self) -> u64 {
        self.inserted.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<T, M> RowConsumer<T> for GridLoadConsumer<T, M>
where
    T: Cacheable,
    M: CacheGrid<T>,
{
    async fn accept(&self, mut row: T) -> anyhow::Result<()> {
        let cache_key = match row.cache_key() {
            Some(key) => key,
            None => {
                let key = key::derive_key(&row.primary_key_values())
                    .with_context(|| format!("can't build cache key for {}", T::ENTITY_NAME))?;
                row.set_cache_key(key);
                key
            }
        };

        self.map.put(cache_key, row).await?;
        self.inserted.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
