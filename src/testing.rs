//! Shared fixtures for unit tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::bail;
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cache::{CacheGrid, EntryProcessor, LocalMap};
use crate::entity::Cacheable;
use crate::key::{CacheKey, KeyValue};
use crate::listener::EntryListener;
use crate::store::{MemoryStore, PersistentStore, RowConsumer};

#[derive(Debug, Clone, PartialEq)]
pub struct Account {
    pub tenant: i64,
    pub login: String,
    pub balance: i64,
    pub cache_key: Option<CacheKey>,
}

impl Cacheable for Account {
    const ENTITY_NAME: &'static str = "Account";

    fn primary_key_values(&self) -> Vec<KeyValue> {
        vec![KeyValue::from(self.tenant), KeyValue::from(self.login.as_str())]
    }

    fn cache_key(&self) -> Option<CacheKey> {
        self.cache_key
    }

    fn set_cache_key(&mut self, key: CacheKey) {
        self.cache_key = Some(key);
    }
}

pub fn account(tenant: i64, login: &str, balance: i64) -> Account {
    Account {
        tenant,
        login: login.to_string(),
        balance,
        cache_key: None,
    }
}

/// Wait until `condition` holds, failing the test after two seconds.
pub async fn eventually(condition: impl Fn() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 2s");
}

/// Grid map whose operations can be made to fail.
pub struct FlakyGrid<V: Clone + Send + Sync + 'static> {
    inner: LocalMap<V>,
    pub fail_gets: AtomicBool,
    pub fail_removes: AtomicBool,
    pub fail_submits: AtomicBool,
    /// Holds the next submitted processor back before it runs.
    pub delay_next_submit: AtomicBool,
    pub submits: AtomicUsize,
    pub completed_submits: AtomicUsize,
}

impl<V: Clone + Send + Sync + 'static> FlakyGrid<V> {
    pub fn new(inner: LocalMap<V>) -> Self {
        Self {
            inner,
            fail_gets: AtomicBool::new(false),
            fail_removes: AtomicBool::new(false),
            fail_submits: AtomicBool::new(false),
            delay_next_submit: AtomicBool::new(false),
            submits: AtomicUsize::new(0),
            completed_submits: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl<V: Clone + Send + Sync + 'static> CacheGrid<V> for FlakyGrid<V> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn get(&self, key: CacheKey) -> anyhow::Result<Option<V>> {
        if self.fail_gets.load(Ordering::SeqCst) {
            bail!("grid unreachable");
        }
        self.inner.get(key).await
    }

    async fn put(&self, key: CacheKey, value: V) -> anyhow::Result<()> {
        self.inner.put(key, value).await
    }

    async fn remove(&self, key: CacheKey) -> anyhow::Result<Option<V>> {
        if self.fail_removes.load(Ordering::SeqCst) {
            bail!("grid unreachable");
        }
        self.inner.remove(key).await
    }

    async fn submit_to_key<P>(&self, key: CacheKey, processor: P) -> anyhow::Result<P::Output>
    where
        P: EntryProcessor<V>,
    {
        let delayed = self.delay_next_submit.swap(false, Ordering::SeqCst);
        self.submits.fetch_add(1, Ordering::SeqCst);
        if self.fail_submits.load(Ordering::SeqCst) {
            bail!("grid unreachable");
        }
        if delayed {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        let output = self.inner.submit_to_key(key, processor).await;
        self.completed_submits.fetch_add(1, Ordering::SeqCst);
        output
    }
}

/// Store whose operations can be made to fail.
pub struct FlakyStore<T: Cacheable> {
    inner: MemoryStore<T>,
    pub fail_finds: AtomicBool,
    pub fail_saves: AtomicBool,
    /// Loads whose range contains this token fail.
    pub fail_load_at: Mutex<Option<i64>>,
}

impl<T: Cacheable> FlakyStore<T> {
    pub fn new(inner: MemoryStore<T>) -> Self {
        Self {
            inner,
            fail_finds: AtomicBool::new(false),
            fail_saves: AtomicBool::new(false),
            fail_load_at: Mutex::new(None),
        }
    }

    pub fn inner(&self) -> &MemoryStore<T> {
        &self.inner
    }
}

#[async_trait]
impl<T: Cacheable> PersistentStore<T> for FlakyStore<T> {
    async fn find_one(&self, keys: &[KeyValue]) -> anyhow::Result<Option<T>> {
        if self.fail_finds.load(Ordering::SeqCst) {
            bail!("store unreachable");
        }
        self.inner.find_one(keys).await
    }

    async fn save(&self, entity: &T) -> anyhow::Result<bool> {
        if self.fail_saves.load(Ordering::SeqCst) {
            bail!("write timed out");
        }
        self.inner.save(entity).await
    }

    async fn remove(&self, entity: &T) -> anyhow::Result<bool> {
        self.inner.remove(entity).await
    }

    async fn load(
        &self,
        start_token: i64,
        end_token: i64,
        consumer: &dyn RowConsumer<T>,
    ) -> anyhow::Result<u64> {
        let fail_at = *self.fail_load_at.lock();
        if let Some(token) = fail_at
            && (start_token..end_token).contains(&token)
        {
            bail!("range [{}, {}) unavailable", start_token, end_token);
        }
        self.inner.load(start_token, end_token, consumer).await
    }
}

/// Listener counting the callbacks it receives.
#[derive(Default)]
pub struct RecordingListener {
    pub saves: AtomicUsize,
    pub removes: AtomicUsize,
}

impl<T> EntryListener<T> for RecordingListener {
    fn on_entry_save(&self, _entity: &T) {
        self.saves.fetch_add(1, Ordering::SeqCst);
    }

    fn on_entry_remove(&self, _entity: &T) {
        self.removes.fetch_add(1, Ordering::SeqCst);
    }
}
