//! Cache-aside data provider.
//!
//! Reads go to the grid first and fall through to the store on a miss, then
//! repopulate the grid in the background. Writes go to the grid first (through
//! an entry processor, so they are serialized per key) and to the store
//! second. Listeners hear about writes only once the store has committed them.
//!
//! Every operation returns a [`Pending`] handle and runs on the worker pool
//! the provider was built with; the caller's thread never waits on a tier.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::cache::{CacheGrid, EntryProcessor, InsertIfAbsent, ReplaceEntry};
use crate::completion::{self, Pending};
use crate::entity::Cacheable;
use crate::error::{DataError, Result};
use crate::key::{self, CacheKey, KeyValue};
use crate::listener::EntryListener;
use crate::metrics::{MetricsType, ProviderMetrics};
use crate::store::PersistentStore;

#[derive(Debug, Clone, Copy)]
enum EntryEvent {
    Save,
    Remove,
}

/// Cache-aside access to one entity type.
pub struct CacheableDataProvider<T, G, S>
where
    T: Cacheable,
    G: CacheGrid<T>,
    S: PersistentStore<T>,
{
    grid: Arc<G>,
    store: Arc<S>,
    executor: Handle,
    listener: Option<Arc<dyn EntryListener<T>>>,
    metrics: ProviderMetrics,
}

impl<T, G, S> Clone for CacheableDataProvider<T, G, S>
where
    T: Cacheable,
    G: CacheGrid<T>,
    S: PersistentStore<T>,
{
    fn clone(&self) -> Self {
        Self {
            grid: Arc::clone(&self.grid),
            store: Arc::clone(&self.store),
            executor: self.executor.clone(),
            listener: self.listener.clone(),
            metrics: self.metrics.clone(),
        }
    }
}

impl<T, G, S> CacheableDataProvider<T, G, S>
where
    T: Cacheable,
    G: CacheGrid<T>,
    S: PersistentStore<T>,
{
    /// Create a provider over `grid` and `store`, running continuations on
    /// `executor`.
    pub fn new(grid: Arc<G>, store: Arc<S>, executor: Handle) -> Self {
        Self {
            grid,
            store,
            executor,
            listener: None,
            metrics: ProviderMetrics::new(),
        }
    }

    /// Register the listener notified after committed saves and removes.
    #[must_use]
    pub fn with_listener(mut self, listener: Arc<dyn EntryListener<T>>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Record into a shared metrics registry instead of a private one.
    #[must_use]
    pub fn with_metrics(mut self, metrics: ProviderMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn grid(&self) -> &Arc<G> {
        &self.grid
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn metrics(&self) -> &ProviderMetrics {
        &self.metrics
    }

    pub fn map_name(&self) -> &str {
        self.grid.name()
    }

    /// Find an entity by its ordered primary-key values.
    ///
    /// Served from the grid when present. On a miss the store is read, and a
    /// found entity is stamped with its cache key and put back into the grid
    /// in the background; the returned handle does not wait for that put.
    /// A store miss leaves the grid untouched.
    pub fn find_one(&self, keys: Vec<KeyValue>) -> Result<Pending<Option<T>>> {
        let cache_key = self.derive_key(&keys)?;
        let timer = self.metrics.timer(MetricsType::Find);
        let this = self.clone();

        Ok(completion::spawn_on(&self.executor, async move {
            let _timer = timer;
            this.find_through(cache_key, keys).await
        }))
    }

    async fn find_through(&self, cache_key: CacheKey, keys: Vec<KeyValue>) -> Result<Option<T>> {
        match self.get_from_grid(cache_key).await {
            Ok(Some(entity)) => {
                self.metrics.increment(MetricsType::Hits);
                return Ok(Some(entity));
            }
            Ok(None) => {}
            Err(e) => {
                warn!(
                    "Grid get for {} {} failed, reading from store: {}",
                    T::ENTITY_NAME,
                    cache_key,
                    e
                );
            }
        }

        let found = self.store.find_one(&keys).await.map_err(DataError::Store)?;

        let Some(mut entity) = found else {
            debug!("{} {} not found in store", T::ENTITY_NAME, cache_key);
            return Ok(None);
        };

        entity.set_cache_key(cache_key);
        self.put_best_effort(cache_key, entity.clone());

        Ok(Some(entity))
    }

    fn get_from_grid(&self, cache_key: CacheKey) -> Pending<Option<T>> {
        let grid = Arc::clone(&self.grid);
        let timer = self.metrics.timer(MetricsType::GridGet);

        completion::spawn_on(&self.executor, async move {
            let result = grid.get(cache_key).await.map_err(DataError::Grid);
            timer.stop();
            result
        })
    }

    /// Put an entity into the grid without reporting the outcome.
    ///
    /// Goes through an insert-if-absent entry processor, so it never
    /// replaces a value written by a concurrent save. Failures are logged
    /// and never reach any caller.
    pub fn put_best_effort(&self, cache_key: CacheKey, entity: T) {
        let grid = Arc::clone(&self.grid);
        let timer = self.metrics.timer(MetricsType::PutAsync);

        completion::best_effort(&self.executor, "grid put", async move {
            let inserted = grid
                .submit_to_key(cache_key, InsertIfAbsent::new(entity))
                .await;
            timer.stop();

            if !inserted? {
                debug!("{} {} already cached, skipping refill", T::ENTITY_NAME, cache_key);
            }
            Ok(())
        });
    }

    /// Save an entity: grid first, then store.
    ///
    /// The entity's cache key is stamped on the caller's instance. The grid
    /// entry is replaced through an entry processor; a grid failure rejects
    /// the handle before the store is touched. A store failure leaves the
    /// grid holding the new value and rejects with the store's error. The
    /// listener hears about the save only when the store applied it.
    pub fn save(&self, entity: &mut T) -> Result<Pending<bool>> {
        let cache_key = self.stamp_key(entity)?;
        let entity = entity.clone();
        let timer = self.metrics.timer(MetricsType::Save);
        let put_timer = self.metrics.timer(MetricsType::PutAsync);

        let cached = self.execute_on_entry(&entity, ReplaceEntry::new(entity.clone()))?;
        let this = self.clone();

        Ok(completion::spawn_on(&self.executor, async move {
            let _timer = timer;

            if let Err(e) = cached.await {
                warn!("Can't cache {} {}: {}", T::ENTITY_NAME, cache_key, e);
                return Err(e);
            }
            put_timer.stop();

            match this.store.save(&entity).await {
                Ok(true) => {
                    debug!("Saved {} {}", T::ENTITY_NAME, cache_key);
                    this.notify(EntryEvent::Save, entity);
                    Ok(true)
                }
                Ok(false) => {
                    warn!("Store did not apply save of {} {}", T::ENTITY_NAME, cache_key);
                    Ok(false)
                }
                Err(e) => {
                    warn!("Can't save {} {}: {:#}", T::ENTITY_NAME, cache_key, e);
                    Err(DataError::Store(e))
                }
            }
        }))
    }

    /// Remove an entity: grid first, then store.
    ///
    /// An entity missing from the grid still counts as removed there. A grid
    /// failure rejects the handle and the store delete is not attempted. The
    /// handle resolves with the store's result.
    pub fn remove(&self, entity: &T) -> Result<Pending<bool>> {
        let cache_key = self.resolve_key(entity)?;
        let entity = entity.clone();
        let timer = self.metrics.timer(MetricsType::Remove);
        let grid = Arc::clone(&self.grid);

        let evicted = completion::spawn_on(&self.executor, async move {
            grid.remove(cache_key).await.map_err(DataError::Grid)
        });
        let this = self.clone();

        Ok(completion::spawn_on(&self.executor, async move {
            let _timer = timer;

            if let Err(e) = evicted.await {
                warn!("Can't remove {} {} from grid: {}", T::ENTITY_NAME, cache_key, e);
                return Err(e);
            }

            match this.store.remove(&entity).await {
                Ok(true) => {
                    debug!("Removed {} {}", T::ENTITY_NAME, cache_key);
                    this.notify(EntryEvent::Remove, entity);
                    Ok(true)
                }
                Ok(false) => {
                    debug!("{} {} was not in store", T::ENTITY_NAME, cache_key);
                    Ok(false)
                }
                Err(e) => {
                    warn!("Can't remove {} {}: {:#}", T::ENTITY_NAME, cache_key, e);
                    Err(DataError::Store(e))
                }
            }
        }))
    }

    /// Run `processor` on the grid entry for `entity`.
    ///
    /// Serialized with every other processor on the same key by the grid.
    pub fn execute_on_entry<P>(&self, entity: &T, processor: P) -> Result<Pending<P::Output>>
    where
        P: EntryProcessor<T>,
    {
        let cache_key = self.resolve_key(entity)?;
        let grid = Arc::clone(&self.grid);

        Ok(completion::spawn_on(&self.executor, async move {
            grid.submit_to_key(cache_key, processor)
                .await
                .map_err(DataError::Grid)
        }))
    }

    /// Derive the cache key for an ordered key tuple.
    pub fn derive_key(&self, values: &[KeyValue]) -> Result<CacheKey> {
        let _timer = self.metrics.timer(MetricsType::CreateKey);

        key::derive_key(values).map_err(|source| {
            warn!("Can't build cache key for {}: {}", T::ENTITY_NAME, source);
            DataError::KeyDerivationFailed {
                entity: T::ENTITY_NAME,
                source,
            }
        })
    }

    /// The entity's stamped cache key, or a freshly derived one.
    pub fn resolve_key(&self, entity: &T) -> Result<CacheKey> {
        match entity.cache_key() {
            Some(key) => Ok(key),
            None => self.derive_key(&entity.primary_key_values()),
        }
    }

    /// Resolve the entity's cache key and memoize it on the instance.
    pub fn stamp_key(&self, entity: &mut T) -> Result<CacheKey> {
        let key = self.resolve_key(entity)?;
        entity.set_cache_key(key);
        Ok(key)
    }

    fn notify(&self, event: EntryEvent, entity: T) {
        let Some(listener) = self.listener.clone() else {
            return;
        };

        self.executor.spawn(async move {
            let outcome = catch_unwind(AssertUnwindSafe(|| match event {
                EntryEvent::Save => listener.on_entry_save(&entity),
                EntryEvent::Remove => listener.on_entry_remove(&entity),
            }));

            if outcome.is_err() {
                warn!("Listener panicked on {:?} of {}", event, T::ENTITY_NAME);
            }
        });
    }
}

impl<T, G, S> std::fmt::Debug for CacheableDataProvider<T, G, S>
where
    T: Cacheable,
    G: CacheGrid<T>,
    S: PersistentStore<T>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheableDataProvider")
            .field("entity", &T::ENTITY_NAME)
            .field("map", &self.grid.name())
            .field("has_listener", &self.listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::cache::{LocalMap, MapConfig};
    use crate::store::MemoryStore;
    use crate::testing::{Account, FlakyGrid, FlakyStore, RecordingListener, account, eventually};

    type Provider = CacheableDataProvider<Account, FlakyGrid<Account>, FlakyStore<Account>>;

    struct Fixture {
        provider: Provider,
        map: LocalMap<Account>,
        grid: Arc<FlakyGrid<Account>>,
        store: Arc<FlakyStore<Account>>,
        listener: Arc<RecordingListener>,
    }

    fn fixture() -> Fixture {
        let map = LocalMap::new(Account::map_name(), MapConfig::default());
        let grid = Arc::new(FlakyGrid::new(map.clone()));
        let store = Arc::new(FlakyStore::new(MemoryStore::new()));
        let listener = Arc::new(RecordingListener::default());
        let provider = CacheableDataProvider::new(grid.clone(), store.clone(), Handle::current())
            .with_listener(listener.clone());

        Fixture {
            provider,
            map,
            grid,
            store,
            listener,
        }
    }

    fn key_of(account: &Account) -> CacheKey {
        key::derive_key(&account.primary_key_values()).unwrap()
    }

    #[tokio::test]
    async fn test_read_through_then_hit() {
        let f = fixture();
        let alice = account(1, "alice", 100);
        f.store.inner().seed([alice.clone()]).unwrap();

        let found = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();
        let found = found.expect("alice is in the store");
        assert_eq!(found.balance, 100);
        assert_eq!(found.cache_key, Some(key_of(&alice)));
        assert_eq!(f.store.inner().stats().finds, 1);

        let map = f.map.clone();
        let key = key_of(&alice);
        eventually(move || map.contains(key)).await;

        let again = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();
        assert_eq!(again.map(|a| a.balance), Some(100));
        assert_eq!(f.store.inner().stats().finds, 1);
        assert_eq!(f.provider.metrics().count(MetricsType::Hits), 1);
    }

    #[tokio::test]
    async fn test_store_miss_does_not_pollute_grid() {
        let f = fixture();
        let ghost = account(1, "ghost", 0);

        let found = f.provider.find_one(ghost.primary_key_values()).unwrap().await.unwrap();
        assert!(found.is_none());

        tokio::task::yield_now().await;
        assert!(!f.map.contains(key_of(&ghost)));
        assert_eq!(f.map.entry_count(), 0);
    }

    #[tokio::test]
    async fn test_store_failure_on_find_propagates() {
        let f = fixture();
        f.store.fail_finds.store(true, Ordering::SeqCst);

        let err = f
            .provider
            .find_one(vec![KeyValue::from(1i64), KeyValue::from("alice")])
            .unwrap()
            .await
            .unwrap_err();

        assert!(err.is_store());
    }

    #[tokio::test]
    async fn test_grid_get_failure_falls_through_to_store() {
        let f = fixture();
        let alice = account(1, "alice", 5);
        f.store.inner().seed([alice.clone()]).unwrap();
        f.grid.fail_gets.store(true, Ordering::SeqCst);

        let found = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();

        assert_eq!(found.map(|a| a.balance), Some(5));
        assert_eq!(f.store.inner().stats().finds, 1);
    }

    #[tokio::test]
    async fn test_failed_repopulation_is_not_reported() {
        let f = fixture();
        let alice = account(1, "alice", 5);
        f.store.inner().seed([alice.clone()]).unwrap();
        f.grid.fail_submits.store(true, Ordering::SeqCst);

        let found = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();

        assert!(found.is_some());
        let grid = f.grid.clone();
        eventually(move || grid.submits.load(Ordering::SeqCst) == 1).await;
        assert!(!f.map.contains(key_of(&alice)));
    }

    #[tokio::test]
    async fn test_save_then_find_sees_new_value() {
        let f = fixture();
        let mut alice = account(1, "alice", 10);
        let mut bob = account(2, "bob", 20);

        assert!(f.provider.save(&mut alice).unwrap().await.unwrap());

        alice.balance = 11;
        let provider = f.provider.clone();
        let other = tokio::spawn(async move { provider.save(&mut bob).unwrap().await });
        assert!(f.provider.save(&mut alice).unwrap().await.unwrap());

        let found = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();
        assert_eq!(found.map(|a| a.balance), Some(11));
        assert_eq!(f.store.inner().stats().finds, 0);

        assert!(other.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_late_refill_does_not_overwrite_save() {
        let f = fixture();
        let alice = account(1, "alice", 1);
        f.store.inner().seed([alice.clone()]).unwrap();
        f.grid.delay_next_submit.store(true, Ordering::SeqCst);

        let found = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();
        assert_eq!(found.map(|a| a.balance), Some(1));

        // The refill is now parked inside the grid while the save goes through.
        let grid = f.grid.clone();
        eventually(move || grid.submits.load(Ordering::SeqCst) == 1).await;

        let mut newer = account(1, "alice", 2);
        assert!(f.provider.save(&mut newer).unwrap().await.unwrap());

        let grid = f.grid.clone();
        eventually(move || grid.completed_submits.load(Ordering::SeqCst) == 2).await;

        assert_eq!(f.map.peek(key_of(&alice)).map(|a| a.balance), Some(2));
        let found = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();
        assert_eq!(found.map(|a| a.balance), Some(2));
    }

    #[tokio::test]
    async fn test_refill_into_empty_grid_inserts() {
        let f = fixture();
        let alice = account(1, "alice", 7);

        f.provider.put_best_effort(key_of(&alice), alice.clone());
        let grid = f.grid.clone();
        eventually(move || grid.completed_submits.load(Ordering::SeqCst) == 1).await;

        f.provider.put_best_effort(key_of(&alice), account(1, "alice", 8));
        let grid = f.grid.clone();
        eventually(move || grid.completed_submits.load(Ordering::SeqCst) == 2).await;
        assert_eq!(f.map.peek(key_of(&alice)).map(|a| a.balance), Some(7));
    }

    #[tokio::test]
    async fn test_save_stamps_key_and_notifies_once() {
        let f = fixture();
        let mut alice = account(1, "alice", 10);

        f.provider.save(&mut alice).unwrap().await.unwrap();

        assert_eq!(alice.cache_key, Some(key_of(&alice)));
        assert_eq!(f.grid.submits.load(Ordering::SeqCst), 1);

        let listener = f.listener.clone();
        eventually(move || listener.saves.load(Ordering::SeqCst) == 1).await;
        assert_eq!(f.listener.removes.load(Ordering::SeqCst), 0);
        assert_eq!(
            f.store.inner().peek(&alice.primary_key_values()).unwrap().map(|a| a.balance),
            Some(10)
        );
    }

    #[tokio::test]
    async fn test_store_write_failure_keeps_grid_ahead() {
        let f = fixture();
        f.store.fail_saves.store(true, Ordering::SeqCst);
        let mut alice = account(1, "alice", 99);

        let err = f.provider.save(&mut alice).unwrap().await.unwrap_err();
        assert!(err.is_store());

        assert_eq!(f.map.peek(key_of(&alice)).map(|a| a.balance), Some(99));
        assert!(f.store.inner().is_empty());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(f.listener.saves.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grid_failure_on_save_skips_store() {
        let f = fixture();
        f.grid.fail_submits.store(true, Ordering::SeqCst);
        let mut alice = account(1, "alice", 1);

        let err = f.provider.save(&mut alice).unwrap().await.unwrap_err();

        assert!(err.is_grid());
        assert_eq!(f.store.inner().stats().saves, 0);
    }

    #[tokio::test]
    async fn test_remove_clears_both_tiers() {
        let f = fixture();
        let mut alice = account(1, "alice", 10);
        f.provider.save(&mut alice).unwrap().await.unwrap();

        assert!(f.provider.remove(&alice).unwrap().await.unwrap());

        assert!(!f.map.contains(key_of(&alice)));
        let found = f.provider.find_one(alice.primary_key_values()).unwrap().await.unwrap();
        assert!(found.is_none());

        let listener = f.listener.clone();
        eventually(move || listener.removes.load(Ordering::SeqCst) == 1).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(f.listener.removes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remove_of_uncached_entity_still_hits_store() {
        let f = fixture();
        let alice = account(1, "alice", 10);
        f.store.inner().seed([alice.clone()]).unwrap();

        assert!(f.provider.remove(&alice).unwrap().await.unwrap());
        assert!(f.store.inner().is_empty());
    }

    #[tokio::test]
    async fn test_remove_missing_everywhere_is_false_and_silent() {
        let f = fixture();
        let ghost = account(3, "ghost", 0);

        assert!(!f.provider.remove(&ghost).unwrap().await.unwrap());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(f.listener.removes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_grid_failure_on_remove_skips_store() {
        let f = fixture();
        let alice = account(1, "alice", 10);
        f.store.inner().seed([alice.clone()]).unwrap();
        f.grid.fail_removes.store(true, Ordering::SeqCst);

        let err = f.provider.remove(&alice).unwrap().await.unwrap_err();

        assert!(err.is_grid());
        assert_eq!(f.store.inner().stats().removes, 0);
        assert_eq!(f.store.inner().len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_listener_does_not_affect_result() {
        struct Exploding;

        impl EntryListener<Account> for Exploding {
            fn on_entry_save(&self, _entity: &Account) {
                panic!("listener bug");
            }
        }

        let f = fixture();
        let provider = f.provider.clone().with_listener(Arc::new(Exploding));
        let mut alice = account(1, "alice", 10);

        assert!(provider.save(&mut alice).unwrap().await.unwrap());
    }

    #[tokio::test]
    async fn test_execute_on_entry_uses_stamped_key() {
        struct ReadBalance;

        impl EntryProcessor<Account> for ReadBalance {
            type Output = Option<i64>;

            fn process(self, entry: &mut Option<Account>) -> Option<i64> {
                entry.as_ref().map(|a| a.balance)
            }
        }

        let f = fixture();
        let mut alice = account(1, "alice", 42);
        f.provider.save(&mut alice).unwrap().await.unwrap();

        let balance = f.provider.execute_on_entry(&alice, ReadBalance).unwrap().await.unwrap();
        assert_eq!(balance, Some(42));

        let mut stranger = account(1, "alice", 0);
        stranger.cache_key = Some(CacheKey::new(12345));
        let balance = f.provider.execute_on_entry(&stranger, ReadBalance).unwrap().await.unwrap();
        assert_eq!(balance, None);
    }
}
