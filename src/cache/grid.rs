//! In-process grid - central management for all named maps.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use anyhow::bail;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{GridInstance, LocalMap, MapConfig};

/// In-process grid holding one [`LocalMap`] per name.
///
/// Map configuration is registered ahead of first use with
/// [`GridInstance::configure_map`]; maps without one get the grid's default.
///
/// ## Example
///
/// ```rust,ignore
/// let grid = LocalGrid::new();
/// grid.configure_map("accounts", MapConfig::bulk_load());
///
/// let accounts: LocalMap<Account> = grid.map("accounts")?;
/// ```
#[derive(Clone)]
pub struct LocalGrid {
    maps: Arc<RwLock<HashMap<String, MapEntry>>>,
    configs: Arc<RwLock<HashMap<String, MapConfig>>>,
    default_config: MapConfig,
}

/// Internal map entry storing a type-erased map.
struct MapEntry {
    map: Box<dyn Any + Send + Sync>,
    type_id: TypeId,
    type_name: &'static str,
}

impl LocalGrid {
    /// Create a new empty grid.
    pub fn new() -> Self {
        Self::with_default_config(MapConfig::default())
    }

    /// Create a grid whose unconfigured maps use `default_config`.
    pub fn with_default_config(default_config: MapConfig) -> Self {
        info!("Local grid initialized");
        Self {
            maps: Arc::new(RwLock::new(HashMap::new())),
            configs: Arc::new(RwLock::new(HashMap::new())),
            default_config,
        }
    }

    /// The config a map with this name gets (or got) at creation.
    pub fn map_config(&self, name: &str) -> MapConfig {
        self.configs
            .read()
            .get(name)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }

    /// Check if a map with the given name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.maps.read().contains_key(name)
    }

    /// Drop a map and its configuration.
    ///
    /// Returns `true` if the map existed.
    pub fn destroy(&self, name: &str) -> bool {
        self.configs.write().remove(name);
        let removed = self.maps.write().remove(name).is_some();
        if removed {
            debug!("Destroyed map: {}", name);
        }
        removed
    }

    /// Get a list of all created map names.
    pub fn map_names(&self) -> Vec<String> {
        self.maps.read().keys().cloned().collect()
    }

    fn downcast<V>(name: &str, entry: &MapEntry) -> anyhow::Result<LocalMap<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        if entry.type_id != TypeId::of::<LocalMap<V>>() {
            bail!(
                "map '{}' type mismatch: expected {}, got {}",
                name,
                std::any::type_name::<LocalMap<V>>(),
                entry.type_name
            );
        }
        match entry.map.downcast_ref::<LocalMap<V>>() {
            Some(map) => Ok(map.clone()),
            None => bail!("map '{}' could not be downcast", name),
        }
    }
}

impl GridInstance for LocalGrid {
    type Map<V: Clone + Send + Sync + 'static> = LocalMap<V>;

    fn configure_map(&self, name: &str, config: MapConfig) -> bool {
        // Hold the maps lock so a concurrent first use can't slip in between.
        let maps = self.maps.read();
        if maps.contains_key(name) {
            warn!("Map {} already exists; keeping its current configuration", name);
            return false;
        }

        debug!("Configured map {}: {:?}", name, config);
        self.configs.write().insert(name.to_string(), config);
        true
    }

    fn map<V>(&self, name: &str) -> anyhow::Result<LocalMap<V>>
    where
        V: Clone + Send + Sync + 'static,
    {
        if let Some(entry) = self.maps.read().get(name) {
            return Self::downcast(name, entry);
        }

        let mut maps = self.maps.write();

        // Another caller may have created it while we waited for the lock.
        if let Some(entry) = maps.get(name) {
            return Self::downcast(name, entry);
        }

        let config = self.map_config(name);
        debug!("Creating map: {}", name);
        let map = LocalMap::<V>::new(name, config);

        maps.insert(
            name.to_string(),
            MapEntry {
                map: Box::new(map.clone()),
                type_id: TypeId::of::<LocalMap<V>>(),
                type_name: std::any::type_name::<LocalMap<V>>(),
            },
        );

        Ok(map)
    }
}

impl Default for LocalGrid {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LocalGrid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let maps = self.maps.read();
        f.debug_struct("LocalGrid")
            .field("map_count", &maps.len())
            .field("map_names", &maps.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheGrid, EvictionPolicy};
    use crate::key::CacheKey;

    #[tokio::test]
    async fn test_same_name_same_map() {
        let grid = LocalGrid::new();

        let a: LocalMap<String> = grid.map("users").unwrap();
        let b: LocalMap<String> = grid.map("users").unwrap();

        a.put(CacheKey::new(1), "one".to_string()).await.unwrap();
        assert_eq!(b.peek(CacheKey::new(1)).as_deref(), Some("one"));
        assert!(grid.contains("users"));
    }

    #[test]
    fn test_type_mismatch_is_an_error() {
        let grid = LocalGrid::new();

        let _: LocalMap<String> = grid.map("users").unwrap();
        assert!(grid.map::<u64>("users").is_err());
    }

    #[test]
    fn test_config_applies_before_first_use_only() {
        let grid = LocalGrid::new();

        assert!(grid.configure_map("bulk", MapConfig::bulk_load()));
        let map: LocalMap<u64> = grid.map("bulk").unwrap();
        assert_eq!(map.config().eviction, EvictionPolicy::None);

        assert!(!grid.configure_map("bulk", MapConfig::with_capacity(5)));
        let again: LocalMap<u64> = grid.map("bulk").unwrap();
        assert_eq!(again.config(), &MapConfig::bulk_load());
    }

    #[test]
    fn test_unconfigured_map_uses_default() {
        let grid = LocalGrid::with_default_config(MapConfig::with_capacity(42));

        let map: LocalMap<u64> = grid.map("plain").unwrap();
        assert_eq!(map.config().max_capacity, Some(42));
    }

    #[test]
    fn test_destroy() {
        let grid = LocalGrid::new();

        let _: LocalMap<u64> = grid.map("gone").unwrap();
        assert!(grid.destroy("gone"));
        assert!(!grid.destroy("gone"));
        assert!(grid.map_names().is_empty());
    }
}
