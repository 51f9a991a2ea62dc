//! Capability trait for entities that live in the cache grid.

use crate::key::{CacheKey, KeyValue};

/// An entity that can be cached in the grid.
///
/// Implementors list their primary-key values in declaration order and keep a
/// slot for the derived cache key so it is computed once per instance.
pub trait Cacheable: Clone + Send + Sync + 'static {
    /// Entity type name, used in errors and to name the grid map.
    const ENTITY_NAME: &'static str;

    /// Ordered primary-key values.
    ///
    /// Must match the key tuple callers pass to `find_one` for the same
    /// entity, value for value.
    fn primary_key_values(&self) -> Vec<KeyValue>;

    /// The memoized cache key, if one was stamped.
    fn cache_key(&self) -> Option<CacheKey>;

    fn set_cache_key(&mut self, key: CacheKey);

    /// Name of the grid map holding this entity type.
    fn map_name() -> String {
        Self::ENTITY_NAME.to_lowercase()
    }
}
