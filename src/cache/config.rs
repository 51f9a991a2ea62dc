//! Grid map configuration.

use std::time::Duration;

/// How a map makes room once it reaches its capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Never evict; the map grows without bound.
    None,
    /// Size-bounded, frequency-aware eviction.
    #[default]
    Lfu,
}

/// How a map stores its values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InMemoryFormat {
    /// Values are kept as live objects.
    #[default]
    Object,
    /// Values are kept serialized.
    Binary,
}

/// Configuration for a grid map.
///
/// Applied when the map is first created; a map that already exists keeps
/// the settings it was created with.
#[derive(Debug, Clone, PartialEq)]
pub struct MapConfig {
    /// Maximum number of entries, `None` for no bound.
    pub max_capacity: Option<u64>,

    /// Time-to-live for entries.
    pub ttl: Option<Duration>,

    /// Time-to-idle for entries.
    pub tti: Option<Duration>,

    pub eviction: EvictionPolicy,

    pub in_memory_format: InMemoryFormat,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_capacity: Some(10_000),
            ttl: Some(Duration::from_secs(300)), // 5 minutes
            tti: None,
            eviction: EvictionPolicy::Lfu,
            in_memory_format: InMemoryFormat::Object,
        }
    }
}

impl MapConfig {
    /// Create a new map config with the given max capacity.
    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            max_capacity: Some(max_capacity),
            ..Default::default()
        }
    }

    /// Config used while bulk loading a map.
    ///
    /// No eviction, no size cap, no expiry, object storage: entries loaded
    /// early in a run must still be there when the run ends.
    pub fn bulk_load() -> Self {
        Self {
            max_capacity: None,
            ttl: None,
            tti: None,
            eviction: EvictionPolicy::None,
            in_memory_format: InMemoryFormat::Object,
        }
    }

    /// Set max capacity (builder pattern).
    #[must_use]
    pub fn max_capacity(mut self, max_capacity: u64) -> Self {
        self.max_capacity = Some(max_capacity);
        self
    }

    /// Remove the size cap.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.max_capacity = None;
        self
    }

    /// Set time-to-live for entries.
    #[must_use]
    pub fn ttl(mut self, duration: Duration) -> Self {
        self.ttl = Some(duration);
        self
    }

    /// Set time-to-idle for entries.
    #[must_use]
    pub fn tti(mut self, duration: Duration) -> Self {
        self.tti = Some(duration);
        self
    }

    /// Disable TTL (entries never expire based on time).
    #[must_use]
    pub fn no_ttl(mut self) -> Self {
        self.ttl = None;
        self
    }

    #[must_use]
    pub fn eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }

    #[must_use]
    pub fn in_memory_format(mut self, format: InMemoryFormat) -> Self {
        self.in_memory_format = format;
        self
    }

    /// Capacity actually enforced, taking the eviction policy into account.
    pub fn effective_capacity(&self) -> Option<u64> {
        match self.eviction {
            EvictionPolicy::None => None,
            EvictionPolicy::Lfu => self.max_capacity,
        }
    }
}
