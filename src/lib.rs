//! Gridcache - cache-aside data access over a key-value grid.
//!
//! Entities are read through an in-memory grid in front of a persistent
//! store, written grid-first, and bulk-loaded into the grid by token range.
//!
//! ## Architecture
//!
//! - `key` - Deterministic 64-bit cache keys from primary-key tuples
//! - `provider` - Cache-aside find/save/remove and entry processors
//! - `bulk` - Parallel grid warm-up over token ranges
//! - `cache` - Grid interfaces and the in-process Moka grid
//! - `store` - Store interfaces and the in-memory store
//! - `database` - MongoDB store
//! - `completion` - Single-resolution async results
//! - `listener` - Save/remove notifications
//! - `metrics` - Per-operation timers and counters
//! - `config` - Environment configuration

pub mod bulk;
pub mod cache;
pub mod completion;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod key;
pub mod listener;
pub mod metrics;
pub mod provider;
pub mod store;

#[cfg(test)]
mod testing;

pub use entity::Cacheable;
pub use error::{DataError, Result};
pub use key::{CacheKey, KeyValue};
pub use provider::CacheableDataProvider;
