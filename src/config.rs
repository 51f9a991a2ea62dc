//! Configuration for the warm-up binary.
//!
//! Loads configuration from environment variables.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;

use crate::cache::MapConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // MongoDB
    pub mongodb_uri: String,
    pub mongodb_database: String,
    pub collection: String,

    /// Number of token ranges a warm-up is split into.
    pub warmup_splits: usize,

    // Default map settings
    pub map_capacity: u64,
    /// Zero disables expiry.
    pub map_ttl_secs: u64,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Expects `.env` to have been loaded already, as `main` does.
    ///
    /// # Errors
    /// Returns error if `MONGODB_URI` is unset or a numeric variable does
    /// not parse.
    pub fn from_env() -> anyhow::Result<Self> {
        Ok(Self {
            mongodb_uri: env::var("MONGODB_URI").context("MONGODB_URI must be set")?,
            mongodb_database: env::var("MONGODB_DATABASE")
                .unwrap_or_else(|_| "gridcache".to_string()),
            collection: env::var("GRIDCACHE_COLLECTION")
                .unwrap_or_else(|_| "records".to_string()),
            warmup_splits: parse_var("GRIDCACHE_WARMUP_SPLITS", 16)?,
            map_capacity: parse_var("GRIDCACHE_MAP_CAPACITY", 10_000)?,
            map_ttl_secs: parse_var("GRIDCACHE_MAP_TTL_SECS", 300)?,
        })
    }

    /// Default config for maps that are not configured explicitly.
    pub fn map_config(&self) -> MapConfig {
        let config = MapConfig::default().max_capacity(self.map_capacity);
        match self.map_ttl_secs {
            0 => config.no_ttl(),
            secs => config.ttl(Duration::from_secs(secs)),
        }
    }
}

fn parse_var<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{name} must be a number, got {raw:?}")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(ttl: u64) -> Config {
        Config {
            mongodb_uri: "mongodb://localhost".to_string(),
            mongodb_database: "gridcache".to_string(),
            collection: "records".to_string(),
            warmup_splits: 16,
            map_capacity: 42,
            map_ttl_secs: ttl,
        }
    }

    #[test]
    fn test_map_config_from_settings() {
        let map = config(60).map_config();
        assert_eq!(map.max_capacity, Some(42));
        assert_eq!(map.ttl, Some(Duration::from_secs(60)));

        assert_eq!(config(0).map_config().ttl, None);
    }

    #[test]
    fn test_parse_var_default_when_unset() {
        let value: u64 = parse_var("GRIDCACHE_TEST_SURELY_UNSET_VAR", 7).unwrap();
        assert_eq!(value, 7);
    }
}
