//! Gridcache warm-up
//!
//! Connects to MongoDB and bulk-loads the record collection into the grid.

use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gridcache::Cacheable;
use gridcache::bulk::{BulkLoader, RangeOutcome, TokenRange};
use gridcache::cache::LocalGrid;
use gridcache::config::Config;
use gridcache::database::{Database, MongoStore, Record};

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before anything else)
    dotenvy::dotenv().ok();

    // If RUST_LOG is not set, default to "info" level for our crate
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gridcache=info,mongodb=warn"));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting gridcache warm-up...");

    let config = Config::from_env()?;
    info!("Configuration loaded successfully");

    info!("Connecting to MongoDB...");
    let db = Database::connect(&config.mongodb_uri, &config.mongodb_database).await?;

    let store = MongoStore::<Record>::new(&db, &config.collection, Record::KEY_FIELDS);
    store.ensure_indexes().await?;
    info!("Store ready on collection {}", config.collection);

    let grid = Arc::new(LocalGrid::with_default_config(config.map_config()));
    let loader = BulkLoader::new(grid.clone(), Arc::new(store), Handle::current());

    let report = loader
        .load::<Record>(TokenRange::full(), &Record::map_name(), config.warmup_splits)
        .await?;

    for outcome in report.failures() {
        if let RangeOutcome::Failed { range, error } = outcome {
            warn!("Range {} failed: {}", range, error);
        }
    }

    if !report.is_complete() {
        anyhow::bail!(
            "warm-up of {} incomplete: {} of {} ranges failed",
            report.map_name,
            report.failures().count(),
            report.outcomes.len()
        );
    }

    info!(
        "Warm-up complete: {} records in {:?}, maps: {:?}",
        report.loaded(),
        report.elapsed,
        grid.map_names()
    );

    Ok(())
}
