//! Bulk loader - warms a grid map from the store, one task per token range.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::{LoadTask, TokenRange};
use crate::cache::{GridInstance, MapConfig};
use crate::entity::Cacheable;
use crate::store::PersistentStore;

/// Result of loading one token range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeOutcome {
    Loaded { range: TokenRange, count: u64 },
    Failed { range: TokenRange, error: String },
}

impl RangeOutcome {
    pub fn range(&self) -> TokenRange {
        match self {
            Self::Loaded { range, .. } | Self::Failed { range, .. } => *range,
        }
    }
}

/// Summary of a bulk load.
#[derive(Debug, Clone)]
pub struct LoadReport {
    pub map_name: String,
    /// One outcome per sub-range, in token order.
    pub outcomes: Vec<RangeOutcome>,
    pub elapsed: Duration,
    /// Rows with token `i64::MAX` were not loaded; they are read through on
    /// first access.
    pub skipped_last_token: bool,
}

impl LoadReport {
    /// Rows loaded across all successful ranges.
    pub fn loaded(&self) -> u64 {
        self.outcomes
            .iter()
            .map(|outcome| match outcome {
                RangeOutcome::Loaded { count, .. } => *count,
                RangeOutcome::Failed { .. } => 0,
            })
            .sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &RangeOutcome> {
        self.outcomes
            .iter()
            .filter(|outcome| matches!(outcome, RangeOutcome::Failed { .. }))
    }

    pub fn is_complete(&self) -> bool {
        self.failures().next().is_none()
    }
}

/// Loads store records into grid maps.
pub struct BulkLoader<I, S> {
    grid: Arc<I>,
    store: Arc<S>,
    executor: Handle,
}

impl<I, S> BulkLoader<I, S>
where
    I: GridInstance,
{
    pub fn new(grid: Arc<I>, store: Arc<S>, executor: Handle) -> Self {
        Self {
            grid,
            store,
            executor,
        }
    }

    /// Load every record with a token in `range` into the map `map_name`.
    ///
    /// The map is configured with [`MapConfig::bulk_load`] first; that only
    /// takes effect if the map does not exist yet. The range is split into
    /// `splits` sub-ranges loaded as independent tasks on the worker pool: a
    /// failed range is reported and does not stop the others.
    pub async fn load<T>(
        &self,
        range: TokenRange,
        map_name: &str,
        splits: usize,
    ) -> anyhow::Result<LoadReport>
    where
        T: Cacheable,
        S: PersistentStore<T>,
    {
        let started = Instant::now();

        self.grid.configure_map(map_name, MapConfig::bulk_load());
        let map = self.grid.map::<T>(map_name)?;

        if range.excludes_last_token() {
            warn!(
                "Bulk load of {} skips token {}; those rows load on first read",
                map_name,
                i64::MAX
            );
        }

        let ranges = range.split(splits);
        info!(
            "Bulk loading {} into {} over {} in {} ranges",
            T::ENTITY_NAME,
            map_name,
            range,
            ranges.len()
        );

        let mut tasks = JoinSet::new();
        for (index, sub_range) in ranges.iter().copied().enumerate() {
            let task = LoadTask::new(sub_range, map_name);
            let map = map.clone();
            let store = Arc::clone(&self.store);

            tasks.spawn_on(
                async move {
                    let result = AssertUnwindSafe(task.run::<T, _, _>(map, store))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|_| Err(anyhow::anyhow!("load task panicked")));
                    (index, result)
                },
                &self.executor,
            );
        }

        let mut outcomes: Vec<RangeOutcome> = ranges
            .iter()
            .map(|&range| RangeOutcome::Failed {
                range,
                error: "task did not complete".to_string(),
            })
            .collect();

        while let Some(joined) = tasks.join_next().await {
            let (index, result) = match joined {
                Ok(done) => done,
                Err(e) => {
                    warn!("Bulk load task for {} was lost: {}", map_name, e);
                    continue;
                }
            };

            let range = ranges[index];
            outcomes[index] = match result {
                Ok(count) => RangeOutcome::Loaded { range, count },
                Err(e) => {
                    warn!("Bulk load of {} {} failed: {:#}", map_name, range, e);
                    RangeOutcome::Failed {
                        range,
                        error: format!("{e:#}"),
                    }
                }
            };
        }

        let report = LoadReport {
            map_name: map_name.to_string(),
            outcomes,
            elapsed: started.elapsed(),
            skipped_last_token: range.excludes_last_token(),
        };

        info!(
            "Bulk loaded {} rows into {} in {:?} ({} failed ranges)",
            report.loaded(),
            map_name,
            report.elapsed,
            report.failures().count()
        );

        Ok(report)
    }
}
