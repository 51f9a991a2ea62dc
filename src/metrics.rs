//! Instrumentation for the data provider.
//!
//! Counts and total durations per signal point, readable as a snapshot.
//! Every recorded timing is also emitted as a `trace` event.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tracing::trace;

/// Signal points recorded by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MetricsType {
    Find,
    Save,
    Remove,
    CreateKey,
    Hits,
    GridGet,
    PutAsync,
}

impl MetricsType {
    pub const ALL: [MetricsType; 7] = [
        Self::Find,
        Self::Save,
        Self::Remove,
        Self::CreateKey,
        Self::Hits,
        Self::GridGet,
        Self::PutAsync,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Find => "find",
            Self::Save => "save",
            Self::Remove => "remove",
            Self::CreateKey => "create_key",
            Self::Hits => "hits",
            Self::GridGet => "grid_get",
            Self::PutAsync => "put_async",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

#[derive(Default)]
struct Slot {
    count: AtomicU64,
    total_nanos: AtomicU64,
}

/// Shared metrics registry; clones record into the same counters.
#[derive(Clone, Default)]
pub struct ProviderMetrics {
    slots: Arc<[Slot; 7]>,
}

impl ProviderMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bump a counter signal.
    pub fn increment(&self, kind: MetricsType) {
        self.slots[kind.index()].count.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one timed occurrence.
    pub fn record(&self, kind: MetricsType, elapsed: Duration) {
        let slot = &self.slots[kind.index()];
        slot.count.fetch_add(1, Ordering::Relaxed);
        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        slot.total_nanos.fetch_add(nanos, Ordering::Relaxed);
        trace!(metric = kind.as_str(), elapsed_us = elapsed.as_micros() as u64, "timing");
    }

    /// Start a timer that records when stopped or dropped.
    pub fn timer(&self, kind: MetricsType) -> Timer {
        Timer {
            metrics: self.clone(),
            kind,
            started: Instant::now(),
            stopped: false,
        }
    }

    pub fn count(&self, kind: MetricsType) -> u64 {
        self.slots[kind.index()].count.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let entries = MetricsType::ALL
            .iter()
            .map(|&kind| {
                let slot = &self.slots[kind.index()];
                (
                    kind,
                    MetricStat {
                        count: slot.count.load(Ordering::Relaxed),
                        total: Duration::from_nanos(slot.total_nanos.load(Ordering::Relaxed)),
                    },
                )
            })
            .collect();
        MetricsSnapshot { entries }
    }
}

impl std::fmt::Debug for ProviderMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderMetrics")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

/// Records the time since it was started into a [`ProviderMetrics`].
#[must_use = "a timer records on drop; binding it to `_` stops it immediately"]
pub struct Timer {
    metrics: ProviderMetrics,
    kind: MetricsType,
    started: Instant,
    stopped: bool,
}

impl Timer {
    pub fn stop(mut self) -> Duration {
        self.finish()
    }

    fn finish(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.stopped {
            self.stopped = true;
            self.metrics.record(self.kind, elapsed);
        }
        elapsed
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Count and total duration for one signal point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricStat {
    pub count: u64,
    pub total: Duration,
}

impl MetricStat {
    pub fn mean(&self) -> Option<Duration> {
        (self.count > 0).then(|| self.total / self.count as u32)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    entries: BTreeMap<MetricsType, MetricStat>,
}

impl MetricsSnapshot {
    pub fn get(&self, kind: MetricsType) -> MetricStat {
        self.entries.get(&kind).copied().unwrap_or_default()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MetricsType, MetricStat)> + '_ {
        self.entries.iter().map(|(k, v)| (*k, *v))
    }
}
