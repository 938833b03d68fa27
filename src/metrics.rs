#[cfg(feature = "metrics")]
use std::sync::atomic::{AtomicU64, Ordering};

/// Optional scheduler counters, updated with relaxed atomics on the tick
/// path. Compiled out entirely without the `metrics` feature.
#[cfg(feature = "metrics")]
#[derive(Debug, Default)]
pub struct TickMetrics {
    /// Ticks driven to completion.
    pub ticks: AtomicU64,
    /// Node jobs executed.
    pub nodes_run: AtomicU64,
    /// Chains started by a runnable-pool pop.
    pub chains: AtomicU64,
    /// Nodes executed via steal-one without touching the pool.
    pub chain_hops: AtomicU64,
    /// Successors pushed to the runnable pool.
    pub pool_pushes: AtomicU64,
}

#[cfg(feature = "metrics")]
impl TickMetrics {
    pub(crate) fn record_chain(&self, consumed: u64, pushed: u64) {
        self.nodes_run.fetch_add(consumed, Ordering::Relaxed);
        self.chains.fetch_add(1, Ordering::Relaxed);
        self.chain_hops.fetch_add(consumed - 1, Ordering::Relaxed);
        self.pool_pushes.fetch_add(pushed, Ordering::Relaxed);
    }

    pub(crate) fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            ticks: self.ticks.load(Ordering::Relaxed),
            nodes_run: self.nodes_run.load(Ordering::Relaxed),
            chains: self.chains.load(Ordering::Relaxed),
            chain_hops: self.chain_hops.load(Ordering::Relaxed),
            pool_pushes: self.pool_pushes.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`TickMetrics`] at a point in time.
#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy)]
pub struct MetricsSnapshot {
    pub ticks: u64,
    pub nodes_run: u64,
    pub chains: u64,
    pub chain_hops: u64,
    pub pool_pushes: u64,
}

#[cfg(feature = "metrics")]
impl MetricsSnapshot {
    /// Average nodes executed per pool pop; higher means steal-one is
    /// keeping chains off the pool.
    pub fn average_chain_length(&self) -> f64 {
        if self.chains == 0 {
            return 0.0;
        }
        self.nodes_run as f64 / self.chains as f64
    }
}
