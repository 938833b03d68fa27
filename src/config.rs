//! Embedder-facing scheduler configuration.

use crate::backoff::BackoffStrategy;
use serde::{Deserialize, Serialize};
use std::thread;
use std::time::Duration;

/// Default lockup watchdog timeout under the pause strategy.
pub const DEFAULT_WATCHDOG_TIMEOUT: Duration = Duration::from_secs(10);

/// Scheduler configuration, typically deserialized from the audio
/// server's config file.
///
/// ```
/// use dspflow::{BackoffStrategy, SchedulerConfig};
///
/// let config = SchedulerConfig {
///     thread_count: 4,
///     strategy: BackoffStrategy::Wait,
///     ..SchedulerConfig::default()
/// };
/// assert_eq!(config.thread_count, 4);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Total DSP threads including the driver, clamped to `[1, 254]` by
    /// the interpreter.
    pub thread_count: u8,
    /// Back-off policy for threads that poll an empty runnable pool.
    pub strategy: BackoffStrategy,
    /// Pin helper threads to cores. Mostly useful with
    /// [`BackoffStrategy::Pause`], where helpers busy-spin and benefit
    /// from staying put.
    pub pin_helpers: bool,
    /// Wall-clock budget the pause-strategy watchdog converts into a
    /// poll-count bound at construction.
    pub watchdog_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let threads = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(254) as u8;
        Self {
            thread_count: threads,
            strategy: BackoffStrategy::Wait,
            pin_helpers: false,
            watchdog_timeout: DEFAULT_WATCHDOG_TIMEOUT,
        }
    }
}
