//! Back-off policies for threads that polled an empty runnable stack.
//!
//! Three policies, chosen at interpreter construction and monomorphized
//! into the worker loop so the hot path pays no dispatch cost:
//!
//! - **pause**: exponentially growing spin of CPU pause hints. Never
//!   leaves userspace; meant for pinned helper threads that may burn
//!   cycles.
//! - **yield**: one cooperative `yield_now` per poll.
//! - **wait**: optional bounded spin of semaphore try-waits, then a
//!   blocking wait. Requires producers to post.

use crate::sync::Semaphore;
use serde::{Deserialize, Serialize};
use std::hint;
use std::thread;
use std::time::{Duration, Instant};

/// Back-off policy selector, fixed at interpreter construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffStrategy {
    /// Exponential busy-spin; real-time safe, burns a core while idle.
    Pause,
    /// Cooperative thread yield per poll.
    Yield,
    /// Blocking semaphore wait; helpers sleep while starved.
    Wait,
}

/// Spin count of the first pause back-off call.
pub(crate) const MIN_BACKOFF_LOOPS: u32 = 8;
/// Spin-count ceiling; doubling stops here.
pub(crate) const MAX_BACKOFF_LOOPS: u32 = 16384;

/// One back-off flavour, instantiated per worker-loop entry.
///
/// `snooze` is called after an empty poll, `reset` after a successful
/// one. The two associated consts let the worker loop specialize its
/// wait-strategy posts and pause-strategy watchdog at compile time.
pub(crate) trait BackoffPolicy {
    /// True when producers must post the semaphore for this policy.
    const WAIT_ON_SEMAPHORE: bool = false;
    /// True when empty polls are bounded by the lockup watchdog.
    const HAS_WATCHDOG: bool = false;

    fn new() -> Self;
    fn snooze(&mut self, sem: &Semaphore);
    fn reset(&mut self) {}
}

/// Exponentially growing spin of `spin_loop` hints.
pub(crate) struct PauseBackoff {
    min: u32,
    max: u32,
    loops: u32,
}

impl PauseBackoff {
    pub(crate) fn with_limits(min: u32, max: u32) -> Self {
        Self { min, max, loops: min }
    }

    /// Spins for the current loop count, then doubles it up to `max`.
    pub(crate) fn spin(&mut self) {
        for _ in 0..self.loops {
            hint::spin_loop();
        }
        self.loops = (self.loops * 2).min(self.max);
    }

    #[cfg(test)]
    pub(crate) fn loops(&self) -> u32 {
        self.loops
    }
}

impl BackoffPolicy for PauseBackoff {
    const HAS_WATCHDOG: bool = true;

    fn new() -> Self {
        Self::with_limits(MIN_BACKOFF_LOOPS, MAX_BACKOFF_LOOPS)
    }

    fn snooze(&mut self, _sem: &Semaphore) {
        self.spin();
    }

    fn reset(&mut self) {
        self.loops = self.min;
    }
}

/// One cooperative yield per poll; stateless.
pub(crate) struct YieldBackoff;

impl BackoffPolicy for YieldBackoff {
    fn new() -> Self {
        YieldBackoff
    }

    fn snooze(&mut self, _sem: &Semaphore) {
        thread::yield_now();
    }
}

/// Semaphore-based back-off: try-wait a configurable number of times
/// interleaved with single pauses, then block.
pub(crate) struct WaitBackoff;

impl WaitBackoff {
    /// Try-wait attempts before blocking. 0 disables the spin phase.
    const SPIN_COUNT: u32 = 0;
}

impl BackoffPolicy for WaitBackoff {
    const WAIT_ON_SEMAPHORE: bool = true;

    fn new() -> Self {
        WaitBackoff
    }

    fn snooze(&mut self, sem: &Semaphore) {
        for _ in 0..Self::SPIN_COUNT {
            if sem.try_wait() {
                return;
            }
            hint::spin_loop();
        }
        sem.wait();
    }
}

/// Converts the lockup timeout into a poll-count bound for the pause
/// strategy's watchdog.
///
/// Measures 100 iterations of the pause back-off pinned at its maximum
/// loop count, takes the median of 16 runs, and scales the timeout by
/// the measured cost. The result is denominated in polls, so the
/// watchdog itself needs no clock reads on the tick path.
pub(crate) fn calibrate_watchdog(timeout: Duration) -> u64 {
    const PROBE_ITERATIONS: u32 = 100;
    const SAMPLES: usize = 16;

    let mut measured: Vec<Duration> = (0..SAMPLES)
        .map(|_| {
            let mut backoff = PauseBackoff::with_limits(MAX_BACKOFF_LOOPS, MAX_BACKOFF_LOOPS);
            let start = Instant::now();
            for _ in 0..PROBE_ITERATIONS {
                backoff.spin();
            }
            start.elapsed()
        })
        .collect();
    measured.sort();

    let median = measured[SAMPLES / 2].as_nanos().max(1);
    let polls = (timeout.as_nanos() / median) * PROBE_ITERATIONS as u128;
    (polls as u64).max(1)
}
