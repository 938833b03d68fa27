//! The tick interpreter: per-period execution of the installed graph.
//!
//! One interpreter is shared by the driver (audio callback) thread and
//! any helper threads. Each tick the driver seeds the runnable pool with
//! the zero-predecessor nodes, then every participating thread loops:
//! pop a node, run its job, propagate readiness to successors, repeat.
//! A thread finishing a node keeps executing newly-ready successors
//! directly (steal-one), so a linear chain causes no pool traffic at all.
//! The tick is over when the shared remaining-node count hits zero.

use crate::backoff::{
    calibrate_watchdog, BackoffPolicy, BackoffStrategy, PauseBackoff, WaitBackoff, YieldBackoff,
};
use crate::config::{SchedulerConfig, DEFAULT_WATCHDOG_TIMEOUT};
use crate::graph::DspGraph;
use crate::node::DspNode;
use crate::runnable::RunnableStack;
use crate::sync::Semaphore;
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::process;
use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::time::Duration;
use tracing::{error, warn};

/// Largest configurable thread count (driver plus helpers).
const MAX_THREAD_COUNT: u8 = 254;

/// Result of one attempt to pop and run work.
enum Poll {
    /// This thread retired the last remaining nodes; the tick is over.
    NoRemainingItems,
    /// The pool was empty but other threads still hold work in flight.
    FifoEmpty,
    /// Work was done and more remains.
    RemainingItems,
}

/// Per-tick scheduler for a compiled DSP graph.
///
/// The driver thread calls [`init_tick`](Self::init_tick) followed by
/// [`tick_main`](Self::tick_main) once per audio period; helper threads
/// call [`tick`](Self::tick) with their index. Graph installation
/// ([`reset_queue`](Self::reset_queue) / [`release_queue`](Self::release_queue))
/// and [`set_thread_count`](Self::set_thread_count) must happen strictly
/// between ticks, from the thread that owns cross-tick sequencing.
/// Dropping the interpreter while a tick is in flight is undefined; drop
/// only a quiescent interpreter, ideally after `release_queue`.
pub struct DspInterpreter {
    /// Installed graph. Swapped only between ticks; read-only while any
    /// thread is inside a tick.
    queue: UnsafeCell<Option<Box<DspGraph>>>,
    runnable: RunnableStack,
    /// Wakes starved workers under the wait strategy.
    sem: Semaphore,
    /// Nodes still to retire this tick; zero between ticks.
    node_count: CachePadded<AtomicU32>,
    thread_count: AtomicU8,
    /// Helpers participating in the current graph's ticks.
    used_helper_threads: AtomicU8,
    strategy: BackoffStrategy,
    /// Empty-poll bound for the pause-strategy lockup watchdog.
    watchdog_iterations: u64,
    #[cfg(feature = "metrics")]
    metrics: crate::metrics::TickMetrics,
}

// SAFETY: the only non-atomic shared state is `queue`. It is written by
// `reset_queue`/`release_queue`, which the API contract restricts to the
// embedder's control thread between ticks (asserted via `node_count`),
// and read during ticks when no writer can exist. Node jobs are run
// under the exclusive-ownership activation protocol (see `DspNode`).
unsafe impl Send for DspInterpreter {}
unsafe impl Sync for DspInterpreter {}

impl DspInterpreter {
    /// Creates an interpreter with the default 10 s watchdog timeout.
    ///
    /// `thread_count` counts the driver, clamped to `[1, 254]`.
    /// Calibrates the pause back-off cost at construction, so this takes
    /// a few tens of milliseconds; build interpreters at startup, not on
    /// the audio thread.
    pub fn new(thread_count: u8, strategy: BackoffStrategy) -> Self {
        Self::with_watchdog_timeout(thread_count, strategy, DEFAULT_WATCHDOG_TIMEOUT)
    }

    /// Creates an interpreter from an embedder configuration.
    pub fn with_config(config: &SchedulerConfig) -> Self {
        Self::with_watchdog_timeout(config.thread_count, config.strategy, config.watchdog_timeout)
    }

    /// Creates an interpreter with a custom watchdog timeout.
    pub fn with_watchdog_timeout(
        thread_count: u8,
        strategy: BackoffStrategy,
        watchdog_timeout: Duration,
    ) -> Self {
        if !crate::runnable::IS_LOCK_FREE {
            warn!("runnable pool is not lock-free on this target; ticks may block");
        }

        let interpreter = Self {
            queue: UnsafeCell::new(None),
            runnable: RunnableStack::new(),
            sem: Semaphore::new(0),
            node_count: CachePadded::new(AtomicU32::new(0)),
            thread_count: AtomicU8::new(1),
            used_helper_threads: AtomicU8::new(0),
            strategy,
            watchdog_iterations: calibrate_watchdog(watchdog_timeout),
            #[cfg(feature = "metrics")]
            metrics: crate::metrics::TickMetrics::default(),
        };
        interpreter.set_thread_count(thread_count);
        interpreter
    }

    /// Prepares the installed graph for one tick.
    ///
    /// Stores the total node count, seeds the runnable pool with the
    /// initially-runnable nodes and, under the wait strategy, posts the
    /// semaphore once per seed so parked helpers wake.
    ///
    /// Returns false (a no-op tick, not an error) when no graph is
    /// installed or the graph is empty.
    pub fn init_tick(&self) -> bool {
        let Some(queue) = self.queue_ref() else {
            return false;
        };
        if queue.is_empty() {
            return false;
        }

        debug_assert_eq!(self.node_count.load(Ordering::Relaxed), 0);
        debug_assert!(self.runnable.is_empty());
        self.node_count
            .store(queue.total_node_count(), Ordering::Release);

        let arena = queue.arena();
        for &id in queue.initially_runnable() {
            self.runnable.push(arena, id);
            if self.strategy == BackoffStrategy::Wait {
                self.sem.post();
            }
        }

        true
    }

    /// Swaps in a new graph between ticks, returning the old one so the
    /// caller can drop it off the audio thread.
    ///
    /// Arms the new graph's activation counts and derives the helper
    /// count for it: zero without parallelism, otherwise
    /// `min(node_count, thread_count) - 1` since the driver is one of
    /// the workers.
    ///
    /// Must be called between ticks; panics if a tick is in flight.
    pub fn reset_queue(&self, new_queue: Option<Box<DspGraph>>) -> Option<Box<DspGraph>> {
        assert_eq!(
            self.node_count.load(Ordering::Acquire),
            0,
            "reset_queue during an active tick"
        );

        // SAFETY: no tick in flight (asserted above), so no other thread
        // is reading the queue slot.
        let slot = unsafe { &mut *self.queue.get() };
        let old = std::mem::replace(slot, new_queue);

        if let Some(queue) = slot.as_deref() {
            queue.reset_activation_counts();

            let helpers = if queue.has_parallelism() {
                let workers = queue
                    .total_node_count()
                    .min(u32::from(self.get_thread_count()));
                workers.saturating_sub(1) as u8
            } else {
                0
            };
            self.used_helper_threads.store(helpers, Ordering::Relaxed);
        } else {
            self.used_helper_threads.store(0, Ordering::Relaxed);
        }

        old
    }

    /// Hands the installed graph back to the caller (for destruction off
    /// the audio thread). Must be called between ticks.
    pub fn release_queue(&self) -> Option<Box<DspGraph>> {
        self.reset_queue(None)
    }

    /// Runs the driver's share of the tick, then spins until every
    /// helper has retired its in-flight node.
    ///
    /// Call from the audio callback thread after [`init_tick`](Self::init_tick)
    /// returned true.
    pub fn tick_main(&self) {
        match self.strategy {
            BackoffStrategy::Pause => self.run_item_main::<PauseBackoff>(),
            BackoffStrategy::Yield => self.run_item_main::<YieldBackoff>(),
            BackoffStrategy::Wait => self.run_item_main::<WaitBackoff>(),
        }
        #[cfg(feature = "metrics")]
        self.metrics.record_tick();
    }

    /// Helper-thread entry for one tick.
    ///
    /// `thread_index` must be in `1..=used_helper_threads`; it is handed
    /// to every job this thread executes.
    pub fn tick(&self, thread_index: usize) {
        debug_assert_ne!(thread_index, 0, "thread index 0 is the driver");
        match self.strategy {
            BackoffStrategy::Pause => self.run_item::<PauseBackoff>(thread_index),
            BackoffStrategy::Yield => self.run_item::<YieldBackoff>(thread_index),
            BackoffStrategy::Wait => self.run_item::<WaitBackoff>(thread_index),
        }
    }

    /// Clamps and stores the configured worker count (driver included).
    /// Takes effect at the next `reset_queue`.
    pub fn set_thread_count(&self, thread_count: u8) {
        self.thread_count
            .store(thread_count.clamp(1, MAX_THREAD_COUNT), Ordering::Relaxed);
    }

    /// Configured worker count, driver included.
    pub fn get_thread_count(&self) -> u8 {
        self.thread_count.load(Ordering::Relaxed)
    }

    /// Helpers actually participating in the current graph's ticks.
    pub fn get_used_helper_threads(&self) -> u8 {
        self.used_helper_threads.load(Ordering::Relaxed)
    }

    /// Back-off strategy fixed at construction.
    pub fn strategy(&self) -> BackoffStrategy {
        self.strategy
    }

    /// Node count of the installed graph, zero when none is installed.
    pub fn total_node_count(&self) -> u32 {
        self.queue_ref().map_or(0, DspGraph::total_node_count)
    }

    /// Scheduler counters accumulated since construction.
    #[cfg(feature = "metrics")]
    pub fn metrics(&self) -> crate::metrics::MetricsSnapshot {
        self.metrics.snapshot()
    }

    #[cfg(test)]
    pub(crate) fn watchdog_iterations(&self) -> u64 {
        self.watchdog_iterations
    }

    fn queue_ref(&self) -> Option<&DspGraph> {
        // SAFETY: writers exist only between ticks (see reset_queue);
        // concurrent readers during a tick see a stable slot.
        unsafe { (*self.queue.get()).as_deref() }
    }

    fn run_item_main<P: BackoffPolicy>(&self) {
        self.run_item::<P>(0);
        self.wait_for_end::<P>();
        debug_assert!(self.runnable.is_empty());
    }

    /// The worker loop: pop-and-run until the tick's node count reaches
    /// zero, backing off whenever the pool runs dry while work is still
    /// in flight on other threads.
    fn run_item<P: BackoffPolicy>(&self, thread_index: usize) {
        let Some(queue) = self.queue_ref() else {
            return;
        };
        let arena = queue.arena();

        let mut backoff = P::new();
        let mut poll_count: u64 = 0;

        loop {
            if self.node_count.load(Ordering::Acquire) == 0 {
                return;
            }

            match self.run_next_item::<P>(arena, thread_index) {
                Poll::NoRemainingItems => {
                    if P::WAIT_ON_SEMAPHORE {
                        // Release the siblings parked on their final wait.
                        for _ in 0..self.used_helper_threads.load(Ordering::Relaxed) {
                            self.sem.post();
                        }
                    }
                    return;
                }
                Poll::FifoEmpty => {
                    backoff.snooze(&self.sem);
                    poll_count += 1;
                }
                Poll::RemainingItems => {
                    backoff.reset();
                    poll_count = 0;
                }
            }

            if P::HAS_WATCHDOG && poll_count == self.watchdog_iterations {
                if thread_index == 0 {
                    error!("possible lockup detected in the audio driver thread");
                    process::abort();
                } else {
                    warn!("possible lockup detected in dsp helper thread {thread_index}");
                    return;
                }
            }
        }
    }

    /// Pops one node and runs the steal-one chain starting at it, then
    /// retires the whole chain with a single counter decrement.
    fn run_next_item<P: BackoffPolicy>(&self, arena: &[DspNode], thread_index: usize) -> Poll {
        let Some(id) = self.runnable.pop(arena) else {
            return Poll::FifoEmpty;
        };

        let mut item = &arena[id as usize];
        let mut consumed: u32 = 0;
        #[cfg(feature = "metrics")]
        let mut total_pushed: u32 = 0;

        loop {
            let (next, pushed) = item.run(arena, &self.runnable, thread_index);
            consumed += 1;
            #[cfg(feature = "metrics")]
            {
                total_pushed += pushed;
            }
            if P::WAIT_ON_SEMAPHORE {
                for _ in 0..pushed {
                    self.sem.post();
                }
            }
            match next {
                Some(next_item) => item = next_item,
                None => break,
            }
        }

        #[cfg(feature = "metrics")]
        self.metrics
            .record_chain(u64::from(consumed), u64::from(total_pushed));

        let remaining = self.node_count.fetch_sub(consumed, Ordering::Release);
        debug_assert!(remaining >= consumed);

        if remaining == consumed {
            Poll::NoRemainingItems
        } else {
            Poll::RemainingItems
        }
    }

    /// Driver-side drain: a helper may still be running a node after the
    /// driver found the pool empty, so poll the remaining count to zero.
    /// Under the pause strategy this warns (but never aborts) once the
    /// poll count reaches twice the watchdog bound.
    fn wait_for_end<P: BackoffPolicy>(&self) {
        let mut backoff = P::new();
        let warn_after = self.watchdog_iterations.saturating_mul(2);
        let mut count: u64 = 0;

        while self.node_count.load(Ordering::Acquire) != 0 {
            backoff.snooze(&self.sem);
            count += 1;
            if P::HAS_WATCHDOG && count == warn_after {
                warn!("possible lockup while draining the tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SuccessorList;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    fn counting_graph(nodes: usize, parallelism: bool, hits: &Arc<AtomicUsize>) -> Box<DspGraph> {
        let mut graph = DspGraph::new(nodes, parallelism);
        for _ in 0..nodes {
            let hits = hits.clone();
            let id = graph.allocate_node(
                move |_: usize| {
                    hits.fetch_add(1, Ordering::SeqCst);
                },
                SuccessorList::empty(),
                0,
            );
            graph.add_initially_runnable(id);
        }
        Box::new(graph)
    }

    #[test]
    fn test_init_tick_without_queue() {
        let interpreter = DspInterpreter::new(1, BackoffStrategy::Pause);
        assert!(!interpreter.init_tick());
        assert_eq!(interpreter.total_node_count(), 0);
    }

    #[test]
    fn test_init_tick_with_empty_queue() {
        let interpreter = DspInterpreter::new(1, BackoffStrategy::Pause);
        let old = interpreter.reset_queue(Some(Box::new(DspGraph::new(4, true))));
        assert!(old.is_none());
        assert!(!interpreter.init_tick());
    }

    #[test]
    fn test_single_node_graph_runs_on_driver() {
        let hits = Arc::new(AtomicUsize::new(0));
        let interpreter = DspInterpreter::new(4, BackoffStrategy::Pause);
        interpreter.reset_queue(Some(counting_graph(1, true, &hits)));

        // A one-node graph leaves nothing for helpers even with
        // parallelism available.
        assert_eq!(interpreter.get_used_helper_threads(), 0);

        assert!(interpreter.init_tick());
        interpreter.tick_main();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_helper_count_derivation() {
        let hits = Arc::new(AtomicUsize::new(0));
        let interpreter = DspInterpreter::new(4, BackoffStrategy::Pause);

        interpreter.reset_queue(Some(counting_graph(16, true, &hits)));
        assert_eq!(interpreter.get_used_helper_threads(), 3);

        interpreter.reset_queue(Some(counting_graph(2, true, &hits)));
        assert_eq!(interpreter.get_used_helper_threads(), 1);

        interpreter.reset_queue(Some(counting_graph(16, false, &hits)));
        assert_eq!(interpreter.get_used_helper_threads(), 0);
    }

    #[test]
    fn test_thread_count_clamping() {
        let interpreter = DspInterpreter::new(0, BackoffStrategy::Yield);
        assert_eq!(interpreter.get_thread_count(), 1);

        interpreter.set_thread_count(255);
        assert_eq!(interpreter.get_thread_count(), 254);

        interpreter.set_thread_count(16);
        assert_eq!(interpreter.get_thread_count(), 16);
    }

    #[test]
    fn test_reset_queue_returns_previous_graph() {
        let hits = Arc::new(AtomicUsize::new(0));
        let interpreter = DspInterpreter::new(1, BackoffStrategy::Pause);

        let first = counting_graph(2, false, &hits);
        let first_ptr: *const DspGraph = &*first;
        assert!(interpreter.reset_queue(Some(first)).is_none());

        let second = counting_graph(3, false, &hits);
        let returned = interpreter.reset_queue(Some(second)).unwrap();
        assert!(std::ptr::eq(first_ptr, &*returned));

        let released = interpreter.release_queue().unwrap();
        assert_eq!(released.total_node_count(), 3);
        assert!(interpreter.release_queue().is_none());
    }

    #[test]
    fn test_watchdog_calibration_is_positive() {
        let interpreter = DspInterpreter::with_watchdog_timeout(
            1,
            BackoffStrategy::Pause,
            Duration::from_millis(100),
        );
        assert!(interpreter.watchdog_iterations() > 0);
    }

    #[test]
    fn test_consecutive_ticks_are_idempotent() {
        let hits = Arc::new(AtomicUsize::new(0));
        let interpreter = DspInterpreter::new(1, BackoffStrategy::Pause);
        interpreter.reset_queue(Some(counting_graph(8, false, &hits)));

        for tick in 1..=5 {
            assert!(interpreter.init_tick());
            interpreter.tick_main();
            assert_eq!(hits.load(Ordering::SeqCst), 8 * tick);
        }
    }
}
