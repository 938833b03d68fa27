//! Long-lived helper threads around a shared interpreter.
//!
//! The interpreter itself owns no threads; this pool supplies them. Each
//! helper parks on its own cycle semaphore between ticks, wakes when the
//! driver starts a tick, runs the interpreter's worker loop, and parks
//! again. Cross-tick sequencing lives here: [`DspThreadPool::tick`]
//! returns only after every woken helper has left the tick, so installing
//! a new graph right afterwards is always safe.

use crate::config::SchedulerConfig;
use crate::interpreter::DspInterpreter;
use crate::sync::Semaphore;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::warn;

/// Errors from helper-pool construction and teardown.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The OS refused to spawn a helper thread.
    #[error("failed to spawn dsp helper thread: {0}")]
    Spawn(#[from] io::Error),
    /// Helpers panicked; a node job must have panicked during a tick.
    #[error("{0} dsp helper thread(s) panicked")]
    HelperPanicked(usize),
}

/// State shared between the driver and the helper threads.
struct PoolShared {
    shutdown: AtomicBool,
    /// One start signal per helper; posted by the driver each tick.
    cycle_start: Box<[Semaphore]>,
    /// Posted by each helper when it leaves a tick.
    cycle_done: Semaphore,
}

/// A shared interpreter plus the helper threads that serve it.
///
/// The pool spawns `thread_count - 1` helpers named `dsp-helper-N`,
/// optionally pinned to cores. The embedder's audio callback calls
/// [`tick`](Self::tick) once per period; graph management goes through
/// [`interpreter`](Self::interpreter) between ticks.
///
/// A panicking node job leaves the tick protocol undefined, so wrap
/// fallible jobs before handing them to the graph.
///
/// ```no_run
/// use dspflow::{BackoffStrategy, DspGraph, DspThreadPool, SchedulerConfig, SuccessorList};
///
/// let config = SchedulerConfig {
///     thread_count: 4,
///     strategy: BackoffStrategy::Wait,
///     ..SchedulerConfig::default()
/// };
/// let pool = DspThreadPool::new(&config).expect("spawn helpers");
///
/// let mut graph = DspGraph::new(1, true);
/// let node = graph.allocate_node(|_: usize| { /* render */ }, SuccessorList::empty(), 0);
/// graph.add_initially_runnable(node);
/// pool.interpreter().reset_queue(Some(Box::new(graph)));
///
/// pool.tick(); // once per audio period
/// pool.shutdown().expect("clean shutdown");
/// ```
pub struct DspThreadPool {
    interpreter: Arc<DspInterpreter>,
    shared: Arc<PoolShared>,
    helpers: Vec<JoinHandle<()>>,
}

impl DspThreadPool {
    /// Builds an interpreter from `config` and spawns its helpers.
    pub fn new(config: &SchedulerConfig) -> Result<Self, PoolError> {
        let interpreter = Arc::new(DspInterpreter::with_config(config));
        Self::with_interpreter(interpreter, config.pin_helpers)
    }

    /// Spawns helpers for an interpreter built elsewhere.
    pub fn with_interpreter(
        interpreter: Arc<DspInterpreter>,
        pin_helpers: bool,
    ) -> Result<Self, PoolError> {
        let helper_count = usize::from(interpreter.get_thread_count()) - 1;
        let shared = Arc::new(PoolShared {
            shutdown: AtomicBool::new(false),
            cycle_start: (0..helper_count).map(|_| Semaphore::new(0)).collect(),
            cycle_done: Semaphore::new(0),
        });

        let core_ids = if pin_helpers {
            core_affinity::get_core_ids().unwrap_or_default()
        } else {
            Vec::new()
        };

        let mut pool = Self {
            interpreter,
            shared,
            helpers: Vec::with_capacity(helper_count),
        };

        for index in 1..=helper_count {
            // Helpers start at core 1; core 0 is left to the driver.
            let core_id = (!core_ids.is_empty()).then(|| core_ids[index % core_ids.len()]);
            let interpreter = Arc::clone(&pool.interpreter);
            let shared = Arc::clone(&pool.shared);

            let handle = thread::Builder::new()
                .name(format!("dsp-helper-{index}"))
                .spawn(move || {
                    if let Some(core_id) = core_id {
                        core_affinity::set_for_current(core_id);
                    }
                    helper_loop(&interpreter, &shared, index);
                });

            match handle {
                Ok(handle) => pool.helpers.push(handle),
                // Drop shuts down the helpers spawned so far.
                Err(err) => return Err(err.into()),
            }
        }

        Ok(pool)
    }

    /// The shared interpreter, for graph installation between ticks.
    pub fn interpreter(&self) -> &DspInterpreter {
        &self.interpreter
    }

    /// Drives one tick: seeds the pool, wakes the helpers the current
    /// graph uses, runs the driver's share, and waits for the woken
    /// helpers to park again. A no-op when the graph is absent or empty.
    pub fn tick(&self) {
        if !self.interpreter.init_tick() {
            return;
        }

        // Never more than the helpers this pool actually spawned, even if
        // the interpreter's thread count was raised afterwards.
        let helpers =
            usize::from(self.interpreter.get_used_helper_threads()).min(self.helpers.len());
        for sem in &self.shared.cycle_start[..helpers] {
            sem.post();
        }

        self.interpreter.tick_main();

        for _ in 0..helpers {
            self.shared.cycle_done.wait();
        }
    }

    /// Stops and joins all helpers, reporting any that panicked.
    pub fn shutdown(mut self) -> Result<(), PoolError> {
        let panicked = self.join_helpers();
        if panicked > 0 {
            Err(PoolError::HelperPanicked(panicked))
        } else {
            Ok(())
        }
    }

    fn join_helpers(&mut self) -> usize {
        self.shared.shutdown.store(true, Ordering::Release);
        for sem in self.shared.cycle_start.iter() {
            sem.post();
        }

        let mut panicked = 0;
        for helper in self.helpers.drain(..) {
            if helper.join().is_err() {
                panicked += 1;
            }
        }
        panicked
    }
}

impl Drop for DspThreadPool {
    fn drop(&mut self) {
        if self.helpers.is_empty() {
            return;
        }
        let panicked = self.join_helpers();
        if panicked > 0 {
            warn!("{panicked} dsp helper thread(s) panicked before shutdown");
        }
    }
}

fn helper_loop(interpreter: &DspInterpreter, shared: &PoolShared, index: usize) {
    loop {
        shared.cycle_start[index - 1].wait();
        if shared.shutdown.load(Ordering::Acquire) {
            return;
        }
        interpreter.tick(index);
        shared.cycle_done.post();
    }
}
