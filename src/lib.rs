//! # dspflow - Parallel Task-Graph Scheduler for Real-Time Audio
//!
//! A per-tick DAG scheduler for audio synthesis servers. Each audio
//! period ("tick") the scheduler executes a compiled graph of DSP nodes
//! across the audio callback thread and a pool of helper threads,
//! finishing the whole graph within one buffer's worth of wall time.
//!
//! ## Architecture
//!
//! Three layers, leaves first:
//!
//! - **Nodes**: units of DSP work with an atomic activation count equal
//!   to their predecessor count; a node becomes runnable when every
//!   predecessor has finished
//! - **Graph**: an immutable-per-tick arena of nodes built by the
//!   synthesis-graph compiler, installed on the interpreter between ticks
//! - **Interpreter**: the per-tick scheduler: a lock-free LIFO pool of
//!   runnable nodes, a remaining-node counter, and a worker loop with a
//!   pluggable back-off strategy (busy-spin, yield, or semaphore wait)
//!
//! The fast path is wait-free: no allocation, no locks, no syscalls
//! inside a tick under the pause strategy.
//!
//! ## Example
//!
//! ```
//! use dspflow::{BackoffStrategy, DspGraph, DspInterpreter, SuccessorList};
//!
//! // A two-node chain: oscillator feeds gain. Children are allocated
//! // first so their handles exist when the parents are wired.
//! let mut graph = DspGraph::new(2, false);
//! let gain = graph.allocate_node(|_thread: usize| { /* render */ }, SuccessorList::empty(), 1);
//! let osc = graph.allocate_node(
//!     |_thread: usize| { /* render */ },
//!     SuccessorList::new(&[gain]),
//!     0,
//! );
//! graph.add_initially_runnable(osc);
//!
//! let interpreter = DspInterpreter::new(1, BackoffStrategy::Pause);
//! interpreter.reset_queue(Some(Box::new(graph)));
//!
//! // Once per audio period:
//! if interpreter.init_tick() {
//!     interpreter.tick_main();
//! }
//! ```
//!
//! For multi-threaded operation, [`DspThreadPool`] owns the helper
//! threads and drives the same interpreter.

pub mod backoff;
pub mod config;
pub mod graph;
pub mod interpreter;
pub mod job;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod node;
pub mod threads;

mod runnable;
mod sync;

pub use backoff::BackoffStrategy;
pub use config::SchedulerConfig;
pub use graph::DspGraph;
pub use interpreter::DspInterpreter;
pub use job::Job;
pub use node::{NodeId, SuccessorList};
pub use threads::{DspThreadPool, PoolError};
