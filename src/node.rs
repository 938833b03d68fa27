//! Graph nodes and the activation-count protocol.
//!
//! Every node carries an atomic activation count initialized to its
//! predecessor count. A finishing predecessor decrements the count of each
//! successor; the thread whose decrement drives a count to zero owns that
//! node for the rest of the tick. This is the only synchronization between
//! nodes: the Release decrement paired with an Acquire fence on the zero
//! observer guarantees the successor sees every predecessor's output.

use crate::job::BoxedJob;
use crate::runnable::RunnableStack;
use std::cell::UnsafeCell;
use std::fmt;
use std::sync::atomic::{fence, AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

/// Sentinel for "no node" in intrusive runnable-stack links.
pub(crate) const NIL: u32 = u32::MAX;

/// Handle to a node inside a [`DspGraph`](crate::graph::DspGraph) arena.
///
/// Plain index, cheap to copy; only meaningful for the graph that
/// allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    /// Arena position of this node.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Ordered list of a node's successors, sharing its backing storage.
///
/// The backing array is an `Arc<[u32]>`, so cloning a list is a refcount
/// bump: graph fragments built once can be referenced from many parents
/// without per-node allocation.
#[derive(Clone)]
pub struct SuccessorList {
    ids: Arc<[u32]>,
}

impl SuccessorList {
    /// Builds a list from successor handles, preserving order.
    ///
    /// Order matters: the steal-one optimization always retains the
    /// *first* successor that becomes ready.
    pub fn new(successors: &[NodeId]) -> Self {
        Self {
            ids: successors.iter().map(|id| id.0).collect(),
        }
    }

    /// An empty list, for terminal nodes.
    pub fn empty() -> Self {
        Self { ids: Arc::new([]) }
    }

    /// Number of successors.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// True for terminal nodes.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }
}

impl Default for SuccessorList {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for SuccessorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ids.iter()).finish()
    }
}

/// A single schedulable unit of the DSP graph.
///
/// Immutable per tick: the job, the successor list and the activation
/// limit. Mutable per tick: the activation count, plus the intrusive link
/// used while the node sits on the runnable stack.
pub struct DspNode {
    /// Predecessors still to finish this tick. Zero means runnable.
    activation_count: AtomicU16,
    /// Predecessor count; the reset value between ticks.
    activation_limit: u16,
    job: UnsafeCell<BoxedJob>,
    successors: SuccessorList,
    /// Next-node link while enqueued on the runnable stack.
    pub(crate) next_runnable: AtomicU32,
}

// SAFETY: the job behind the UnsafeCell is only ever executed by the one
// thread that popped this node off the runnable stack (seeding) or whose
// decrement drove the activation count to zero (steal-one). Both paths
// hand the node to exactly one thread per tick, and the Release/Acquire
// protocol on `activation_count` orders the hand-off. All other fields
// are atomics or immutable.
unsafe impl Send for DspNode {}
unsafe impl Sync for DspNode {}

impl DspNode {
    pub(crate) fn new(job: BoxedJob, successors: SuccessorList, activation_limit: u16) -> Self {
        Self {
            activation_count: AtomicU16::new(0),
            activation_limit,
            job: UnsafeCell::new(job),
            successors,
            next_runnable: AtomicU32::new(NIL),
        }
    }

    /// Executes this node and propagates readiness to its successors.
    ///
    /// Returns the first successor whose activation count reached zero
    /// (retained for the calling thread to run next, bypassing the
    /// runnable stack) and the number of further successors pushed.
    ///
    /// Precondition: this node's activation count is zero and the calling
    /// thread owns it for this tick.
    pub(crate) fn run<'a>(
        &self,
        arena: &'a [DspNode],
        runnable: &RunnableStack,
        thread_index: usize,
    ) -> (Option<&'a DspNode>, u32) {
        debug_assert_eq!(self.activation_count.load(Ordering::Relaxed), 0);

        // SAFETY: exclusive ownership per the activation protocol (see the
        // Sync impl above).
        unsafe { (*self.job.get()).run(thread_index) };

        let result = self.update_successors(arena, runnable);
        self.reset_activation_count();
        result
    }

    /// Decrements every successor in list order. The first one that
    /// becomes ready is returned instead of pushed; the rest go to the
    /// runnable stack.
    fn update_successors<'a>(
        &self,
        arena: &'a [DspNode],
        runnable: &RunnableStack,
    ) -> (Option<&'a DspNode>, u32) {
        let mut ids = self.successors.iter();

        let next_to_run = loop {
            let Some(id) = ids.next() else {
                return (None, 0);
            };
            let successor = &arena[id as usize];
            if successor.decrement_activation() {
                break successor;
            }
        };

        let mut pushed = 0;
        for id in ids {
            if arena[id as usize].decrement_activation() {
                runnable.push(arena, id);
                pushed += 1;
            }
        }

        (Some(next_to_run), pushed)
    }

    /// Decrements the activation count, returning true when this call
    /// observed the transition to zero. Exactly one caller per tick sees
    /// true; that caller owns the node.
    fn decrement_activation(&self) -> bool {
        let previous = self.activation_count.fetch_sub(1, Ordering::Release);
        debug_assert!(previous > 0, "activation count underflow");

        if previous == 1 {
            // Pair with the Release decrements of every predecessor so the
            // job observes all of their side effects.
            fence(Ordering::Acquire);
            true
        } else {
            false
        }
    }

    /// Rearms the node for the next tick. Called at the end of `run`, and
    /// once per node when a graph is installed.
    pub(crate) fn reset_activation_count(&self) {
        debug_assert_eq!(self.activation_count.load(Ordering::Relaxed), 0);
        self.activation_count
            .store(self.activation_limit, Ordering::Release);
    }

    pub(crate) fn activation_count(&self) -> u16 {
        self.activation_count.load(Ordering::Relaxed)
    }

    pub(crate) fn activation_limit(&self) -> u16 {
        self.activation_limit
    }
}

impl fmt::Debug for DspNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DspNode")
            .field("activation_count", &self.activation_count())
            .field("activation_limit", &self.activation_limit)
            .field("successors", &self.successors)
            .finish()
    }
}
