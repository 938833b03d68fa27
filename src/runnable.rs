//! Lock-free LIFO pool of runnable nodes.
//!
//! A Treiber stack over arena indices: each node carries an intrusive
//! `next_runnable` link, so the stack itself is a single cache-padded
//! atomic head and pushing never allocates. LIFO is deliberate: a
//! just-pushed successor is still hot in the producer's cache, and the
//! next consumer benefits from taking it first.
//!
//! ABA cannot bite here: a node becomes runnable at most once per tick,
//! and the interpreter is quiescent (stack empty) between ticks, so an
//! index observed as head is never re-pushed while another thread still
//! holds a stale snapshot of it.

use crate::node::{DspNode, NIL};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicU32, Ordering};

/// Hard ceiling on the concurrent-ready set, and therefore on graph
/// arena capacity.
pub(crate) const STACK_CAPACITY: usize = 32768;

/// Whether the stack's head CAS is genuinely lock-free on this target.
pub(crate) const IS_LOCK_FREE: bool = cfg!(target_has_atomic = "32");

/// Lock-free LIFO of node indices, linked through the nodes themselves.
pub(crate) struct RunnableStack {
    head: CachePadded<AtomicU32>,
}

impl RunnableStack {
    pub(crate) fn new() -> Self {
        Self {
            head: CachePadded::new(AtomicU32::new(NIL)),
        }
    }

    /// Pushes a ready node. Total and non-blocking.
    pub(crate) fn push(&self, arena: &[DspNode], id: u32) {
        let node = &arena[id as usize];
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            node.next_runnable.store(head, Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, id, Ordering::Release, Ordering::Relaxed)
            {
                Ok(_) => return,
                Err(observed) => head = observed,
            }
        }
    }

    /// Pops the most recently pushed node, if any. Total and non-blocking.
    pub(crate) fn pop(&self, arena: &[DspNode]) -> Option<u32> {
        let mut head = self.head.load(Ordering::Acquire);
        loop {
            if head == NIL {
                return None;
            }
            let next = arena[head as usize].next_runnable.load(Ordering::Relaxed);
            match self
                .head
                .compare_exchange_weak(head, next, Ordering::Acquire, Ordering::Acquire)
            {
                Ok(_) => return Some(head),
                Err(observed) => head = observed,
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.load(Ordering::Relaxed) == NIL
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::SuccessorList;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    fn arena(len: usize) -> Vec<DspNode> {
        (0..len)
            .map(|_| DspNode::new(Box::new(|_: usize| {}), SuccessorList::empty(), 0))
            .collect()
    }

    #[test]
    fn test_pop_on_empty() {
        let nodes = arena(1);
        let stack = RunnableStack::new();
        assert!(stack.is_empty());
        assert_eq!(stack.pop(&nodes), None);
    }

    #[test]
    fn test_lifo_order() {
        let nodes = arena(4);
        let stack = RunnableStack::new();
        for id in 0..4 {
            stack.push(&nodes, id);
        }

        assert_eq!(stack.pop(&nodes), Some(3));
        assert_eq!(stack.pop(&nodes), Some(2));
        assert_eq!(stack.pop(&nodes), Some(1));
        assert_eq!(stack.pop(&nodes), Some(0));
        assert_eq!(stack.pop(&nodes), None);
    }

    #[test]
    fn test_concurrent_push_pop() {
        const PER_THREAD: u32 = 256;
        const THREADS: u32 = 4;

        let nodes = Arc::new(arena((PER_THREAD * THREADS) as usize));
        let stack = Arc::new(RunnableStack::new());

        let producers: Vec<_> = (0..THREADS)
            .map(|t| {
                let nodes = nodes.clone();
                let stack = stack.clone();
                thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        stack.push(&nodes, t * PER_THREAD + i);
                    }
                })
            })
            .collect();
        for p in producers {
            p.join().unwrap();
        }

        let mut seen = HashSet::new();
        while let Some(id) = stack.pop(&nodes) {
            assert!(seen.insert(id), "node {id} popped twice");
        }
        assert_eq!(seen.len(), (PER_THREAD * THREADS) as usize);
        assert!(stack.is_empty());
    }
}
