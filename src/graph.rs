//! Immutable-per-tick container of DSP nodes.
//!
//! A graph is built once by the synthesis-graph compiler (node arena,
//! successor wiring, activation limits, initially-runnable set) and then
//! installed on the interpreter between ticks. Construction entirely
//! precedes execution; nothing here is touched concurrently except the
//! nodes' own atomics.

use crate::job::Job;
use crate::node::{DspNode, NodeId, SuccessorList};
use crate::runnable::STACK_CAPACITY;

/// A compiled DSP graph: preallocated node arena plus the seed set of
/// nodes with no predecessors.
///
/// The arena never grows after [`DspGraph::new`]; node addresses stay
/// stable for the graph's lifetime, which the interpreter relies on
/// while worker threads hold node references during a tick.
pub struct DspGraph {
    nodes: Vec<DspNode>,
    initially_runnable: Vec<u32>,
    capacity: usize,
    has_parallelism: bool,
}

impl DspGraph {
    /// Preallocates an arena for `capacity` nodes.
    ///
    /// `has_parallelism` is the compiler's verdict on whether the graph
    /// contains independent branches worth distributing; when false the
    /// interpreter runs the whole graph on the driver thread.
    ///
    /// # Panics
    ///
    /// If `capacity` exceeds the runnable-pool ceiling of 32768 nodes.
    pub fn new(capacity: usize, has_parallelism: bool) -> Self {
        assert!(
            capacity <= STACK_CAPACITY,
            "graph capacity {capacity} exceeds runnable pool capacity {STACK_CAPACITY}"
        );
        Self {
            nodes: Vec::with_capacity(capacity),
            initially_runnable: Vec::with_capacity(capacity),
            capacity,
            has_parallelism,
        }
    }

    /// Constructs a node in place and returns its handle.
    ///
    /// `activation_limit` is the node's predecessor count; the node
    /// becomes runnable each tick once that many predecessors have
    /// finished. Successor handles must refer to nodes of this graph
    /// (allocate children before their parents, so the handles exist).
    ///
    /// # Panics
    ///
    /// If the arena is full, which means the compiler sized the graph
    /// wrong; a programming error.
    pub fn allocate_node(
        &mut self,
        job: impl Job,
        successors: SuccessorList,
        activation_limit: u16,
    ) -> NodeId {
        assert!(
            self.nodes.len() < self.capacity,
            "node arena capacity {} exceeded",
            self.capacity
        );
        debug_assert!(
            successors.iter().all(|id| (id as usize) < self.capacity),
            "successor handle out of range"
        );

        self.nodes
            .push(DspNode::new(Box::new(job), successors, activation_limit));
        NodeId(self.nodes.len() as u32 - 1)
    }

    /// Records a node with no predecessors; these seed the runnable pool
    /// at every tick start.
    pub fn add_initially_runnable(&mut self, id: NodeId) {
        debug_assert_eq!(
            self.nodes[id.index()].activation_limit(),
            0,
            "initially-runnable node must have no predecessors"
        );
        self.initially_runnable.push(id.0);
    }

    /// Arms every node's activation count with its activation limit.
    /// Called when the graph is installed on an interpreter.
    pub fn reset_activation_counts(&self) {
        for node in &self.nodes {
            node.reset_activation_count();
        }
    }

    /// Number of allocated nodes.
    pub fn total_node_count(&self) -> u32 {
        self.nodes.len() as u32
    }

    /// True when no nodes have been allocated.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether the compiler flagged this graph as worth parallelizing.
    pub fn has_parallelism(&self) -> bool {
        self.has_parallelism
    }

    pub(crate) fn arena(&self) -> &[DspNode] {
        &self.nodes
    }

    pub(crate) fn initially_runnable(&self) -> &[u32] {
        &self.initially_runnable
    }

    #[cfg(test)]
    pub(crate) fn node(&self, id: NodeId) -> &DspNode {
        &self.nodes[id.index()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_graph() {
        let graph = DspGraph::new(8, true);
        assert!(graph.is_empty());
        assert_eq!(graph.total_node_count(), 0);
        assert!(graph.has_parallelism());
    }

    #[test]
    fn test_allocation_assigns_sequential_handles() {
        let mut graph = DspGraph::new(2, false);
        let a = graph.allocate_node(|_: usize| {}, SuccessorList::empty(), 0);
        let b = graph.allocate_node(|_: usize| {}, SuccessorList::empty(), 1);
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(graph.total_node_count(), 2);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn test_allocation_beyond_capacity_panics() {
        let mut graph = DspGraph::new(1, false);
        graph.allocate_node(|_: usize| {}, SuccessorList::empty(), 0);
        graph.allocate_node(|_: usize| {}, SuccessorList::empty(), 0);
    }

    #[test]
    #[should_panic(expected = "capacity")]
    fn test_oversized_graph_panics() {
        let _ = DspGraph::new(STACK_CAPACITY + 1, true);
    }

    #[test]
    fn test_reset_activation_counts_installs_limits() {
        let mut graph = DspGraph::new(3, false);
        let sink = graph.allocate_node(|_: usize| {}, SuccessorList::empty(), 2);
        let a = graph.allocate_node(|_: usize| {}, SuccessorList::new(&[sink]), 0);
        let b = graph.allocate_node(|_: usize| {}, SuccessorList::new(&[sink]), 0);
        graph.add_initially_runnable(a);
        graph.add_initially_runnable(b);

        graph.reset_activation_counts();
        assert_eq!(graph.node(sink).activation_count(), 2);
        assert_eq!(graph.node(a).activation_count(), 0);
        assert_eq!(graph.node(b).activation_count(), 0);
        assert_eq!(graph.initially_runnable().to_vec(), vec![a.0, b.0]);
    }
}
