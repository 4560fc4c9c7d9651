use hir::InstrId;
use smallvec::SmallVec;

use crate::latency::NodeLatency;

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

pub type Predecessors = SmallVec<[NodeId; 4]>;

/// Scheduling information attached to one instruction of the block being
/// scheduled. Predecessors are the nodes that must stay before this one.
#[derive(Debug, Clone)]
pub struct SchedulingNode {
    instruction: InstrId,
    latency: u32,
    internal_latency: u32,
    critical_path: u32,
    is_scheduling_barrier: bool,
    /// Nodes that depend on this one and have not been scheduled yet. The
    /// node becomes a candidate once this reaches zero.
    num_unscheduled_successors: u32,
    data_predecessors: Predecessors,
    other_predecessors: Predecessors,
}

impl SchedulingNode {
    pub fn new(instruction: InstrId, latency: NodeLatency, is_scheduling_barrier: bool) -> Self {
        Self {
            instruction,
            latency: latency.latency,
            internal_latency: latency.internal_latency,
            critical_path: 0,
            is_scheduling_barrier,
            num_unscheduled_successors: 0,
            data_predecessors: SmallVec::new(),
            other_predecessors: SmallVec::new(),
        }
    }

    pub fn instruction(&self) -> InstrId {
        self.instruction
    }
    pub fn latency(&self) -> u32 {
        self.latency
    }
    pub fn internal_latency(&self) -> u32 {
        self.internal_latency
    }
    pub fn critical_path(&self) -> u32 {
        self.critical_path
    }
    pub fn is_scheduling_barrier(&self) -> bool {
        self.is_scheduling_barrier
    }
    pub fn data_predecessors(&self) -> &[NodeId] {
        &self.data_predecessors
    }
    pub fn other_predecessors(&self) -> &[NodeId] {
        &self.other_predecessors
    }
    pub fn num_unscheduled_successors(&self) -> u32 {
        self.num_unscheduled_successors
    }

    pub(crate) fn add_data_predecessor(&mut self, predecessor: NodeId) {
        self.data_predecessors.push(predecessor);
    }

    pub(crate) fn add_other_predecessor(&mut self, predecessor: NodeId) {
        self.other_predecessors.push(predecessor);
    }

    pub(crate) fn increment_number_of_unscheduled_successors(&mut self) {
        self.num_unscheduled_successors += 1;
    }

    pub fn decrement_number_of_unscheduled_successors(&mut self) {
        debug_assert!(self.num_unscheduled_successors > 0);
        self.num_unscheduled_successors -= 1;
    }

    pub fn has_unscheduled_successors(&self) -> bool {
        self.num_unscheduled_successors != 0
    }

    pub fn maybe_update_critical_path(&mut self, other_critical_path: u32) {
        self.critical_path = self.critical_path.max(other_critical_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_path_is_monotone() {
        let mut node = SchedulingNode::new(InstrId(0), NodeLatency::new(1, 4), false);
        node.maybe_update_critical_path(7);
        node.maybe_update_critical_path(3);
        assert_eq!(node.critical_path(), 7);
        node.maybe_update_critical_path(9);
        assert_eq!(node.critical_path(), 9);
    }

    #[test]
    fn test_successor_count() {
        let mut node = SchedulingNode::new(InstrId(3), NodeLatency::of(2), false);
        assert!(!node.has_unscheduled_successors());
        node.increment_number_of_unscheduled_successors();
        node.increment_number_of_unscheduled_successors();
        node.decrement_number_of_unscheduled_successors();
        assert!(node.has_unscheduled_successors());
        node.decrement_number_of_unscheduled_successors();
        assert!(!node.has_unscheduled_successors());
    }
}
