use hir::InstructionKind;
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

use crate::graph::SchedulingGraph;
use crate::node::NodeId;

/// Picks the next node to schedule among the ready candidates.
///
/// Scheduling goes bottom up, so the node returned is placed before every
/// node picked so far.
pub trait SchedulingNodeSelector {
    fn reset(&mut self) {}

    fn pop_highest_priority_node(
        &mut self,
        nodes: &mut Vec<NodeId>,
        graph: &SchedulingGraph,
    ) -> Option<NodeId>;
}

pub struct RandomSchedulingNodeSelector {
    rng: SmallRng,
}

impl RandomSchedulingNodeSelector {
    pub fn new() -> Self {
        Self {
            rng: SmallRng::from_entropy(),
        }
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: SmallRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomSchedulingNodeSelector {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulingNodeSelector for RandomSchedulingNodeSelector {
    fn pop_highest_priority_node(
        &mut self,
        nodes: &mut Vec<NodeId>,
        _graph: &SchedulingGraph,
    ) -> Option<NodeId> {
        if nodes.is_empty() {
            return None;
        }
        let select = self.rng.gen_range(0..nodes.len());
        Some(nodes.swap_remove(select))
    }
}

/// Pops the candidate with the shortest critical path. Since the block is
/// built from its end, long latency chains end up first in program order.
#[derive(Debug, Default)]
pub struct CriticalPathSchedulingNodeSelector {
    prev_select: Option<NodeId>,
}

impl CriticalPathSchedulingNodeSelector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keeps a condition right before the `If` or `Select` consuming it, so
    /// that the flags it sets can be used directly.
    fn select_materialized_condition(
        &self,
        nodes: &mut Vec<NodeId>,
        graph: &SchedulingGraph,
    ) -> Option<NodeId> {
        let prev = graph.instruction_of(self.prev_select?);
        let condition = match prev.kind() {
            InstructionKind::If => prev.input_at(0),
            InstructionKind::Select => prev.input_at(2),
            _ => return None,
        };
        let condition = graph.graph().instruction(condition);
        if !condition.kind().is_condition() || !condition.has_only_one_non_environment_use() {
            return None;
        }
        let condition_node = graph.get_node(condition.id())?;
        let position = nodes.iter().position(|&n| n == condition_node)?;
        debug_assert!(!graph.node(condition_node).has_unscheduled_successors());
        Some(nodes.remove(position))
    }

    fn get_higher_priority_scheduling_node(nodes: &[NodeId], graph: &SchedulingGraph) -> usize {
        let mut select = 0;
        for check in 1..nodes.len() {
            let candidate = graph.node(nodes[select]);
            let node = graph.node(nodes[check]);
            if candidate.critical_path() != node.critical_path() {
                if node.critical_path() < candidate.critical_path() {
                    select = check;
                }
            } else if node.latency() < candidate.latency() {
                select = check;
            }
        }
        select
    }
}

impl SchedulingNodeSelector for CriticalPathSchedulingNodeSelector {
    fn reset(&mut self) {
        self.prev_select = None;
    }

    fn pop_highest_priority_node(
        &mut self,
        nodes: &mut Vec<NodeId>,
        graph: &SchedulingGraph,
    ) -> Option<NodeId> {
        if nodes.is_empty() {
            return None;
        }
        let select = match self.select_materialized_condition(nodes, graph) {
            Some(condition) => condition,
            None => {
                let index = Self::get_higher_priority_scheduling_node(nodes, graph);
                nodes.swap_remove(index)
            }
        };
        self.prev_select = Some(select);
        Some(select)
    }
}
