use std::collections::HashMap;
use std::io::{self, Write};

use hir::{Graph, InstrId, Instruction, InstructionKind, SideEffects};
use itertools::Itertools;

use crate::latency::SchedulingLatencyVisitor;
use crate::node::{NodeId, SchedulingNode};
use crate::Error;

/// Dependency graph of the instructions of one basic block.
///
/// Instructions are added in reverse program order, so that every
/// instruction following the one being added already has a node.
pub struct SchedulingGraph<'g> {
    graph: &'g Graph,
    latency_visitor: &'g dyn SchedulingLatencyVisitor,
    nodes: Vec<SchedulingNode>,
    nodes_map: HashMap<InstrId, NodeId>,
    contains_scheduling_barrier: bool,
}

/// Read after write, write after read, or write after write.
fn may_have_reordering_dependency(node: SideEffects, other: SideEffects) -> bool {
    node.may_depend_on(other)
        || other.may_depend_on(node)
        || (node.does_any_write() && other.does_any_write())
}

/// Whether `node`, placed after `other`, must stay after it because of their
/// memory effects or exceptions.
pub(crate) fn has_side_effect_dependency(node: &Instruction, other: &Instruction) -> bool {
    let node_effects = node.side_effects();
    let other_effects = other.side_effects();
    if may_have_reordering_dependency(node_effects, other_effects) {
        return true;
    }
    if other.can_throw() && node_effects.does_any_write() {
        return true;
    }
    if other_effects.does_any_write() && node.can_throw() {
        return true;
    }
    if other.can_throw() && node.can_throw() {
        return true;
    }
    // the load must not float above the check of its index
    matches!(node.kind(), InstructionKind::ArrayGet { .. })
        && matches!(other.kind(), InstructionKind::BoundsCheck)
        && node.input_at(1) == other.id()
}

impl<'g> SchedulingGraph<'g> {
    pub fn new(graph: &'g Graph, latency_visitor: &'g dyn SchedulingLatencyVisitor) -> Self {
        Self {
            graph,
            latency_visitor,
            nodes: Vec::new(),
            nodes_map: HashMap::new(),
            contains_scheduling_barrier: false,
        }
    }

    pub fn graph(&self) -> &'g Graph {
        self.graph
    }

    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains_scheduling_barrier(&self) -> bool {
        self.contains_scheduling_barrier
    }

    pub fn node(&self, id: NodeId) -> &SchedulingNode {
        &self.nodes[id.index()]
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut SchedulingNode {
        &mut self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &SchedulingNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeId(i as u32), node))
    }

    pub fn get_node(&self, instruction: InstrId) -> Option<NodeId> {
        self.nodes_map.get(&instruction).copied()
    }

    pub fn instruction_of(&self, id: NodeId) -> &'g Instruction {
        self.graph.instruction(self.node(id).instruction())
    }

    /// Creates the node of `instruction` with its latency and wires its
    /// dependencies on the instructions already in the graph.
    pub fn add_node(
        &mut self,
        instruction: InstrId,
        is_scheduling_barrier: bool,
    ) -> Result<NodeId, Error> {
        let latency = self
            .latency_visitor
            .calculate_latency(self.graph, self.graph.instruction(instruction))?;
        let id = NodeId(self.nodes.len() as u32);
        self.nodes
            .push(SchedulingNode::new(instruction, latency, is_scheduling_barrier));
        self.nodes_map.insert(instruction, id);
        self.contains_scheduling_barrier |= is_scheduling_barrier;
        self.add_dependencies(instruction, is_scheduling_barrier);
        Ok(id)
    }

    /// Records that `node` must be scheduled after `dependency`. Does nothing
    /// when either side is outside the graph or the edge already exists.
    pub fn add_dependency(
        &mut self,
        node: Option<NodeId>,
        dependency: Option<NodeId>,
        is_data_dependency: bool,
    ) {
        let (Some(node), Some(dependency)) = (node, dependency) else {
            return;
        };
        if is_data_dependency {
            if self.node(node).data_predecessors().contains(&dependency) {
                return;
            }
            self.node_mut(node).add_data_predecessor(dependency);
        } else {
            if self.node(node).other_predecessors().contains(&dependency) {
                return;
            }
            self.node_mut(node).add_other_predecessor(dependency);
        }
        self.node_mut(dependency)
            .increment_number_of_unscheduled_successors();
    }

    pub fn add_data_dependency(&mut self, node: Option<NodeId>, dependency: Option<NodeId>) {
        self.add_dependency(node, dependency, true);
    }

    pub fn add_other_dependency(&mut self, node: Option<NodeId>, dependency: Option<NodeId>) {
        self.add_dependency(node, dependency, false);
    }

    fn following(&self, instruction: &Instruction) -> impl Iterator<Item = (InstrId, NodeId)> + '_ {
        let block = self.graph.block(instruction.block()).instructions();
        let start = block
            .iter()
            .position(|&i| i == instruction.id())
            .map_or(block.len(), |p| p + 1);
        block[start..]
            .iter()
            .filter_map(|&other| self.get_node(other).map(|node| (other, node)))
    }

    pub fn add_dependencies(&mut self, instruction: InstrId, is_scheduling_barrier: bool) {
        let graph = self.graph;
        let instr = graph.instruction(instruction);
        let instruction_node = self.get_node(instruction);

        // define-use
        for &user in instr.uses() {
            self.add_data_dependency(self.get_node(user), instruction_node);
        }

        debug_assert!(!is_scheduling_barrier || self.contains_scheduling_barrier);
        if self.contains_scheduling_barrier {
            // A barrier stays before everything that follows it, and everything
            // stays before the next barrier. Edges past the next barrier are
            // implied through it.
            let mut edges = Vec::new();
            for (_, other_node) in self.following(instr) {
                let other_is_barrier = self.node(other_node).is_scheduling_barrier();
                if is_scheduling_barrier || other_is_barrier {
                    edges.push(other_node);
                }
                if other_is_barrier {
                    break;
                }
            }
            for other_node in edges {
                self.add_other_dependency(Some(other_node), instruction_node);
            }
        }

        if !instr.side_effects().does_nothing() || instr.can_throw() {
            let mut edges = Vec::new();
            for (other, other_node) in self.following(instr) {
                if self.node(other_node).is_scheduling_barrier() {
                    // ordered through the barrier
                    break;
                }
                if has_side_effect_dependency(graph.instruction(other), instr) {
                    edges.push(other_node);
                }
            }
            for other_node in edges {
                self.add_other_dependency(Some(other_node), instruction_node);
            }
        }

        // A barrier already precedes every following instruction.
        if !is_scheduling_barrier {
            for &holder in instr.env_uses() {
                self.add_other_dependency(self.get_node(holder), instruction_node);
            }
        }
    }

    pub fn has_side_effect_dependency(&self, node: InstrId, other: InstrId) -> bool {
        has_side_effect_dependency(self.graph.instruction(node), self.graph.instruction(other))
    }

    pub fn has_immediate_data_dependency(&self, instruction: InstrId, other: InstrId) -> bool {
        match (self.get_node(instruction), self.get_node(other)) {
            (Some(node), Some(other)) => self.node(node).data_predecessors().contains(&other),
            _ => false,
        }
    }

    pub fn has_immediate_other_dependency(&self, instruction: InstrId, other: InstrId) -> bool {
        match (self.get_node(instruction), self.get_node(other)) {
            (Some(node), Some(other)) => self.node(node).other_predecessors().contains(&other),
            _ => false,
        }
    }

    fn dump_as_dot_node(&self, output: &mut impl Write, node: &SchedulingNode) -> io::Result<()> {
        let graph = self.graph;
        let instruction = graph.instruction(node.instruction());
        let id = graph.value_name(instruction.id());
        write!(
            output,
            "{id}[shape=record, label=\"{id} {} [{}]",
            instruction.debug_name(),
            instruction
                .inputs()
                .iter()
                .map(|&input| graph.value_name(input))
                .join(",")
        )?;
        write!(output, "\\ninternal_latency: {}", node.internal_latency())?;
        write!(output, "\\ncritical_path: {}", node.critical_path())?;
        if node.is_scheduling_barrier() {
            write!(output, "\\n(barrier)")?;
        }
        writeln!(output, "\"];")?;
        // program order goes top to bottom, so edges are reversed
        for &predecessor in node.data_predecessors() {
            let predecessor = self.node(predecessor);
            writeln!(
                output,
                "{}:s -> {id}:n [label=\"{}\",dir=back]",
                graph.value_name(predecessor.instruction()),
                predecessor.latency()
            )?;
        }
        for &predecessor in node.other_predecessors() {
            writeln!(
                output,
                "{}:s -> {id}:n [dir=back,color=blue]",
                graph.value_name(self.node(predecessor).instruction())
            )?;
        }
        Ok(())
    }

    /// Writes the graph in `dot` format. `initial_candidates` are linked to a
    /// fake `end_of_scheduling` node to show where critical paths start.
    pub fn dump_as_dot_graph(
        &self,
        output: &mut impl Write,
        description: &str,
        initial_candidates: &[NodeId],
    ) -> io::Result<()> {
        writeln!(output, "// {description}")?;
        writeln!(output, "digraph G {{")?;
        for node in self.nodes.iter().rev() {
            self.dump_as_dot_node(output, node)?;
        }
        for &candidate in initial_candidates {
            let node = self.node(candidate);
            writeln!(
                output,
                "{}:s -> end_of_scheduling:n [label=\"{}\",dir=back]",
                self.graph.value_name(node.instruction()),
                node.latency()
            )?;
        }
        writeln!(output, "}}")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use hir::BlockId;

    use super::*;
    use crate::latency::NodeLatency;
    use crate::HScheduler;

    struct UnitLatency;

    impl SchedulingLatencyVisitor for UnitLatency {
        fn name(&self) -> &'static str {
            "unit"
        }
        fn calculate_latency(&self, _: &Graph, _: &Instruction) -> Result<NodeLatency, Error> {
            Ok(NodeLatency::of(1))
        }
    }

    fn build<'g>(graph: &'g Graph, visitor: &'g UnitLatency, block: u32) -> SchedulingGraph<'g> {
        let mut sg = SchedulingGraph::new(graph, visitor);
        for &instr in graph.block(BlockId(block)).instructions().iter().rev() {
            let barrier = HScheduler::is_scheduling_barrier(graph.instruction(instr));
            sg.add_node(instr, barrier).unwrap();
        }
        sg
    }

    const DEPENDENCIES: &str = r#"
method m {
  B0 -> B1 {
    l0: ParameterValue<0>
    i1: IntConstant<1>
    i2: IntConstant<10>
    v3: Goto
  }
  B1 {
    i4: Add [i1, i2]
    i5: Add [i4, i2]
    i6: Mul [i4, i5]
    i7: DivZeroCheck [i5] env[i5, i6]
    i8: Div [i4, i7]
    i9: ArrayGet [l0, i4]
    v10: ArraySet [l0, i4, i5]
    i11: ArrayGet [l0, i4]
    v12: ArraySet [l0, i4, i5]
    v13: ReturnVoid
  }
}
"#;

    #[test]
    fn test_dependencies() {
        let graph = hir_parser::parse_method(DEPENDENCIES).unwrap();
        let visitor = UnitLatency;
        let sg = build(&graph, &visitor, 1);
        let [add1, add2, mul, div_check, div, array_get1, array_set1, array_get2, array_set2] =
            [4, 5, 6, 7, 8, 9, 10, 11, 12].map(InstrId);

        // nothing across blocks
        assert!(!sg.has_immediate_data_dependency(add1, InstrId(1)));
        assert!(!sg.has_immediate_data_dependency(add2, InstrId(2)));

        // define-use
        assert!(sg.has_immediate_data_dependency(add2, add1));
        assert!(!sg.has_immediate_data_dependency(add1, add2));
        assert!(sg.has_immediate_data_dependency(div_check, add2));
        assert!(!sg.has_immediate_data_dependency(div_check, add1));
        assert!(sg.has_immediate_data_dependency(div, div_check));
        assert!(sg.has_immediate_data_dependency(array_set1, add1));
        assert!(sg.has_immediate_data_dependency(array_set1, add2));

        // memory
        assert!(sg.has_immediate_other_dependency(array_set1, array_get1));
        assert!(sg.has_immediate_other_dependency(array_set2, array_get2));
        assert!(sg.has_immediate_other_dependency(array_get2, array_set1));
        assert!(sg.has_immediate_other_dependency(array_set2, array_set1));

        // environment
        assert!(sg.has_immediate_other_dependency(div_check, mul));
        assert!(!sg.has_immediate_other_dependency(mul, div_check));

        // throwing check before the store
        assert!(sg.has_immediate_other_dependency(array_set1, div_check));
        assert!(!sg.has_immediate_other_dependency(array_get1, div_check));
    }

    #[test]
    fn test_barrier_edges_are_pruned() {
        let graph = hir_parser::parse_method(
            r#"
method m {
  B0 {
    i0: IntConstant<1>
    v1: SuspendCheck
    i2: IntConstant<2>
    v3: SuspendCheck
    i4: IntConstant<3>
    v5: ReturnVoid
  }
}
"#,
        )
        .unwrap();
        let visitor = UnitLatency;
        let sg = build(&graph, &visitor, 0);
        let [i1, b2, i3, b4, i5] = [0, 1, 2, 3, 4].map(InstrId);
        assert!(sg.contains_scheduling_barrier());
        assert!(sg.has_immediate_other_dependency(b2, i1));
        assert!(sg.has_immediate_other_dependency(i3, b2));
        assert!(sg.has_immediate_other_dependency(b4, b2));
        assert!(sg.has_immediate_other_dependency(b4, i3));
        assert!(sg.has_immediate_other_dependency(i5, b4));
        assert!(!sg.has_immediate_other_dependency(b4, i1));
        assert!(!sg.has_immediate_other_dependency(i5, b2));
    }

    #[test]
    fn test_side_effects_stop_at_barrier() {
        let graph = hir_parser::parse_method(
            r#"
method m {
  B0 -> B1 {
    l0: ParameterValue<0>
    i1: IntConstant<5>
    v2: Goto
  }
  B1 {
    v3: InstanceFieldSet<8> [l0, i1]
    i4: InstanceFieldGet<8> [l0]
    v5: SuspendCheck
    v6: InstanceFieldSet<8> [l0, i1]
    v7: ReturnVoid
  }
}
"#,
        )
        .unwrap();
        let visitor = UnitLatency;
        let sg = build(&graph, &visitor, 1);
        let [store1, load, barrier, store2] = [3, 4, 5, 6].map(InstrId);
        assert!(sg.has_immediate_other_dependency(load, store1));
        assert!(sg.has_immediate_other_dependency(barrier, store1));
        assert!(sg.has_immediate_other_dependency(store2, barrier));
        assert!(!sg.has_immediate_other_dependency(store2, store1));
        assert!(!sg.has_immediate_other_dependency(store2, load));
        assert!(sg.has_side_effect_dependency(store2, store1));
    }

    #[test]
    fn test_array_get_after_its_bounds_check() {
        let graph = hir_parser::parse_method(
            r#"
method m {
  B0 -> B1 {
    l0: ParameterValue<0>
    i1: ParameterValue<1>
    v2: Goto
  }
  B1 {
    i3: ArrayLength [l0]
    i4: BoundsCheck [i1, i3]
    i5: ArrayGet [l0, i4]
    i6: ArrayGet [l0, i1]
    v7: Return [i5]
  }
}
"#,
        )
        .unwrap();
        let visitor = UnitLatency;
        let sg = build(&graph, &visitor, 1);
        assert!(sg.has_immediate_data_dependency(InstrId(5), InstrId(4)));
        assert!(sg.has_immediate_other_dependency(InstrId(5), InstrId(4)));
        assert!(!sg.has_immediate_other_dependency(InstrId(6), InstrId(4)));
    }

    #[test]
    fn test_edges_are_not_duplicated() {
        let graph = hir_parser::parse_method(
            r#"
method m {
  B0 {
    i0: IntConstant<3>
    i1: Mul [i0, i0]
    i2: Add [i1, i1]
    v3: Return [i2]
  }
}
"#,
        )
        .unwrap();
        let visitor = UnitLatency;
        let mut sg = build(&graph, &visitor, 0);
        let mul = sg.get_node(InstrId(1));
        let add = sg.get_node(InstrId(2));
        assert_eq!(sg.node(add.unwrap()).data_predecessors().len(), 1);
        // `add` through its data edge, the return barrier through its other edge
        assert!(sg.has_immediate_other_dependency(InstrId(3), InstrId(1)));
        assert_eq!(sg.node(mul.unwrap()).num_unscheduled_successors(), 2);
        sg.add_data_dependency(add, mul);
        sg.add_other_dependency(add, mul);
        sg.add_other_dependency(add, mul);
        sg.add_other_dependency(None, mul);
        assert_eq!(sg.node(add.unwrap()).data_predecessors().len(), 1);
        assert_eq!(sg.node(add.unwrap()).other_predecessors().len(), 1);
        assert_eq!(sg.node(mul.unwrap()).num_unscheduled_successors(), 3);
    }

    fn depends_on(sg: &SchedulingGraph, node: NodeId, other: NodeId) -> bool {
        let mut stack = vec![node];
        let mut seen = HashSet::new();
        while let Some(n) = stack.pop() {
            if n == other {
                return true;
            }
            if seen.insert(n) {
                let n = sg.node(n);
                stack.extend(n.data_predecessors().iter().chain(n.other_predecessors()));
            }
        }
        false
    }

    #[test]
    fn test_pruned_graph_orders_every_conflict() {
        let graph = hir_parser::parse_method(
            r#"
method m {
  B0 -> B1 {
    l0: ParameterValue<0>
    i1: ParameterValue<1>
    v2: Goto
  }
  B1 {
    i3: ArrayGet [l0, i1]
    v4: ArraySet [l0, i1, i3]
    i5: DivZeroCheck [i1]
    v6: SuspendCheck
    i7: InstanceFieldGet<12, volatile> [l0]
    v8: InstanceFieldSet<16> [l0, i7]
    i9: InvokeStaticOrDirect<Main.g> [i1]
    v10: ArraySet [l0, i9, i9]
    v11: ReturnVoid
  }
}
"#,
        )
        .unwrap();
        let visitor = UnitLatency;
        let sg = build(&graph, &visitor, 1);
        let block = graph.block(BlockId(1)).instructions();
        for (i, &earlier) in block.iter().enumerate() {
            for &later in &block[i + 1..] {
                let a = graph.instruction(earlier);
                let b = graph.instruction(later);
                let must_order = has_side_effect_dependency(b, a)
                    || b.inputs().contains(&earlier)
                    || HScheduler::is_scheduling_barrier(a)
                    || HScheduler::is_scheduling_barrier(b);
                if must_order {
                    let (later, earlier) = (sg.get_node(later), sg.get_node(earlier));
                    assert!(
                        depends_on(&sg, later.unwrap(), earlier.unwrap()),
                        "{} is not ordered after {}",
                        graph.value_name(b.id()),
                        graph.value_name(a.id())
                    );
                }
            }
        }
    }

    #[test]
    fn test_dot_dump() {
        let graph = hir_parser::parse_method(
            r#"
method m {
  B0 {
    i0: IntConstant<3>
    i1: Add [i0, i0]
    v2: Return [i1]
  }
}
"#,
        )
        .unwrap();
        let visitor = UnitLatency;
        let sg = build(&graph, &visitor, 0);
        let mut out = Vec::new();
        let ret = sg.get_node(InstrId(2)).unwrap();
        sg.dump_as_dot_graph(&mut out, "m B0", &[ret]).unwrap();
        let dot = String::from_utf8(out).unwrap();
        assert!(dot.starts_with("// m B0\ndigraph G {\n"));
        assert!(dot.contains("i1[shape=record, label=\"i1 Add [i0,i0]\\ninternal_latency: 0"));
        assert!(dot.contains("i1:s -> v2:n [label=\"1\",dir=back]\n"));
        assert!(dot.contains("i0:s -> i1:n [label=\"1\",dir=back]\n"));
        assert!(dot.contains("\\n(barrier)\"];"));
        assert!(dot.ends_with("v2:s -> end_of_scheduling:n [label=\"1\",dir=back]\n}\n"));
    }
}
