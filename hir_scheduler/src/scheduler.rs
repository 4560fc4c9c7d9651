use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

use hir::{BlockId, Graph, InstrId, Instruction, InstructionKind};
use serde::Serialize;

use crate::graph::SchedulingGraph;
use crate::latency::SchedulingLatencyVisitor;
use crate::node::NodeId;
use crate::selector::SchedulingNodeSelector;
use crate::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockSchedule {
    pub method: String,
    pub block: u32,
    pub before: Vec<String>,
    pub after: Vec<String>,
    pub moved: usize,
    pub critical_path: u32,
}

/// List scheduler working block by block, bottom up.
pub struct HScheduler<'a> {
    latency_visitor: &'a dyn SchedulingLatencyVisitor,
    selector: &'a mut dyn SchedulingNodeSelector,
    only_optimize_loop_blocks: bool,
    dot_output: Option<PathBuf>,
}

impl<'a> HScheduler<'a> {
    pub fn new(
        latency_visitor: &'a dyn SchedulingLatencyVisitor,
        selector: &'a mut dyn SchedulingNodeSelector,
    ) -> Self {
        Self {
            latency_visitor,
            selector,
            only_optimize_loop_blocks: true,
            dot_output: None,
        }
    }

    pub fn set_only_optimize_loop_blocks(&mut self, value: bool) {
        self.only_optimize_loop_blocks = value;
    }

    pub fn set_dot_output(&mut self, path: Option<PathBuf>) {
        self.dot_output = path;
    }

    /// Control flow must stay at the end of the block, parameters at the
    /// start, and suspend checks keep their place relative to everything.
    pub fn is_scheduling_barrier(instruction: &Instruction) -> bool {
        matches!(
            instruction.kind(),
            InstructionKind::ParameterValue(_) | InstructionKind::SuspendCheck
        ) || instruction.is_control_flow()
    }

    pub fn is_schedulable(&self, instruction: &Instruction) -> bool {
        use InstructionKind::*;
        let kind = instruction.kind();
        match kind {
            IntConstant(_) | LongConstant(_) | FloatConstant(_) | DoubleConstant(_)
            | NullConstant => true,
            Goto | If | PackedSwitch { .. } | Return | ReturnVoid | Throw | TryBoundary
            | Deoptimize => true,
            Unary(_) | Binary(_) | Condition(_) | Compare(_) => true,
            ArrayGet { .. }
            | ArraySet { .. }
            | ArrayLength { .. }
            | BoundType
            | BoundsCheck
            | CheckCast
            | ClassTableGet(_)
            | CurrentMethod
            | DivZeroCheck
            | InstanceFieldGet(_)
            | InstanceFieldSet(_)
            | InstanceOf
            | Invoke { .. }
            | LoadString(_)
            | NewArray { .. }
            | NewInstance { .. }
            | NullCheck
            | ParameterValue(_)
            | Phi
            | Select
            | StaticFieldGet(_)
            | StaticFieldSet(_)
            | SuspendCheck
            | TypeConversion
            | UnresolvedInstanceFieldGet(_)
            | UnresolvedInstanceFieldSet(_)
            | UnresolvedStaticFieldGet(_)
            | UnresolvedStaticFieldSet(_) => true,
            // not modelled yet
            ClearException
            | ClinitCheck
            | LoadClass(_)
            | LoadException
            | MemoryBarrier
            | MonitorOperation(_)
            | NativeDebugInfo => false,
            IntermediateAddress
            | MultiplyAccumulate(_)
            | BitwiseNegatedRight(_)
            | DataProcWithShifterOp { .. }
            | ArmDexCacheArraysBase(_) => self.latency_visitor.is_target_schedulable(kind),
            ParallelMove => panic!(
                "i{}: ParallelMove only appears after register allocation",
                instruction.id().0
            ),
        }
    }

    pub fn is_schedulable_block(&self, graph: &Graph, block: BlockId) -> bool {
        let b = graph.block(block);
        if self.only_optimize_loop_blocks && !b.is_in_loop() {
            return false;
        }
        if b.is_try_catch() {
            return false;
        }
        b.instructions()
            .iter()
            .all(|&instr| self.is_schedulable(graph.instruction(instr)))
    }

    pub fn schedule(&mut self, graph: &mut Graph) -> Result<Vec<BlockSchedule>, Error> {
        let mut report = Vec::new();
        let blocks = graph.reverse_post_order().to_vec();
        for block in blocks {
            if !self.is_schedulable_block(graph, block) {
                log::trace!("{}: {block} is not schedulable", graph.name());
                continue;
            }
            if let Some(schedule) = self.schedule_block(graph, block)? {
                report.push(schedule);
            }
        }
        Ok(report)
    }

    pub fn schedule_block(
        &mut self,
        graph: &mut Graph,
        block: BlockId,
    ) -> Result<Option<BlockSchedule>, Error> {
        let Some((order, critical_path)) = self.compute_order(graph, block)? else {
            return Ok(None);
        };
        let before = graph.block(block).instructions().to_vec();
        let moved = before.iter().zip(&order).filter(|(a, b)| a != b).count();
        let names = |ids: &[InstrId]| -> Vec<String> {
            ids.iter().map(|&id| graph.value_name(id)).collect()
        };
        let schedule = BlockSchedule {
            method: graph.name().to_string(),
            block: block.0,
            before: names(&before),
            after: names(&order),
            moved,
            critical_path,
        };
        log::debug!(
            "{}: scheduled {block}, {} instructions, {moved} moved, critical path {critical_path}",
            schedule.method,
            order.len()
        );
        graph.reorder_block(block, order);
        Ok(Some(schedule))
    }

    fn compute_order(
        &mut self,
        graph: &Graph,
        block: BlockId,
    ) -> Result<Option<(Vec<InstrId>, u32)>, Error> {
        let mut scheduling_graph = SchedulingGraph::new(graph, self.latency_visitor);
        let mut scheduling_nodes = Vec::new();
        for &instr in graph.block(block).instructions().iter().rev() {
            let is_barrier = Self::is_scheduling_barrier(graph.instruction(instr));
            scheduling_nodes.push(scheduling_graph.add_node(instr, is_barrier)?);
        }
        if scheduling_graph.size() <= 1 {
            return Ok(None);
        }

        self.selector.reset();
        let mut candidates = Vec::new();
        for &node in &scheduling_nodes {
            let node_ref = scheduling_graph.node_mut(node);
            if !node_ref.has_unscheduled_successors() {
                let latency = node_ref.latency();
                node_ref.maybe_update_critical_path(latency);
                candidates.push(node);
            }
        }
        let initial_candidates = self.dot_output.as_ref().map(|_| candidates.clone());

        // filled from the end
        let mut order = Vec::with_capacity(scheduling_graph.size());
        while let Some(node) = self
            .selector
            .pop_highest_priority_node(&mut candidates, &scheduling_graph)
        {
            Self::schedule_node(&mut scheduling_graph, node, &mut candidates);
            order.push(scheduling_graph.node(node).instruction());
        }
        assert_eq!(
            order.len(),
            scheduling_graph.size(),
            "dependency cycle in {block}"
        );
        order.reverse();

        if let (Some(path), Some(initial_candidates)) = (&self.dot_output, initial_candidates) {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            let mut out = BufWriter::new(file);
            let description = format!("{} {block}", graph.name());
            scheduling_graph.dump_as_dot_graph(&mut out, &description, &initial_candidates)?;
            out.flush()?;
        }

        let critical_path = scheduling_graph
            .nodes()
            .map(|(_, node)| node.critical_path())
            .max()
            .unwrap_or(0);
        Ok(Some((order, critical_path)))
    }

    fn schedule_node(graph: &mut SchedulingGraph, node: NodeId, candidates: &mut Vec<NodeId>) {
        let path_to_node = graph.node(node).critical_path();
        let data_predecessors = graph.node(node).data_predecessors().to_vec();
        let other_predecessors = graph.node(node).other_predecessors().to_vec();
        for predecessor in data_predecessors {
            let predecessor_node = graph.node_mut(predecessor);
            predecessor_node.maybe_update_critical_path(
                path_to_node + predecessor_node.internal_latency() + predecessor_node.latency(),
            );
            predecessor_node.decrement_number_of_unscheduled_successors();
            if !predecessor_node.has_unscheduled_successors() {
                candidates.push(predecessor);
            }
        }
        // ordering only, no latency to cover
        for predecessor in other_predecessors {
            let predecessor_node = graph.node_mut(predecessor);
            predecessor_node.decrement_number_of_unscheduled_successors();
            if !predecessor_node.has_unscheduled_successors() {
                candidates.push(predecessor);
            }
        }
    }
}

#[cfg(all(test, feature = "arm64"))]
mod tests {
    use super::*;
    use crate::graph::has_side_effect_dependency;
    use crate::latency_arm64::SchedulingLatencyVisitorArm64;
    use crate::selector::{CriticalPathSchedulingNodeSelector, RandomSchedulingNodeSelector};

    const CHAIN: &str = r#"
method m {
  B0 -> B1 {
    l0: ParameterValue<0>
    i1: ParameterValue<1>
    i2: IntConstant<10>
    v3: Goto
  }
  B1 -> B1, B2 {
    i4: Add [i1, i2]
    i5: Add [i4, i2]
    i6: Mul [i4, i5]
    i7: DivZeroCheck [i5] env[i5, i6]
    i8: Div [i4, i7]
    i9: ArrayGet [l0, i4]
    v10: ArraySet [l0, i4, i5]
    i11: ArrayGet [l0, i4]
    j12: TypeConversion [i11]
    j13: Mul [j12, j12]
    v14: ArraySet [l0, i4, i8]
    i15: InstanceFieldGet<8> [l0]
    i16: Add [i15, i9]
    v17: InstanceFieldSet<8> [l0, i16]
    i18: Rem [i6, i2]
    z19: LessThan [i18, i1]
    v20: If [z19]
  }
  B2 {
    v21: Return [i6]
  }
}
"#;

    fn assert_legal(original: &Graph, scheduled: &Graph, block: BlockId) {
        let before = original.block(block).instructions();
        let after = scheduled.block(block).instructions();
        let position = |id: InstrId| after.iter().position(|&i| i == id).unwrap();
        assert_eq!(before.len(), after.len());
        for (i, &earlier) in before.iter().enumerate() {
            for &later in &before[i + 1..] {
                let a = original.instruction(earlier);
                let b = original.instruction(later);
                let must_order = b.inputs().contains(&earlier)
                    || a.env_uses().contains(&later)
                    || has_side_effect_dependency(b, a)
                    || HScheduler::is_scheduling_barrier(a)
                    || HScheduler::is_scheduling_barrier(b);
                if must_order {
                    assert!(
                        position(earlier) < position(later),
                        "{} moved after {}",
                        original.value_name(earlier),
                        original.value_name(later)
                    );
                }
            }
        }
    }

    #[test]
    fn test_random_schedules_are_legal() {
        let original = hir_parser::parse_method(CHAIN).unwrap();
        let visitor = SchedulingLatencyVisitorArm64;
        let mut reordered = 0;
        for seed in 0..200 {
            let mut graph = original.clone();
            let mut selector = RandomSchedulingNodeSelector::with_seed(seed);
            let mut scheduler = HScheduler::new(&visitor, &mut selector);
            let report = scheduler.schedule(&mut graph).unwrap();
            assert_eq!(report.len(), 1);
            assert_legal(&original, &graph, BlockId(1));
            if report[0].moved > 0 {
                reordered += 1;
            }
            // other blocks are never touched
            for block in [0, 2] {
                assert_eq!(
                    graph.block(BlockId(block)).instructions(),
                    original.block(BlockId(block)).instructions()
                );
            }
        }
        assert!(reordered > 0);
    }

    #[test]
    fn test_critical_path_schedule_is_legal() {
        let original = hir_parser::parse_method(CHAIN).unwrap();
        let mut graph = original.clone();
        let visitor = SchedulingLatencyVisitorArm64;
        let mut selector = CriticalPathSchedulingNodeSelector::new();
        let mut scheduler = HScheduler::new(&visitor, &mut selector);
        let report = scheduler.schedule(&mut graph).unwrap();
        assert_legal(&original, &graph, BlockId(1));
        let block = &report[0];
        assert_eq!(block.block, 1);
        assert_eq!(block.before.first().map(String::as_str), Some("i4"));
        assert_eq!(block.after.last().map(String::as_str), Some("v20"));
        assert!(block.critical_path > 0);
    }

    #[test]
    fn test_condition_is_kept_next_to_if() {
        let original = hir_parser::parse_method(
            r#"
method m {
  B0 -> B1, B2 {
    i0: ParameterValue<0>
    z1: LessThan [i0, i0]
    i2: Mul [i0, i0]
    v3: If [z1]
  }
  B1 {
    v4: Return [i2]
  }
  B2 {
    v5: Return [i0]
  }
}
"#,
        )
        .unwrap();
        let mut graph = original.clone();
        let visitor = SchedulingLatencyVisitorArm64;
        let mut selector = CriticalPathSchedulingNodeSelector::new();
        let mut scheduler = HScheduler::new(&visitor, &mut selector);
        scheduler.set_only_optimize_loop_blocks(false);
        let schedule = scheduler.schedule_block(&mut graph, BlockId(0)).unwrap().unwrap();
        assert_eq!(schedule.after, ["i0", "i2", "z1", "v3"]);
        assert_eq!(schedule.moved, 2);
        assert_legal(&original, &graph, BlockId(0));
    }

    #[test]
    fn test_small_blocks_are_left_alone() {
        let mut graph = hir_parser::parse_method(
            r#"
method m {
  B0 -> B1 {
    v0: Goto
  }
  B1 -> B1, B2 {
    v1: SuspendCheck
    i2: IntConstant<3>
    z3: Equal [i2, i2]
    v4: If [z3]
  }
  B2 {
    v5: ReturnVoid
  }
  B3 {
  }
}
"#,
        )
        .unwrap();
        let visitor = SchedulingLatencyVisitorArm64;
        let mut selector = CriticalPathSchedulingNodeSelector::new();
        let mut scheduler = HScheduler::new(&visitor, &mut selector);
        scheduler.set_only_optimize_loop_blocks(false);
        assert_eq!(scheduler.schedule_block(&mut graph, BlockId(0)).unwrap(), None);
        assert_eq!(scheduler.schedule_block(&mut graph, BlockId(2)).unwrap(), None);
        assert!(graph.block(BlockId(3)).instructions().is_empty());
        assert_eq!(scheduler.schedule_block(&mut graph, BlockId(3)).unwrap(), None);
        assert!(graph.block(BlockId(3)).instructions().is_empty());
        let report = scheduler.schedule(&mut graph).unwrap();
        assert_eq!(report.len(), 1);
        assert_eq!(report[0].moved, 0);
        assert_eq!(graph.block(BlockId(1)).instructions(), [1, 2, 3, 4].map(InstrId));
    }

    #[test]
    fn test_skipped_blocks() {
        let text = r#"
method m {
  B0 -> B1 {
    i0: ParameterValue<0>
    v1: Goto
  }
  B1 try -> B2 {
    i2: Mul [i0, i0]
    i3: Add [i0, i0]
    v4: Goto
  }
  B2 {
    i5: Mul [i0, i0]
    i6: Add [i0, i0]
    v7: ReturnVoid
  }
}
"#;
        let mut graph = hir_parser::parse_method(text).unwrap();
        let visitor = SchedulingLatencyVisitorArm64;
        let mut selector = RandomSchedulingNodeSelector::with_seed(7);
        let mut scheduler = HScheduler::new(&visitor, &mut selector);
        // no loop at all
        assert!(scheduler.schedule(&mut graph).unwrap().is_empty());
        scheduler.set_only_optimize_loop_blocks(false);
        assert!(!scheduler.is_schedulable_block(&graph, BlockId(1)));
        assert!(scheduler.is_schedulable_block(&graph, BlockId(2)));
        let report = scheduler.schedule(&mut graph).unwrap();
        assert_eq!(
            report.iter().map(|b| b.block).collect::<Vec<_>>(),
            [0, 2]
        );
    }

    #[test]
    fn test_schedulable_instructions() {
        let graph = hir_parser::parse_method(
            r#"
method m {
  B0 {
    l0: ParameterValue<0>
    l1: LoadClass<3>
    v2: MonitorOperation<enter> [l0]
    l3: IntermediateAddress [l0, l0]
    i4: ArrayLength [l0]
    v5: ReturnVoid
  }
}
"#,
        )
        .unwrap();
        let visitor = SchedulingLatencyVisitorArm64;
        let mut selector = CriticalPathSchedulingNodeSelector::new();
        let scheduler = HScheduler::new(&visitor, &mut selector);
        let schedulable = graph
            .block(BlockId(0))
            .instructions()
            .iter()
            .map(|&i| scheduler.is_schedulable(graph.instruction(i)))
            .collect::<Vec<_>>();
        assert_eq!(schedulable, [true, false, false, true, true, true]);
        assert!(!scheduler.is_schedulable_block(&graph, BlockId(0)));
    }

    #[test]
    fn test_dot_output_is_appended() {
        let mut graph = hir_parser::parse_method(CHAIN).unwrap();
        let path = std::env::temp_dir().join(format!("hir_scheduler_{}.dot", std::process::id()));
        let _ = std::fs::remove_file(&path);
        let visitor = SchedulingLatencyVisitorArm64;
        let mut selector = CriticalPathSchedulingNodeSelector::new();
        let mut scheduler = HScheduler::new(&visitor, &mut selector);
        scheduler.set_dot_output(Some(path.clone()));
        scheduler.schedule(&mut graph).unwrap();
        scheduler.schedule(&mut graph).unwrap();
        let dot = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(dot.matches("// m B1\ndigraph G {").count(), 2);
        assert!(dot.contains("end_of_scheduling"));
    }
}
