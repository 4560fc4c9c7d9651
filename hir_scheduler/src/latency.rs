use hir::{Graph, InstrId, Instruction, InstructionKind};
use serde::Serialize;

use crate::Error;

/// Estimated cost of one instruction, in cycles.
///
/// `latency` is the delay before the produced value can be consumed.
/// `internal_latency` covers the extra instructions a single HIR node expands
/// to before the value producing one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct NodeLatency {
    pub internal_latency: u32,
    pub latency: u32,
}

impl NodeLatency {
    pub const ZERO: NodeLatency = NodeLatency::new(0, 0);

    pub const fn new(internal_latency: u32, latency: u32) -> Self {
        Self {
            internal_latency,
            latency,
        }
    }

    pub const fn of(latency: u32) -> Self {
        Self::new(0, latency)
    }
}

pub trait SchedulingLatencyVisitor {
    fn name(&self) -> &'static str;

    fn calculate_latency(
        &self,
        graph: &Graph,
        instruction: &Instruction,
    ) -> Result<NodeLatency, Error>;

    /// Target specific kinds that may be scheduled in addition to the ones
    /// every backend accepts.
    fn is_target_schedulable(&self, _kind: &InstructionKind) -> bool {
        false
    }

    fn unsupported(&self, instruction: &Instruction) -> Error {
        let error = Error::UnsupportedInstruction {
            isa: self.name(),
            instruction: format!("i{}: {}", instruction.id().0, instruction.kind()),
        };
        log::error!("{error}");
        error
    }
}

pub(crate) fn kind_of(graph: &Graph, id: InstrId) -> &InstructionKind {
    graph.instruction(id).kind()
}

pub(crate) fn constant_right_operand(graph: &Graph, instruction: &Instruction) -> Option<i64> {
    kind_of(graph, instruction.input_at(1)).as_i64_constant()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConstantDivisor {
    Zero,
    MinusOrPlusOne,
    PowerOfTwo,
    Other,
}

impl ConstantDivisor {
    pub(crate) fn classify(imm: i64) -> Self {
        match imm {
            0 => ConstantDivisor::Zero,
            1 | -1 => ConstantDivisor::MinusOrPlusOne,
            _ if imm.unsigned_abs().is_power_of_two() => ConstantDivisor::PowerOfTwo,
            _ => ConstantDivisor::Other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_divisor() {
        assert_eq!(ConstantDivisor::classify(0), ConstantDivisor::Zero);
        assert_eq!(ConstantDivisor::classify(-1), ConstantDivisor::MinusOrPlusOne);
        assert_eq!(ConstantDivisor::classify(8), ConstantDivisor::PowerOfTwo);
        assert_eq!(ConstantDivisor::classify(-16), ConstantDivisor::PowerOfTwo);
        assert_eq!(ConstantDivisor::classify(i64::MIN), ConstantDivisor::PowerOfTwo);
        assert_eq!(ConstantDivisor::classify(i32::MIN as i64), ConstantDivisor::PowerOfTwo);
        assert_eq!(ConstantDivisor::classify(7), ConstantDivisor::Other);
    }

    #[test]
    fn test_node_latency_fields() {
        let l = NodeLatency::new(2, 5);
        assert_eq!((l.internal_latency, l.latency), (2, 5));
        assert_eq!(NodeLatency::of(4), NodeLatency { internal_latency: 0, latency: 4 });
        assert_eq!(
            serde_json::to_string(&l).unwrap(),
            r#"{"internal_latency":2,"latency":5}"#
        );
    }
}
