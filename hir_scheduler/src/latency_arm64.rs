use hir::{BinaryOp, Graph, Instruction, InstructionKind, Type};

use crate::latency::{
    constant_right_operand, kind_of, ConstantDivisor, NodeLatency, SchedulingLatencyVisitor,
};
use crate::Error;

const INTEGER_OP_LATENCY: u32 = 2;
const FLOATING_POINT_OP_LATENCY: u32 = 5;
const DATA_PROC_WITH_SHIFTER_OP_LATENCY: u32 = 3;
const DIV_DOUBLE_LATENCY: u32 = 30;
const DIV_FLOAT_LATENCY: u32 = 15;
const DIV_INTEGER_LATENCY: u32 = 5;
const LOAD_STRING_INTERNAL_LATENCY: u32 = 7;
const MUL_FLOATING_POINT_LATENCY: u32 = 6;
const MUL_INTEGER_LATENCY: u32 = 6;
const TYPE_CONVERSION_FLOATING_POINT_INTEGER_LATENCY: u32 = 5;
const CALL_INTERNAL_LATENCY: u32 = 10;
const CALL_LATENCY: u32 = 5;
const MEMORY_LOAD_LATENCY: u32 = 5;
const MEMORY_STORE_LATENCY: u32 = 3;

/// Cost model of a generic ARMv8 core.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulingLatencyVisitorArm64;

impl SchedulingLatencyVisitorArm64 {
    fn div_rem_by_constant(imm: i64, rem_latency: u32) -> NodeLatency {
        match ConstantDivisor::classify(imm) {
            ConstantDivisor::Zero => NodeLatency::ZERO,
            ConstantDivisor::MinusOrPlusOne => NodeLatency::of(INTEGER_OP_LATENCY),
            ConstantDivisor::PowerOfTwo => {
                NodeLatency::new(4 * INTEGER_OP_LATENCY, INTEGER_OP_LATENCY)
            }
            ConstantDivisor::Other => NodeLatency::new(4 * INTEGER_OP_LATENCY, rem_latency),
        }
    }

    fn div(graph: &Graph, instruction: &Instruction) -> NodeLatency {
        match instruction.ty() {
            Type::Float => NodeLatency::of(DIV_FLOAT_LATENCY),
            Type::Double => NodeLatency::of(DIV_DOUBLE_LATENCY),
            _ => match constant_right_operand(graph, instruction) {
                Some(imm) => Self::div_rem_by_constant(imm, MUL_INTEGER_LATENCY),
                None => NodeLatency::of(DIV_INTEGER_LATENCY),
            },
        }
    }

    fn rem(graph: &Graph, instruction: &Instruction) -> NodeLatency {
        if instruction.ty().is_floating_point() {
            return NodeLatency::new(CALL_INTERNAL_LATENCY, CALL_LATENCY);
        }
        match constant_right_operand(graph, instruction) {
            Some(imm) => Self::div_rem_by_constant(imm, MUL_INTEGER_LATENCY),
            None => NodeLatency::new(DIV_INTEGER_LATENCY, MUL_INTEGER_LATENCY),
        }
    }
}

impl SchedulingLatencyVisitor for SchedulingLatencyVisitorArm64 {
    fn name(&self) -> &'static str {
        "arm64"
    }

    fn calculate_latency(
        &self,
        graph: &Graph,
        instruction: &Instruction,
    ) -> Result<NodeLatency, Error> {
        use InstructionKind::*;
        let is_fp = instruction.ty().is_floating_point();
        let latency = match instruction.kind() {
            Binary(BinaryOp::Mul) => NodeLatency::of(if is_fp {
                MUL_FLOATING_POINT_LATENCY
            } else {
                MUL_INTEGER_LATENCY
            }),
            Binary(BinaryOp::Div) => Self::div(graph, instruction),
            Binary(BinaryOp::Rem) => Self::rem(graph, instruction),
            Binary(_) | Condition(_) | Compare(_) => NodeLatency::of(if is_fp {
                FLOATING_POINT_OP_LATENCY
            } else {
                INTEGER_OP_LATENCY
            }),
            BitwiseNegatedRight(_) => NodeLatency::of(INTEGER_OP_LATENCY),
            DataProcWithShifterOp { .. } => NodeLatency::of(DATA_PROC_WITH_SHIFTER_OP_LATENCY),
            // spaced from its memory access users
            IntermediateAddress => NodeLatency::of(INTEGER_OP_LATENCY + 2),
            MultiplyAccumulate(_) => NodeLatency::of(MUL_INTEGER_LATENCY),
            ArrayGet { .. } => {
                let array = kind_of(graph, instruction.input_at(0));
                let internal = if matches!(array, IntermediateAddress) {
                    0
                } else {
                    INTEGER_OP_LATENCY
                };
                NodeLatency::new(internal, MEMORY_LOAD_LATENCY)
            }
            ArrayLength { .. } => NodeLatency::of(MEMORY_LOAD_LATENCY),
            ArraySet { .. } => NodeLatency::of(MEMORY_STORE_LATENCY),
            BoundsCheck => NodeLatency::new(INTEGER_OP_LATENCY, 0),
            InstanceFieldGet(_) | StaticFieldGet(_) => NodeLatency::of(MEMORY_LOAD_LATENCY),
            InstanceOf => NodeLatency::new(CALL_INTERNAL_LATENCY, INTEGER_OP_LATENCY),
            Invoke { .. } => NodeLatency::new(CALL_INTERNAL_LATENCY, CALL_LATENCY),
            LoadString(_) => NodeLatency::new(LOAD_STRING_INTERNAL_LATENCY, MEMORY_LOAD_LATENCY),
            NewArray { .. } => {
                NodeLatency::new(INTEGER_OP_LATENCY + CALL_INTERNAL_LATENCY, CALL_LATENCY)
            }
            NewInstance {
                is_string_alloc, ..
            } => {
                let internal = if *is_string_alloc {
                    2 + MEMORY_LOAD_LATENCY + CALL_INTERNAL_LATENCY
                } else {
                    CALL_INTERNAL_LATENCY
                };
                NodeLatency::new(internal, CALL_LATENCY)
            }
            SuspendCheck => NodeLatency::ZERO,
            TypeConversion => {
                let input = graph.instruction(instruction.input_at(0)).ty();
                if is_fp || input.is_floating_point() {
                    NodeLatency::of(TYPE_CONVERSION_FLOATING_POINT_INTEGER_LATENCY)
                } else {
                    NodeLatency::of(INTEGER_OP_LATENCY)
                }
            }
            ArmDexCacheArraysBase(_) => return Err(self.unsupported(instruction)),
            _ => NodeLatency::of(INTEGER_OP_LATENCY),
        };
        Ok(latency)
    }

    fn is_target_schedulable(&self, kind: &InstructionKind) -> bool {
        matches!(
            kind,
            InstructionKind::BitwiseNegatedRight(_)
                | InstructionKind::DataProcWithShifterOp { .. }
                | InstructionKind::MultiplyAccumulate(_)
                | InstructionKind::IntermediateAddress
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latencies(text: &str) -> Vec<NodeLatency> {
        let graph = hir_parser::parse_method(text).unwrap();
        let visitor = SchedulingLatencyVisitorArm64;
        graph
            .instructions()
            .map(|instr| visitor.calculate_latency(&graph, instr).unwrap())
            .collect()
    }

    #[test]
    fn test_arithmetic() {
        let l = latencies(
            r#"
method m {
  B0 {
    i0: ParameterValue<0>
    f1: ParameterValue<1>
    i2: Add [i0, i0]
    f3: Add [f1, f1]
    i4: Mul [i0, i0]
    f5: Mul [f1, f1]
    z6: LessThan [i0, i0]
    i7: Compare [f1, f1]
    f8: TypeConversion [i0]
    j9: TypeConversion [i0]
    i10: DataProcWithShifterOp<add, lsl, 2> [i0, i0]
    v11: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[2], NodeLatency::of(2));
        assert_eq!(l[3], NodeLatency::of(5));
        assert_eq!(l[4], NodeLatency::of(6));
        assert_eq!(l[5], NodeLatency::of(6));
        assert_eq!(l[6], NodeLatency::of(2));
        assert_eq!(l[7], NodeLatency::of(2));
        assert_eq!(l[8], NodeLatency::of(5));
        assert_eq!(l[9], NodeLatency::of(2));
        assert_eq!(l[10], NodeLatency::of(3));
        assert_eq!(l[11], NodeLatency::of(2));
    }

    #[test]
    fn test_division_by_constant() {
        let l = latencies(
            r#"
method m {
  B0 {
    i0: ParameterValue<0>
    i1: IntConstant<0>
    i2: IntConstant<-1>
    i3: IntConstant<8>
    i4: IntConstant<7>
    i5: Div [i0, i1]
    i6: Div [i0, i2]
    i7: Div [i0, i3]
    i8: Div [i0, i4]
    i9: Div [i0, i0]
    i10: Rem [i0, i4]
    i11: Rem [i0, i0]
    d12: ParameterValue<1>
    d13: Div [d12, d12]
    d14: Rem [d12, d12]
    v15: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[5], NodeLatency::ZERO);
        assert_eq!(l[6], NodeLatency::of(2));
        assert_eq!(l[7], NodeLatency::new(8, 2));
        assert_eq!(l[8], NodeLatency::new(8, 6));
        assert_eq!(l[9], NodeLatency::of(5));
        assert_eq!(l[10], NodeLatency::new(8, 6));
        assert_eq!(l[11], NodeLatency::new(5, 6));
        assert_eq!(l[13], NodeLatency::of(30));
        assert_eq!(l[14], NodeLatency::new(10, 5));
    }

    #[test]
    fn test_memory_and_calls() {
        let l = latencies(
            r#"
method m {
  B0 {
    l0: ParameterValue<0>
    i1: ParameterValue<1>
    i2: ArrayLength [l0]
    i3: BoundsCheck [i1, i2]
    i4: ArrayGet [l0, i3]
    l5: IntermediateAddress [l0, i1]
    i6: ArrayGet [l5, i3]
    v7: ArraySet [l0, i3, i4]
    l8: NewInstance<3, string>
    l9: NewArray<int> [i1]
    i10: InvokeStaticOrDirect<Main.f> [i1]
    l11: LoadString<4>
    v12: SuspendCheck
    v13: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[2], NodeLatency::of(5));
        assert_eq!(l[3], NodeLatency::new(2, 0));
        assert_eq!(l[4], NodeLatency::new(2, 5));
        assert_eq!(l[5], NodeLatency::of(4));
        assert_eq!(l[6], NodeLatency::of(5));
        assert_eq!(l[7], NodeLatency::of(3));
        assert_eq!(l[8], NodeLatency::new(17, 5));
        assert_eq!(l[9], NodeLatency::new(12, 5));
        assert_eq!(l[10], NodeLatency::new(10, 5));
        assert_eq!(l[11], NodeLatency::new(7, 5));
        assert_eq!(l[12], NodeLatency::ZERO);
    }

    #[test]
    fn test_rejects_arm_only_node() {
        let graph = hir_parser::parse_method(
            "method m {\n  B0 {\n    i0: ArmDexCacheArraysBase<0>\n    v1: ReturnVoid\n  }\n}\n",
        )
        .unwrap();
        let visitor = SchedulingLatencyVisitorArm64;
        let instr = graph.instructions().next().unwrap();
        assert!(matches!(
            visitor.calculate_latency(&graph, instr),
            Err(Error::UnsupportedInstruction { .. })
        ));
        assert!(!visitor.is_target_schedulable(instr.kind()));
        assert!(visitor.is_target_schedulable(&InstructionKind::IntermediateAddress));
    }
}
