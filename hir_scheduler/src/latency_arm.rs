use hir::{BinaryOp, FieldInfo, Graph, Instruction, InstructionKind, Type};

use crate::latency::{
    constant_right_operand, kind_of, ConstantDivisor, NodeLatency, SchedulingLatencyVisitor,
};
use crate::Error;

const INTEGER_OP_LATENCY: u32 = 2;
const FLOATING_POINT_OP_LATENCY: u32 = 11;
const DATA_PROC_WITH_SHIFTER_OP_LATENCY: u32 = 4;
const MUL_INTEGER_LATENCY: u32 = 6;
const MUL_FLOATING_POINT_LATENCY: u32 = 11;
const DIV_INTEGER_LATENCY: u32 = 10;
const DIV_FLOAT_LATENCY: u32 = 20;
const DIV_DOUBLE_LATENCY: u32 = 25;
const TYPE_CONVERSION_FLOATING_POINT_INTEGER_LATENCY: u32 = 11;
const MEMORY_LOAD_LATENCY: u32 = 9;
const MEMORY_STORE_LATENCY: u32 = 9;
const MEMORY_BARRIER_LATENCY: u32 = 6;
const BRANCH_LATENCY: u32 = 4;
const CALL_LATENCY: u32 = 5;
const CALL_INTERNAL_LATENCY: u32 = 29;
const LOAD_STRING_INTERNAL_LATENCY: u32 = 10;
const NOP_LATENCY: u32 = 2;
const LOAD_WITH_BAKER_READ_BARRIER_LATENCY: u32 = 18;
const RUNTIME_TYPE_CHECK_LATENCY: u32 = 46;

const MAX_LONG_SHIFT_DISTANCE: i64 = 63;

/// Code generation choices of the ARM backend that change instruction costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArmFeatures {
    pub has_atomic_ldrd_strd: bool,
    pub use_baker_read_barrier: bool,
    pub use_string_compression: bool,
    pub poison_heap_references: bool,
}

impl Default for ArmFeatures {
    fn default() -> Self {
        Self {
            has_atomic_ldrd_strd: true,
            use_baker_read_barrier: true,
            use_string_compression: true,
            poison_heap_references: false,
        }
    }
}

/// Cost model of a Cortex-A53 class core running 32-bit code.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedulingLatencyVisitorArm {
    features: ArmFeatures,
}

fn is_int_like(ty: Type) -> bool {
    matches!(
        ty,
        Type::Boolean | Type::Byte | Type::Char | Type::Short | Type::Int
    )
}

impl SchedulingLatencyVisitorArm {
    pub fn new(features: ArmFeatures) -> Self {
        Self { features }
    }

    pub fn features(&self) -> ArmFeatures {
        self.features
    }

    fn add_sub(ty: Type) -> NodeLatency {
        match ty {
            // ADDS+ADC pairs, with a bubble for the carry flag
            Type::Long => NodeLatency::new(INTEGER_OP_LATENCY + NOP_LATENCY, INTEGER_OP_LATENCY),
            Type::Float | Type::Double => NodeLatency::of(FLOATING_POINT_OP_LATENCY),
            _ => NodeLatency::of(INTEGER_OP_LATENCY),
        }
    }

    fn mul(ty: Type) -> NodeLatency {
        match ty {
            Type::Long => NodeLatency::new(3 * MUL_INTEGER_LATENCY, INTEGER_OP_LATENCY),
            Type::Float | Type::Double => NodeLatency::of(MUL_FLOATING_POINT_LATENCY),
            _ => NodeLatency::of(MUL_INTEGER_LATENCY),
        }
    }

    fn bitwise(ty: Type) -> NodeLatency {
        match ty {
            Type::Long => NodeLatency::new(INTEGER_OP_LATENCY, INTEGER_OP_LATENCY),
            Type::Float | Type::Double => NodeLatency::of(FLOATING_POINT_OP_LATENCY),
            _ => NodeLatency::of(INTEGER_OP_LATENCY),
        }
    }

    fn ror(&self, graph: &Graph, instruction: &Instruction) -> Result<NodeLatency, Error> {
        let latency = match instruction.ty() {
            Type::Int => NodeLatency::of(INTEGER_OP_LATENCY),
            Type::Long => match constant_right_operand(graph, instruction) {
                Some(c) if c & MAX_LONG_SHIFT_DISTANCE != 0 => {
                    NodeLatency::new(3 * INTEGER_OP_LATENCY, INTEGER_OP_LATENCY)
                }
                Some(_) => NodeLatency::new(INTEGER_OP_LATENCY, INTEGER_OP_LATENCY),
                None => NodeLatency::new(9 * INTEGER_OP_LATENCY + BRANCH_LATENCY, BRANCH_LATENCY),
            },
            _ => return Err(self.unsupported(instruction)),
        };
        Ok(latency)
    }

    fn shift(&self, graph: &Graph, instruction: &Instruction) -> Result<NodeLatency, Error> {
        let distance = constant_right_operand(graph, instruction);
        let internal = match (instruction.ty(), distance) {
            (Type::Int, Some(_)) => 0,
            (Type::Int, None) => INTEGER_OP_LATENCY,
            (Type::Long, None) => 8 * INTEGER_OP_LATENCY,
            (Type::Long, Some(c)) => match c & MAX_LONG_SHIFT_DISTANCE {
                1 | 32.. => INTEGER_OP_LATENCY,
                _ => 2 * INTEGER_OP_LATENCY,
            },
            _ => return Err(self.unsupported(instruction)),
        };
        Ok(NodeLatency::new(internal, INTEGER_OP_LATENCY))
    }

    fn div_rem_by_constant(imm: i64) -> NodeLatency {
        match ConstantDivisor::classify(imm) {
            ConstantDivisor::Zero => NodeLatency::ZERO,
            ConstantDivisor::MinusOrPlusOne => NodeLatency::of(INTEGER_OP_LATENCY),
            ConstantDivisor::PowerOfTwo => {
                NodeLatency::new(3 * INTEGER_OP_LATENCY, INTEGER_OP_LATENCY)
            }
            ConstantDivisor::Other => NodeLatency::new(
                MUL_INTEGER_LATENCY + 2 * INTEGER_OP_LATENCY,
                INTEGER_OP_LATENCY,
            ),
        }
    }

    fn div(graph: &Graph, instruction: &Instruction) -> NodeLatency {
        match instruction.ty() {
            Type::Int => match constant_right_operand(graph, instruction) {
                Some(imm) => Self::div_rem_by_constant(imm),
                None => NodeLatency::of(DIV_INTEGER_LATENCY),
            },
            Type::Float => NodeLatency::of(DIV_FLOAT_LATENCY),
            Type::Double => NodeLatency::of(DIV_DOUBLE_LATENCY),
            _ => NodeLatency::new(CALL_INTERNAL_LATENCY, CALL_LATENCY),
        }
    }

    fn rem(graph: &Graph, instruction: &Instruction) -> NodeLatency {
        match instruction.ty() {
            Type::Int => match constant_right_operand(graph, instruction) {
                Some(imm) => Self::div_rem_by_constant(imm),
                None => NodeLatency::new(DIV_INTEGER_LATENCY, MUL_INTEGER_LATENCY),
            },
            _ => NodeLatency::new(CALL_INTERNAL_LATENCY, CALL_LATENCY),
        }
    }

    fn condition(graph: &Graph, instruction: &Instruction) -> NodeLatency {
        let internal = match graph.instruction(instruction.input_at(0)).ty() {
            Type::Long => 4 * INTEGER_OP_LATENCY,
            Type::Float | Type::Double => 2 * FLOATING_POINT_OP_LATENCY,
            _ => 2 * INTEGER_OP_LATENCY,
        };
        NodeLatency::new(internal, INTEGER_OP_LATENCY)
    }

    fn compare(graph: &Graph, instruction: &Instruction) -> NodeLatency {
        let internal = match graph.instruction(instruction.input_at(0)).ty() {
            Type::Long => 2 * INTEGER_OP_LATENCY + 3 * BRANCH_LATENCY,
            Type::Float | Type::Double => INTEGER_OP_LATENCY + 2 * FLOATING_POINT_OP_LATENCY,
            _ => 2 * INTEGER_OP_LATENCY,
        };
        NodeLatency::new(internal, INTEGER_OP_LATENCY)
    }

    fn data_proc(op: BinaryOp, mut acc: NodeLatency) -> NodeLatency {
        match op {
            BinaryOp::Add | BinaryOp::Sub => {
                NodeLatency::new(INTEGER_OP_LATENCY, INTEGER_OP_LATENCY)
            }
            _ => {
                acc.internal_latency += INTEGER_OP_LATENCY;
                acc.latency = DATA_PROC_WITH_SHIFTER_OP_LATENCY;
                acc
            }
        }
    }

    fn data_proc_with_shifter_op(
        instruction: &Instruction,
        op: BinaryOp,
        shift: hir::ShifterOpKind,
        shift_amount: u32,
    ) -> NodeLatency {
        if instruction.ty() == Type::Int {
            return NodeLatency::of(DATA_PROC_WITH_SHIFTER_OP_LATENCY);
        }
        if shift.is_extension() || shift_amount >= 32 {
            return Self::data_proc(op, NodeLatency::ZERO);
        }
        match op {
            BinaryOp::Or | BinaryOp::Xor => NodeLatency::new(
                2 * INTEGER_OP_LATENCY,
                DATA_PROC_WITH_SHIFTER_OP_LATENCY,
            ),
            _ => Self::data_proc(op, NodeLatency::new(2 * INTEGER_OP_LATENCY, 0)),
        }
    }

    fn array_get(
        &self,
        graph: &Graph,
        instruction: &Instruction,
        is_string_char_at: bool,
    ) -> Result<NodeLatency, Error> {
        let maybe_compressed_char_at = self.features.use_string_compression && is_string_char_at;
        let has_intermediate_address = matches!(
            kind_of(graph, instruction.input_at(0)),
            InstructionKind::IntermediateAddress
        );
        let constant_index = kind_of(graph, instruction.input_at(1)).is_constant();
        let mut l = NodeLatency::ZERO;
        match instruction.ty() {
            ty if is_int_like(ty) => {
                if maybe_compressed_char_at {
                    l.internal_latency += MEMORY_LOAD_LATENCY;
                }
                if !constant_index && !has_intermediate_address {
                    l.internal_latency += INTEGER_OP_LATENCY;
                }
                if maybe_compressed_char_at {
                    l.internal_latency +=
                        INTEGER_OP_LATENCY + BRANCH_LATENCY + MEMORY_LOAD_LATENCY;
                    l.latency = BRANCH_LATENCY;
                } else {
                    l.latency += MEMORY_LOAD_LATENCY;
                }
            }
            Type::Reference => {
                if self.features.use_baker_read_barrier {
                    l.latency = LOAD_WITH_BAKER_READ_BARRIER_LATENCY;
                } else if constant_index {
                    l.latency = MEMORY_LOAD_LATENCY;
                } else {
                    // the address computation is folded into the load cost
                    l.internal_latency = MEMORY_LOAD_LATENCY;
                }
            }
            Type::Long | Type::Float | Type::Double => {
                if !constant_index {
                    l.internal_latency += INTEGER_OP_LATENCY;
                }
                l.latency = MEMORY_LOAD_LATENCY;
            }
            _ => return Err(self.unsupported(instruction)),
        }
        Ok(l)
    }

    fn array_set(
        &self,
        graph: &Graph,
        instruction: &Instruction,
        component_type: Type,
    ) -> Result<NodeLatency, Error> {
        let has_intermediate_address = matches!(
            kind_of(graph, instruction.input_at(0)),
            InstructionKind::IntermediateAddress
        );
        let constant_index = kind_of(graph, instruction.input_at(1)).is_constant();
        let latency = match component_type {
            ty if is_int_like(ty) => {
                if constant_index || has_intermediate_address {
                    NodeLatency::of(MEMORY_STORE_LATENCY)
                } else {
                    NodeLatency::new(INTEGER_OP_LATENCY, MEMORY_STORE_LATENCY)
                }
            }
            Type::Reference => {
                let stores_null = matches!(
                    kind_of(graph, instruction.input_at(2)),
                    InstructionKind::NullConstant
                );
                if !stores_null {
                    NodeLatency::of(RUNTIME_TYPE_CHECK_LATENCY)
                } else if constant_index {
                    NodeLatency::of(MEMORY_STORE_LATENCY)
                } else {
                    NodeLatency::new(INTEGER_OP_LATENCY, MEMORY_STORE_LATENCY)
                }
            }
            Type::Long | Type::Float | Type::Double => {
                if constant_index {
                    NodeLatency::of(MEMORY_LOAD_LATENCY)
                } else {
                    NodeLatency::new(INTEGER_OP_LATENCY, MEMORY_LOAD_LATENCY)
                }
            }
            _ => return Err(self.unsupported(instruction)),
        };
        Ok(latency)
    }

    fn field_get(&self, field: &FieldInfo) -> NodeLatency {
        let split_access = field.is_volatile && !self.features.has_atomic_ldrd_strd;
        let mut l = match field.field_type {
            Type::Reference if self.features.use_baker_read_barrier => {
                NodeLatency::new(MEMORY_LOAD_LATENCY + INTEGER_OP_LATENCY, MEMORY_LOAD_LATENCY)
            }
            Type::Long if split_access => {
                NodeLatency::new(MEMORY_LOAD_LATENCY + INTEGER_OP_LATENCY, MEMORY_LOAD_LATENCY)
            }
            Type::Double if split_access => NodeLatency::new(
                MEMORY_LOAD_LATENCY + INTEGER_OP_LATENCY + MEMORY_LOAD_LATENCY,
                INTEGER_OP_LATENCY,
            ),
            _ => NodeLatency::of(MEMORY_LOAD_LATENCY),
        };
        if field.is_volatile {
            l.internal_latency += MEMORY_BARRIER_LATENCY;
        }
        l
    }

    fn field_set(&self, graph: &Graph, instruction: &Instruction, field: &FieldInfo) -> NodeLatency {
        let split_access = field.is_volatile && !self.features.has_atomic_ldrd_strd;
        match field.field_type {
            Type::Boolean | Type::Byte | Type::Short | Type::Char if field.is_volatile => {
                NodeLatency::new(
                    MEMORY_BARRIER_LATENCY + MEMORY_STORE_LATENCY,
                    MEMORY_BARRIER_LATENCY,
                )
            }
            Type::Int | Type::Reference => {
                let value = instruction.inputs().last().map(|&v| kind_of(graph, v));
                let needs_write_barrier = field.field_type == Type::Reference
                    && !matches!(value, Some(InstructionKind::NullConstant));
                if self.features.poison_heap_references && needs_write_barrier {
                    NodeLatency::new(2 * INTEGER_OP_LATENCY, MEMORY_STORE_LATENCY)
                } else {
                    NodeLatency::of(MEMORY_STORE_LATENCY)
                }
            }
            Type::Long if split_access => NodeLatency::new(
                INTEGER_OP_LATENCY + MEMORY_LOAD_LATENCY + MEMORY_STORE_LATENCY,
                INTEGER_OP_LATENCY,
            ),
            Type::Double if split_access => NodeLatency::new(
                2 * INTEGER_OP_LATENCY + MEMORY_LOAD_LATENCY + MEMORY_STORE_LATENCY,
                INTEGER_OP_LATENCY,
            ),
            _ => NodeLatency::of(MEMORY_STORE_LATENCY),
        }
    }

    fn type_conversion(graph: &Graph, instruction: &Instruction) -> NodeLatency {
        let input = graph.instruction(instruction.input_at(0)).ty();
        let fp_int = NodeLatency::new(
            TYPE_CONVERSION_FLOATING_POINT_INTEGER_LATENCY,
            FLOATING_POINT_OP_LATENCY,
        );
        // runtime call whose result latency is not modelled
        let runtime = NodeLatency::new(CALL_INTERNAL_LATENCY, 0);
        match instruction.ty() {
            Type::Byte | Type::Char | Type::Short => NodeLatency::of(INTEGER_OP_LATENCY),
            Type::Int => match input {
                Type::Float | Type::Double => fp_int,
                _ => NodeLatency::of(INTEGER_OP_LATENCY),
            },
            Type::Long => match input {
                Type::Float | Type::Double => runtime,
                _ => NodeLatency::new(INTEGER_OP_LATENCY, INTEGER_OP_LATENCY),
            },
            Type::Float => match input {
                ty if is_int_like(ty) => fp_int,
                Type::Long => runtime,
                _ => NodeLatency::of(FLOATING_POINT_OP_LATENCY),
            },
            Type::Double => match input {
                ty if is_int_like(ty) => fp_int,
                Type::Long => {
                    NodeLatency::new(5 * FLOATING_POINT_OP_LATENCY, FLOATING_POINT_OP_LATENCY)
                }
                _ => NodeLatency::of(FLOATING_POINT_OP_LATENCY),
            },
            _ => NodeLatency::of(TYPE_CONVERSION_FLOATING_POINT_INTEGER_LATENCY),
        }
    }
}

impl SchedulingLatencyVisitor for SchedulingLatencyVisitorArm {
    fn name(&self) -> &'static str {
        "arm"
    }

    fn calculate_latency(
        &self,
        graph: &Graph,
        instruction: &Instruction,
    ) -> Result<NodeLatency, Error> {
        use InstructionKind::*;
        let ty = instruction.ty();
        let latency = match instruction.kind() {
            Binary(BinaryOp::Add | BinaryOp::Sub) => Self::add_sub(ty),
            Binary(BinaryOp::Mul) => Self::mul(ty),
            Binary(BinaryOp::And | BinaryOp::Or | BinaryOp::Xor) => Self::bitwise(ty),
            Binary(BinaryOp::Ror) => self.ror(graph, instruction)?,
            Binary(BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr) => {
                self.shift(graph, instruction)?
            }
            Binary(BinaryOp::Div) => Self::div(graph, instruction),
            Binary(BinaryOp::Rem) => Self::rem(graph, instruction),
            Condition(_) => Self::condition(graph, instruction),
            Compare(_) => Self::compare(graph, instruction),
            BitwiseNegatedRight(_) => {
                if ty == Type::Int {
                    NodeLatency::of(INTEGER_OP_LATENCY)
                } else {
                    NodeLatency::new(INTEGER_OP_LATENCY, INTEGER_OP_LATENCY)
                }
            }
            DataProcWithShifterOp {
                op,
                shift,
                shift_amount,
            } => Self::data_proc_with_shifter_op(instruction, *op, *shift, *shift_amount),
            // spaced from its memory access users
            IntermediateAddress => NodeLatency::new(NOP_LATENCY, INTEGER_OP_LATENCY),
            MultiplyAccumulate(_) => NodeLatency::of(MUL_INTEGER_LATENCY),
            ArrayGet { is_string_char_at } => {
                self.array_get(graph, instruction, *is_string_char_at)?
            }
            ArrayLength { is_string_length } => {
                if self.features.use_string_compression && *is_string_length {
                    NodeLatency::new(MEMORY_LOAD_LATENCY, INTEGER_OP_LATENCY)
                } else {
                    NodeLatency::of(MEMORY_LOAD_LATENCY)
                }
            }
            ArraySet { component_type, .. } => {
                self.array_set(graph, instruction, *component_type)?
            }
            BoundsCheck => NodeLatency::new(INTEGER_OP_LATENCY, 0),
            InstanceFieldGet(field) | StaticFieldGet(field) => self.field_get(field),
            InstanceFieldSet(field) | StaticFieldSet(field) => {
                self.field_set(graph, instruction, field)
            }
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
                    2 * MEMORY_LOAD_LATENCY + CALL_INTERNAL_LATENCY
                } else {
                    CALL_INTERNAL_LATENCY
                };
                NodeLatency::new(internal, CALL_LATENCY)
            }
            SuspendCheck => NodeLatency::ZERO,
            TypeConversion => Self::type_conversion(graph, instruction),
            ArmDexCacheArraysBase(_) => NodeLatency::new(INTEGER_OP_LATENCY, INTEGER_OP_LATENCY),
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
                | InstructionKind::ArmDexCacheArraysBase(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn latencies_with(features: ArmFeatures, text: &str) -> Vec<NodeLatency> {
        let graph = hir_parser::parse_method(text).unwrap();
        let visitor = SchedulingLatencyVisitorArm::new(features);
        graph
            .instructions()
            .map(|instr| visitor.calculate_latency(&graph, instr).unwrap())
            .collect()
    }

    fn latencies(text: &str) -> Vec<NodeLatency> {
        latencies_with(ArmFeatures::default(), text)
    }

    #[test]
    fn test_long_arithmetic() {
        let l = latencies(
            r#"
method m {
  B0 {
    j0: ParameterValue<0>
    i1: IntConstant<40>
    i2: IntConstant<1>
    i3: IntConstant<64>
    j4: Add [j0, j0]
    j5: Mul [j0, j0]
    j6: Xor [j0, j0]
    j7: Shl [j0, i1]
    j8: Shl [j0, i2]
    j9: Shr [j0, i3]
    j10: UShr [j0, j0]
    j11: Ror [j0, i3]
    j12: Ror [j0, i1]
    j13: Ror [j0, j0]
    j14: Div [j0, j0]
    i15: Compare [j0, j0]
    z16: LessThan [j0, j0]
    v17: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[4], NodeLatency::new(4, 2));
        assert_eq!(l[5], NodeLatency::new(18, 2));
        assert_eq!(l[6], NodeLatency::new(2, 2));
        assert_eq!(l[7], NodeLatency::new(2, 2));
        assert_eq!(l[8], NodeLatency::new(2, 2));
        // 64 & 63 == 0
        assert_eq!(l[9], NodeLatency::new(4, 2));
        assert_eq!(l[10], NodeLatency::new(16, 2));
        assert_eq!(l[11], NodeLatency::new(2, 2));
        assert_eq!(l[12], NodeLatency::new(6, 2));
        assert_eq!(l[13], NodeLatency::new(22, 4));
        assert_eq!(l[14], NodeLatency::new(29, 5));
        assert_eq!(l[15], NodeLatency::new(16, 2));
        assert_eq!(l[16], NodeLatency::new(8, 2));
    }

    #[test]
    fn test_data_proc_with_shifter_op() {
        let l = latencies(
            r#"
method m {
  B0 {
    i0: ParameterValue<0>
    j1: ParameterValue<1>
    i2: DataProcWithShifterOp<add, lsl, 3> [i0, i0]
    j3: DataProcWithShifterOp<add, sxtw, 0> [j1, i0]
    j4: DataProcWithShifterOp<and, sxtw, 0> [j1, i0]
    j5: DataProcWithShifterOp<or, lsl, 3> [j1, j1]
    j6: DataProcWithShifterOp<and, lsl, 3> [j1, j1]
    j7: DataProcWithShifterOp<sub, lsl, 3> [j1, j1]
    j8: DataProcWithShifterOp<xor, asr, 33> [j1, j1]
    v9: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[2], NodeLatency::of(4));
        assert_eq!(l[3], NodeLatency::new(2, 2));
        assert_eq!(l[4], NodeLatency::new(2, 4));
        assert_eq!(l[5], NodeLatency::new(4, 4));
        assert_eq!(l[6], NodeLatency::new(6, 4));
        assert_eq!(l[7], NodeLatency::new(2, 2));
        assert_eq!(l[8], NodeLatency::new(2, 4));
    }

    #[test]
    fn test_arrays() {
        let l = latencies(
            r#"
method m {
  B0 {
    l0: ParameterValue<0>
    i1: ParameterValue<1>
    i2: IntConstant<0>
    c3: ArrayGet<string_char_at> [l0, i2]
    i4: ArrayGet [l0, i1]
    i5: ArrayGet [l0, i2]
    l6: ArrayGet [l0, i1]
    d7: ArrayGet [l0, i1]
    v8: ArraySet [l0, i1, i4]
    v9: ArraySet [l0, i2, i4]
    v10: ArraySet [l0, i1, l0]
    l11: NullConstant
    v12: ArraySet [l0, i1, l11]
    v13: ArraySet [l0, i1, d7]
    i14: ArrayLength<string_length> [l0]
    l15: IntermediateAddress [l0, i1]
    i16: ArrayGet [l15, i1]
    v17: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[3], NodeLatency::new(24, 4));
        assert_eq!(l[4], NodeLatency::new(2, 9));
        assert_eq!(l[5], NodeLatency::of(9));
        assert_eq!(l[6], NodeLatency::of(18));
        assert_eq!(l[7], NodeLatency::new(2, 9));
        assert_eq!(l[8], NodeLatency::new(2, 9));
        assert_eq!(l[9], NodeLatency::of(9));
        assert_eq!(l[10], NodeLatency::of(46));
        assert_eq!(l[12], NodeLatency::new(2, 9));
        assert_eq!(l[13], NodeLatency::new(2, 9));
        assert_eq!(l[14], NodeLatency::new(9, 2));
        assert_eq!(l[15], NodeLatency::new(2, 2));
        assert_eq!(l[16], NodeLatency::of(9));
    }

    #[test]
    fn test_reference_array_get_without_read_barrier() {
        let features = ArmFeatures {
            use_baker_read_barrier: false,
            ..Default::default()
        };
        let l = latencies_with(
            features,
            r#"
method m {
  B0 {
    l0: ParameterValue<0>
    i1: ParameterValue<1>
    i2: IntConstant<3>
    l3: ArrayGet [l0, i1]
    l4: ArrayGet [l0, i2]
    v5: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[3], NodeLatency::new(9, 0));
        assert_eq!(l[4], NodeLatency::of(9));
    }

    #[test]
    fn test_volatile_fields() {
        let text = r#"
method m {
  B0 {
    l0: ParameterValue<0>
    j1: InstanceFieldGet<8, volatile> [l0]
    d2: InstanceFieldGet<16, volatile> [l0]
    i3: InstanceFieldGet<24> [l0]
    v4: InstanceFieldSet<8, volatile> [l0, j1]
    v5: InstanceFieldSet<16, volatile> [l0, d2]
    z6: IntConstant<1>
    v7: StaticFieldSet<4, volatile> [z6]
    l8: StaticFieldGet<32>
    v9: ReturnVoid
  }
}
"#;
        let atomic = latencies(text);
        assert_eq!(atomic[1], NodeLatency::new(6, 9));
        assert_eq!(atomic[2], NodeLatency::new(6, 9));
        assert_eq!(atomic[3], NodeLatency::of(9));
        assert_eq!(atomic[4], NodeLatency::of(9));
        assert_eq!(atomic[8], NodeLatency::new(11, 9));

        let split = latencies_with(
            ArmFeatures {
                has_atomic_ldrd_strd: false,
                ..Default::default()
            },
            text,
        );
        assert_eq!(split[1], NodeLatency::new(17, 9));
        assert_eq!(split[2], NodeLatency::new(26, 2));
        assert_eq!(split[4], NodeLatency::new(20, 2));
        assert_eq!(split[5], NodeLatency::new(22, 2));
    }

    #[test]
    fn test_type_conversions() {
        let l = latencies(
            r#"
method m {
  B0 {
    i0: ParameterValue<0>
    j1: ParameterValue<1>
    f2: ParameterValue<2>
    b3: TypeConversion [i0]
    i4: TypeConversion [f2]
    j5: TypeConversion [i0]
    j6: TypeConversion [f2]
    f7: TypeConversion [j1]
    d8: TypeConversion [j1]
    d9: TypeConversion [f2]
    i10: TypeConversion [j1]
    v11: ReturnVoid
  }
}
"#,
        );
        assert_eq!(l[3], NodeLatency::of(2));
        assert_eq!(l[4], NodeLatency::new(11, 11));
        assert_eq!(l[5], NodeLatency::new(2, 2));
        assert_eq!(l[6], NodeLatency::new(29, 0));
        assert_eq!(l[7], NodeLatency::new(29, 0));
        assert_eq!(l[8], NodeLatency::new(55, 11));
        assert_eq!(l[9], NodeLatency::of(11));
        assert_eq!(l[10], NodeLatency::of(2));
    }

    #[test]
    fn test_rotate_of_short_is_rejected() {
        let graph = hir_parser::parse_method(
            "method m {\n  B0 {\n    s0: ParameterValue<0>\n    s1: Ror [s0, s0]\n    v2: ReturnVoid\n  }\n}\n",
        )
        .unwrap();
        let visitor = SchedulingLatencyVisitorArm::default();
        let ror = graph.instructions().nth(1).unwrap();
        assert!(visitor.calculate_latency(&graph, ror).is_err());
        assert!(visitor.is_target_schedulable(&InstructionKind::ArmDexCacheArraysBase(0)));
    }
}
