use std::fmt::{self, Display};

use ordered_float::OrderedFloat;
use smallvec::SmallVec;

use crate::{BlockId, InstrId, SideEffects, Type};

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
    BooleanNot,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    And,
    Div,
    Mul,
    Or,
    Rem,
    Ror,
    Shl,
    Shr,
    Sub,
    UShr,
    Xor,
}

impl BinaryOp {
    pub fn is_shift(self) -> bool {
        matches!(self, BinaryOp::Shl | BinaryOp::Shr | BinaryOp::UShr | BinaryOp::Ror)
    }

    pub fn name(self) -> &'static str {
        match self {
            BinaryOp::Add => "Add",
            BinaryOp::And => "And",
            BinaryOp::Div => "Div",
            BinaryOp::Mul => "Mul",
            BinaryOp::Or => "Or",
            BinaryOp::Rem => "Rem",
            BinaryOp::Ror => "Ror",
            BinaryOp::Shl => "Shl",
            BinaryOp::Shr => "Shr",
            BinaryOp::Sub => "Sub",
            BinaryOp::UShr => "UShr",
            BinaryOp::Xor => "Xor",
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum IfCondition {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// unsigned `<`
    Below,
    BelowOrEqual,
    Above,
    AboveOrEqual,
}

impl IfCondition {
    pub fn name(self) -> &'static str {
        match self {
            IfCondition::Equal => "Equal",
            IfCondition::NotEqual => "NotEqual",
            IfCondition::LessThan => "LessThan",
            IfCondition::LessThanOrEqual => "LessThanOrEqual",
            IfCondition::GreaterThan => "GreaterThan",
            IfCondition::GreaterThanOrEqual => "GreaterThanOrEqual",
            IfCondition::Below => "Below",
            IfCondition::BelowOrEqual => "BelowOrEqual",
            IfCondition::Above => "Above",
            IfCondition::AboveOrEqual => "AboveOrEqual",
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, Default)]
pub enum ComparisonBias {
    #[default]
    NoBias,
    GtBias,
    LtBias,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum InvokeKind {
    StaticOrDirect,
    Virtual,
    Interface,
    Unresolved,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum MonitorKind {
    Enter,
    Exit,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub enum ShifterOpKind {
    Lsl,
    Lsr,
    Asr,
    Uxtb,
    Uxth,
    Uxtw,
    Sxtb,
    Sxth,
    Sxtw,
}

impl ShifterOpKind {
    pub const ALL: [ShifterOpKind; 9] = [
        ShifterOpKind::Lsl,
        ShifterOpKind::Lsr,
        ShifterOpKind::Asr,
        ShifterOpKind::Uxtb,
        ShifterOpKind::Uxth,
        ShifterOpKind::Uxtw,
        ShifterOpKind::Sxtb,
        ShifterOpKind::Sxth,
        ShifterOpKind::Sxtw,
    ];

    pub fn is_shift(self) -> bool {
        matches!(self, ShifterOpKind::Lsl | ShifterOpKind::Lsr | ShifterOpKind::Asr)
    }

    pub fn is_extension(self) -> bool {
        !self.is_shift()
    }

    pub fn name(self) -> &'static str {
        match self {
            ShifterOpKind::Lsl => "lsl",
            ShifterOpKind::Lsr => "lsr",
            ShifterOpKind::Asr => "asr",
            ShifterOpKind::Uxtb => "uxtb",
            ShifterOpKind::Uxth => "uxth",
            ShifterOpKind::Uxtw => "uxtw",
            ShifterOpKind::Sxtb => "sxtb",
            ShifterOpKind::Sxth => "sxth",
            ShifterOpKind::Sxtw => "sxtw",
        }
    }
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
pub struct FieldInfo {
    pub offset: u32,
    pub field_type: Type,
    pub is_volatile: bool,
}

/// Every instruction the IR knows about. The set is closed so that passes
/// matching on it are checked for exhaustiveness.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub enum InstructionKind {
    IntConstant(i32),
    LongConstant(i64),
    FloatConstant(OrderedFloat<f32>),
    DoubleConstant(OrderedFloat<f64>),
    NullConstant,
    ParameterValue(u16),
    CurrentMethod,
    Phi,

    Unary(UnaryOp),
    Binary(BinaryOp),
    /// `[left, right]`, produces a boolean
    Condition(IfCondition),
    /// `[left, right]`, produces -1, 0 or 1
    Compare(ComparisonBias),
    /// `[input]`, converts to the instruction type
    TypeConversion,

    /// `[value]`, returns `value` when it is non-zero
    DivZeroCheck,
    /// `[object]`, returns `object` when it is non-null
    NullCheck,
    /// `[index, length]`, returns `index` when it is in range
    BoundsCheck,

    ArrayGet { is_string_char_at: bool },
    ArraySet { component_type: Type, needs_type_check: bool },
    ArrayLength { is_string_length: bool },

    InstanceFieldGet(FieldInfo),
    InstanceFieldSet(FieldInfo),
    StaticFieldGet(FieldInfo),
    StaticFieldSet(FieldInfo),
    UnresolvedInstanceFieldGet(u32),
    UnresolvedInstanceFieldSet(u32),
    UnresolvedStaticFieldGet(u32),
    UnresolvedStaticFieldSet(u32),

    Invoke { kind: InvokeKind, target: String },

    NewInstance { type_index: u32, is_string_alloc: bool },
    NewArray { component_type: Type },
    LoadString(u32),
    LoadClass(u32),
    ClinitCheck,
    InstanceOf,
    CheckCast,
    BoundType,
    ClassTableGet(u32),

    /// `[false_value, true_value, condition]`
    Select,

    Goto,
    /// `[condition]`; the first successor is taken when it holds
    If,
    /// `[value]`; successors are the cases in order, then the default
    PackedSwitch { start_value: i32, num_entries: u32 },
    Return,
    ReturnVoid,
    Throw,
    TryBoundary,
    Deoptimize,

    SuspendCheck,
    ClearException,
    LoadException,
    MemoryBarrier,
    MonitorOperation(MonitorKind),
    NativeDebugInfo,
    ParallelMove,

    IntermediateAddress,
    MultiplyAccumulate(BinaryOp),
    /// `[left, right]`, computes `left op !right`
    BitwiseNegatedRight(BinaryOp),
    /// `[left, right]`, computes `left op shift(right)`
    DataProcWithShifterOp {
        op: BinaryOp,
        shift: ShifterOpKind,
        shift_amount: u32,
    },
    ArmDexCacheArraysBase(u32),
}

impl InstructionKind {
    pub fn debug_name(&self) -> &'static str {
        use InstructionKind::*;
        match self {
            IntConstant(_) => "IntConstant",
            LongConstant(_) => "LongConstant",
            FloatConstant(_) => "FloatConstant",
            DoubleConstant(_) => "DoubleConstant",
            NullConstant => "NullConstant",
            ParameterValue(_) => "ParameterValue",
            CurrentMethod => "CurrentMethod",
            Phi => "Phi",
            Unary(UnaryOp::Neg) => "Neg",
            Unary(UnaryOp::Not) => "Not",
            Unary(UnaryOp::BooleanNot) => "BooleanNot",
            Binary(op) => op.name(),
            Condition(cond) => cond.name(),
            Compare(_) => "Compare",
            TypeConversion => "TypeConversion",
            DivZeroCheck => "DivZeroCheck",
            NullCheck => "NullCheck",
            BoundsCheck => "BoundsCheck",
            ArrayGet { .. } => "ArrayGet",
            ArraySet { .. } => "ArraySet",
            ArrayLength { .. } => "ArrayLength",
            InstanceFieldGet(_) => "InstanceFieldGet",
            InstanceFieldSet(_) => "InstanceFieldSet",
            StaticFieldGet(_) => "StaticFieldGet",
            StaticFieldSet(_) => "StaticFieldSet",
            UnresolvedInstanceFieldGet(_) => "UnresolvedInstanceFieldGet",
            UnresolvedInstanceFieldSet(_) => "UnresolvedInstanceFieldSet",
            UnresolvedStaticFieldGet(_) => "UnresolvedStaticFieldGet",
            UnresolvedStaticFieldSet(_) => "UnresolvedStaticFieldSet",
            Invoke { kind, .. } => match kind {
                InvokeKind::StaticOrDirect => "InvokeStaticOrDirect",
                InvokeKind::Virtual => "InvokeVirtual",
                InvokeKind::Interface => "InvokeInterface",
                InvokeKind::Unresolved => "InvokeUnresolved",
            },
            NewInstance { .. } => "NewInstance",
            NewArray { .. } => "NewArray",
            LoadString(_) => "LoadString",
            LoadClass(_) => "LoadClass",
            ClinitCheck => "ClinitCheck",
            InstanceOf => "InstanceOf",
            CheckCast => "CheckCast",
            BoundType => "BoundType",
            ClassTableGet(_) => "ClassTableGet",
            Select => "Select",
            Goto => "Goto",
            If => "If",
            PackedSwitch { .. } => "PackedSwitch",
            Return => "Return",
            ReturnVoid => "ReturnVoid",
            Throw => "Throw",
            TryBoundary => "TryBoundary",
            Deoptimize => "Deoptimize",
            SuspendCheck => "SuspendCheck",
            ClearException => "ClearException",
            LoadException => "LoadException",
            MemoryBarrier => "MemoryBarrier",
            MonitorOperation(_) => "MonitorOperation",
            NativeDebugInfo => "NativeDebugInfo",
            ParallelMove => "ParallelMove",
            IntermediateAddress => "IntermediateAddress",
            MultiplyAccumulate(_) => "MultiplyAccumulate",
            BitwiseNegatedRight(_) => "BitwiseNegatedRight",
            DataProcWithShifterOp { .. } => "DataProcWithShifterOp",
            ArmDexCacheArraysBase(_) => "ArmDexCacheArraysBase",
        }
    }

    pub fn is_constant(&self) -> bool {
        use InstructionKind::*;
        matches!(
            self,
            IntConstant(_) | LongConstant(_) | FloatConstant(_) | DoubleConstant(_) | NullConstant
        )
    }

    pub fn as_i64_constant(&self) -> Option<i64> {
        match self {
            InstructionKind::IntConstant(v) => Some(i64::from(*v)),
            InstructionKind::LongConstant(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_control_flow(&self) -> bool {
        use InstructionKind::*;
        matches!(
            self,
            Goto | If | PackedSwitch { .. } | Return | ReturnVoid | Throw | TryBoundary | Deoptimize
        )
    }

    pub fn is_unary_operation(&self) -> bool {
        matches!(self, InstructionKind::Unary(_))
    }

    pub fn is_binary_operation(&self) -> bool {
        matches!(
            self,
            InstructionKind::Binary(_) | InstructionKind::Condition(_) | InstructionKind::Compare(_)
        )
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, InstructionKind::Condition(_))
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, InstructionKind::Phi)
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self, InstructionKind::Invoke { .. })
    }

    /// Number of inputs an instruction of this kind takes, or `None` when it
    /// varies (phis, invokes).
    pub fn input_count(&self) -> Option<usize> {
        use InstructionKind::*;
        let count = match self {
            Phi | Invoke { .. } => return None,
            IntConstant(_)
            | LongConstant(_)
            | FloatConstant(_)
            | DoubleConstant(_)
            | NullConstant
            | ParameterValue(_)
            | CurrentMethod
            | StaticFieldGet(_)
            | UnresolvedStaticFieldGet(_)
            | NewInstance { .. }
            | LoadString(_)
            | LoadClass(_)
            | Goto
            | ReturnVoid
            | TryBoundary
            | SuspendCheck
            | ClearException
            | LoadException
            | MemoryBarrier
            | NativeDebugInfo
            | ParallelMove
            | ArmDexCacheArraysBase(_) => 0,
            Unary(_)
            | TypeConversion
            | DivZeroCheck
            | NullCheck
            | ArrayLength { .. }
            | InstanceFieldGet(_)
            | StaticFieldSet(_)
            | UnresolvedInstanceFieldGet(_)
            | UnresolvedStaticFieldSet(_)
            | NewArray { .. }
            | ClinitCheck
            | BoundType
            | ClassTableGet(_)
            | If
            | PackedSwitch { .. }
            | Return
            | Throw
            | Deoptimize
            | MonitorOperation(_) => 1,
            Binary(_)
            | Condition(_)
            | Compare(_)
            | BoundsCheck
            | ArrayGet { .. }
            | InstanceFieldSet(_)
            | UnresolvedInstanceFieldSet(_)
            | InstanceOf
            | CheckCast
            | IntermediateAddress
            | BitwiseNegatedRight(_)
            | DataProcWithShifterOp { .. } => 2,
            ArraySet { .. } | Select | MultiplyAccumulate(_) => 3,
        };
        Some(count)
    }

    pub fn side_effects(&self, ty: Type) -> SideEffects {
        use InstructionKind::*;
        match self {
            ArrayGet { .. } => SideEffects::array_read_of_type(ty),
            ArraySet { component_type, .. } => {
                let write = SideEffects::array_write_of_type(*component_type);
                if *component_type == Type::Reference {
                    write.union(SideEffects::can_trigger_gc())
                } else {
                    write
                }
            }
            InstanceFieldGet(field) | StaticFieldGet(field) => {
                SideEffects::field_read_of_type(field.field_type, field.is_volatile)
            }
            InstanceFieldSet(field) | StaticFieldSet(field) => {
                SideEffects::field_write_of_type(field.field_type, field.is_volatile)
            }
            UnresolvedInstanceFieldGet(_)
            | UnresolvedInstanceFieldSet(_)
            | UnresolvedStaticFieldGet(_)
            | UnresolvedStaticFieldSet(_)
            | Invoke { .. }
            | MonitorOperation(_) => SideEffects::all_except_gc_dependency(),
            BoundsCheck
            | NewInstance { .. }
            | NewArray { .. }
            | LoadString(_)
            | LoadClass(_)
            | InstanceOf
            | CheckCast
            | SuspendCheck => SideEffects::can_trigger_gc(),
            ClinitCheck => SideEffects::all_changes(),
            Deoptimize => SideEffects::all(),
            MemoryBarrier => SideEffects::all_writes_and_reads(),
            ClearException => SideEffects::all_writes(),
            IntConstant(_)
            | LongConstant(_)
            | FloatConstant(_)
            | DoubleConstant(_)
            | NullConstant
            | ParameterValue(_)
            | CurrentMethod
            | Phi
            | Unary(_)
            | Binary(_)
            | Condition(_)
            | Compare(_)
            | TypeConversion
            | DivZeroCheck
            | NullCheck
            | ArrayLength { .. }
            | BoundType
            | ClassTableGet(_)
            | Select
            | Goto
            | If
            | PackedSwitch { .. }
            | Return
            | ReturnVoid
            | Throw
            | TryBoundary
            | LoadException
            | NativeDebugInfo
            | ParallelMove
            | IntermediateAddress
            | MultiplyAccumulate(_)
            | BitwiseNegatedRight(_)
            | DataProcWithShifterOp { .. }
            | ArmDexCacheArraysBase(_) => SideEffects::none(),
        }
    }

    pub fn can_throw(&self) -> bool {
        use InstructionKind::*;
        match self {
            DivZeroCheck
            | NullCheck
            | BoundsCheck
            | UnresolvedInstanceFieldGet(_)
            | UnresolvedInstanceFieldSet(_)
            | UnresolvedStaticFieldGet(_)
            | UnresolvedStaticFieldSet(_)
            | Invoke { .. }
            | NewInstance { .. }
            | NewArray { .. }
            | LoadString(_)
            | LoadClass(_)
            | ClinitCheck
            | CheckCast
            | Throw
            | Deoptimize
            | MonitorOperation(_) => true,
            ArraySet {
                needs_type_check, ..
            } => *needs_type_check,
            _ => false,
        }
    }
}

/// Snapshot of the values live at an instruction, kept for deoptimization
/// and debugging. Slots may be empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    pub values: Vec<Option<InstrId>>,
}

impl Environment {
    pub fn new(values: Vec<Option<InstrId>>) -> Self {
        Self { values }
    }

    pub fn iter(&self) -> impl Iterator<Item = InstrId> + '_ {
        self.values.iter().flatten().copied()
    }
}

#[derive(Debug, Clone)]
pub struct Instruction {
    pub(crate) id: InstrId,
    pub(crate) kind: InstructionKind,
    pub(crate) ty: Type,
    pub(crate) block: BlockId,
    pub(crate) inputs: SmallVec<[InstrId; 3]>,
    pub(crate) uses: Vec<InstrId>,
    pub(crate) environment: Option<Environment>,
    pub(crate) env_uses: Vec<InstrId>,
}

impl Instruction {
    #[inline]
    pub fn id(&self) -> InstrId {
        self.id
    }
    #[inline]
    pub fn kind(&self) -> &InstructionKind {
        &self.kind
    }
    #[inline]
    pub fn ty(&self) -> Type {
        self.ty
    }
    #[inline]
    pub fn block(&self) -> BlockId {
        self.block
    }
    #[inline]
    pub fn inputs(&self) -> &[InstrId] {
        &self.inputs
    }
    #[inline]
    pub fn input_at(&self, index: usize) -> InstrId {
        self.inputs[index]
    }
    #[inline]
    pub fn uses(&self) -> &[InstrId] {
        &self.uses
    }
    #[inline]
    pub fn env_uses(&self) -> &[InstrId] {
        &self.env_uses
    }
    #[inline]
    pub fn environment(&self) -> Option<&Environment> {
        self.environment.as_ref()
    }
    pub fn side_effects(&self) -> SideEffects {
        self.kind.side_effects(self.ty)
    }
    pub fn can_throw(&self) -> bool {
        self.kind.can_throw()
    }
    pub fn is_control_flow(&self) -> bool {
        self.kind.is_control_flow()
    }
    pub fn has_environment_uses(&self) -> bool {
        !self.env_uses.is_empty()
    }
    pub fn has_only_one_non_environment_use(&self) -> bool {
        !self.has_environment_uses() && self.uses.len() == 1
    }
    pub fn debug_name(&self) -> &'static str {
        self.kind.debug_name()
    }
}

fn fmt_float(f: &mut fmt::Formatter<'_>, v: f64) -> fmt::Result {
    if v.is_nan() {
        write!(f, "NaN")
    } else if v.is_infinite() {
        write!(f, "{}", if v > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{v:?}")
    }
}

impl Display for InstructionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use InstructionKind::*;
        write!(f, "{}", self.debug_name())?;
        match self {
            IntConstant(v) => write!(f, "<{v}>"),
            LongConstant(v) => write!(f, "<{v}>"),
            FloatConstant(v) => {
                write!(f, "<")?;
                if v.0.is_finite() {
                    write!(f, "{:?}", v.0)?;
                } else {
                    fmt_float(f, f64::from(v.0))?;
                }
                write!(f, ">")
            }
            DoubleConstant(v) => {
                write!(f, "<")?;
                fmt_float(f, v.0)?;
                write!(f, ">")
            }
            ParameterValue(index) => write!(f, "<{index}>"),
            Compare(ComparisonBias::GtBias) => write!(f, "<gt>"),
            Compare(ComparisonBias::LtBias) => write!(f, "<lt>"),
            ArrayGet {
                is_string_char_at: true,
            } => write!(f, "<string_char_at>"),
            ArrayLength {
                is_string_length: true,
            } => write!(f, "<string_length>"),
            InstanceFieldGet(field)
            | InstanceFieldSet(field)
            | StaticFieldGet(field)
            | StaticFieldSet(field) => {
                if field.is_volatile {
                    write!(f, "<{}, volatile>", field.offset)
                } else {
                    write!(f, "<{}>", field.offset)
                }
            }
            UnresolvedInstanceFieldGet(index)
            | UnresolvedInstanceFieldSet(index)
            | UnresolvedStaticFieldGet(index)
            | UnresolvedStaticFieldSet(index)
            | LoadString(index)
            | LoadClass(index)
            | ClassTableGet(index)
            | ArmDexCacheArraysBase(index) => write!(f, "<{index}>"),
            Invoke { target, .. } => write!(f, "<{target}>"),
            NewInstance {
                type_index,
                is_string_alloc,
            } => {
                if *is_string_alloc {
                    write!(f, "<{type_index}, string>")
                } else {
                    write!(f, "<{type_index}>")
                }
            }
            NewArray { component_type } => write!(f, "<{component_type}>"),
            PackedSwitch {
                start_value,
                num_entries,
            } => write!(f, "<{start_value}, {num_entries}>"),
            MonitorOperation(MonitorKind::Enter) => write!(f, "<enter>"),
            MonitorOperation(MonitorKind::Exit) => write!(f, "<exit>"),
            MultiplyAccumulate(op) | BitwiseNegatedRight(op) => {
                write!(f, "<{}>", op.name().to_ascii_lowercase())
            }
            DataProcWithShifterOp {
                op,
                shift,
                shift_amount,
            } => write!(
                f,
                "<{}, {}, {shift_amount}>",
                op.name().to_ascii_lowercase(),
                shift.name()
            ),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_attributes() {
        let field = FieldInfo {
            offset: 8,
            field_type: Type::Int,
            is_volatile: true,
        };
        assert_eq!(
            InstructionKind::InstanceFieldGet(field).to_string(),
            "InstanceFieldGet<8, volatile>"
        );
        assert_eq!(
            InstructionKind::FloatConstant(OrderedFloat(10.0)).to_string(),
            "FloatConstant<10.0>"
        );
        assert_eq!(
            InstructionKind::DoubleConstant(OrderedFloat(f64::NEG_INFINITY)).to_string(),
            "DoubleConstant<-inf>"
        );
        assert_eq!(
            InstructionKind::DataProcWithShifterOp {
                op: BinaryOp::Add,
                shift: ShifterOpKind::Lsl,
                shift_amount: 2
            }
            .to_string(),
            "DataProcWithShifterOp<add, lsl, 2>"
        );
        assert_eq!(InstructionKind::Condition(IfCondition::Below).to_string(), "Below");
    }

    #[test]
    fn test_throwing_instructions() {
        assert!(InstructionKind::DivZeroCheck.can_throw());
        assert!(!InstructionKind::Binary(BinaryOp::Div).can_throw());
        assert!(InstructionKind::ArraySet {
            component_type: Type::Reference,
            needs_type_check: true
        }
        .can_throw());
        assert!(!InstructionKind::ArraySet {
            component_type: Type::Int,
            needs_type_check: false
        }
        .can_throw());
    }

    #[test]
    fn test_side_effects_of_memory_accesses() {
        let get = InstructionKind::ArrayGet {
            is_string_char_at: false,
        };
        let set = InstructionKind::ArraySet {
            component_type: Type::Int,
            needs_type_check: false,
        };
        assert!(get
            .side_effects(Type::Int)
            .may_depend_on(set.side_effects(Type::Void)));
        assert!(InstructionKind::Binary(BinaryOp::Add)
            .side_effects(Type::Int)
            .does_nothing());
        assert!(InstructionKind::Invoke {
            kind: InvokeKind::StaticOrDirect,
            target: "Main.foo".to_string()
        }
        .side_effects(Type::Void)
        .does_any_write());
    }
}
