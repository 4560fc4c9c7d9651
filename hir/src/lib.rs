//! High-level IR of an optimizing compiler: typed instructions in basic
//! blocks, with use lists, deoptimization environments and loop information.

mod cfg;
mod graph;
mod instruction;
mod side_effects;
mod types;

pub use graph::{BasicBlock, BlockId, Graph, InstrId, Module};
pub use instruction::{
    BinaryOp, ComparisonBias, Environment, FieldInfo, IfCondition, Instruction, InstructionKind,
    InvokeKind, MonitorKind, ShifterOpKind, UnaryOp,
};
pub use side_effects::SideEffects;
pub use types::Type;

pub use ordered_float::OrderedFloat;
