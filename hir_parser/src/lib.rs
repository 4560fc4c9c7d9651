//! Reads the textual form of HIR printed by `hir::Graph`'s `Display`.
//!
//! ```text
//! method Main.f {
//!   B0 -> B1 {
//!     i0: IntConstant<1>
//!     v1: Goto
//!   }
//!   B1 {
//!     v2: Return [i0]
//!   }
//! }
//! ```

use std::{collections::HashMap, str::FromStr};

use hir::{
    BinaryOp, BlockId, ComparisonBias, Environment, FieldInfo, Graph, IfCondition, InstrId,
    InstructionKind, InvokeKind, Module, MonitorKind, OrderedFloat, ShifterOpKind, Type, UnaryOp,
};
use once_cell::sync::Lazy;
use parser::{BlockAttr, BlockHeader, InstrLine, LineKind, LineType, Span, Spanned};
use thiserror::Error;

mod parser;

pub struct Diagnosis {
    pub range: (usize, usize),
    pub label: String,
    pub level: DiagnosisLevel,
    pub info: Option<AdditionalInfo>,
}

pub struct AdditionalInfo {
    pub line: usize,
    pub range: (usize, usize),
    pub label: String,
}

impl Diagnosis {
    pub fn new(range: (usize, usize), label: String) -> Self {
        Self {
            range,
            label,
            level: DiagnosisLevel::Error,
            info: None,
        }
    }
    pub fn info(mut self, info: AdditionalInfo) -> Self {
        self.info = Some(info);
        self
    }
}

pub enum DiagnosisLevel {
    Error,
}

#[derive(Debug, PartialEq, Error)]
pub enum ErrorKind<'input> {
    #[error("failed to parse HIR")]
    PegError(#[from] peg::error::ParseError<peg::str::LineCol>),
    #[error("unexpected {1}")]
    UnexpectedLine(Span, LineType),
    #[error("unexpected end of input inside a method")]
    UnexpectedEof,
    #[error("unknown opcode `{0}`")]
    UnknownOpcode(Spanned<&'input str>),
    #[error("unknown type prefix in `{0}`")]
    UnknownTypePrefix(Spanned<&'input str>),
    #[error("use of undefined value `{0}`")]
    UnknownValue(Spanned<&'input str>),
    #[error("value `{second_occur}` is defined twice")]
    DuplicateValue {
        second_occur: Spanned<&'input str>,
        previous: (usize, Span),
    },
    #[error("block B{0} is defined twice")]
    DuplicateBlock(Spanned<u32>),
    #[error("reference to undefined block B{0}")]
    UnknownBlock(Spanned<u32>),
    #[error("invalid attribute of `{opcode}`, expected {expected}")]
    BadAttribute {
        opcode: Spanned<&'input str>,
        at: Span,
        expected: &'static str,
    },
    #[error("`{opcode}` takes {expected} inputs, found {actual}")]
    InputCount {
        opcode: Spanned<&'input str>,
        expected: usize,
        actual: usize,
    },
    #[error("method `{0}` has no blocks")]
    EmptyMethod(Spanned<&'input str>),
    #[error("expected exactly one method, found {0}")]
    MethodCount(usize),
}

impl<'input> ErrorKind<'input> {
    pub fn diagnosis(&self) -> Diagnosis {
        match self {
            ErrorKind::PegError(peg::error::ParseError { location, expected }) => {
                let loc = location.offset;
                Diagnosis::new((loc, loc + 1), format!("expected {expected}"))
            }
            ErrorKind::UnexpectedLine(span, kind) => {
                Diagnosis::new(*span, format!("{kind} is not allowed here"))
            }
            ErrorKind::UnexpectedEof => {
                Diagnosis::new((0, 0), "missing closing brace".to_string())
            }
            ErrorKind::UnknownOpcode(name) => {
                Diagnosis::new(name.span, format!("unknown opcode `{name}`"))
            }
            ErrorKind::UnknownTypePrefix(name) => Diagnosis::new(
                (name.span.0, name.span.0 + 1),
                "first letter must be one of l z b c s i j f d v".to_string(),
            ),
            ErrorKind::UnknownValue(name) => {
                Diagnosis::new(name.span, format!("`{name}` is not defined in this method"))
            }
            ErrorKind::DuplicateValue {
                second_occur,
                previous,
            } => {
                let (line, span) = *previous;
                Diagnosis::new(
                    second_occur.span,
                    format!("second definition of `{second_occur}`"),
                )
                .info(AdditionalInfo {
                    line,
                    range: span,
                    label: format!("first definition of `{second_occur}`"),
                })
            }
            ErrorKind::DuplicateBlock(b) => {
                Diagnosis::new(b.span, format!("B{b} is already defined"))
            }
            ErrorKind::UnknownBlock(b) => Diagnosis::new(b.span, format!("no block B{b}")),
            ErrorKind::BadAttribute { at, expected, .. } => {
                Diagnosis::new(*at, format!("expected {expected}"))
            }
            ErrorKind::InputCount {
                opcode,
                expected,
                actual,
            } => Diagnosis::new(
                opcode.span,
                format!("expected {expected} inputs, actual {actual}"),
            ),
            ErrorKind::EmptyMethod(name) => {
                Diagnosis::new(name.span, "method without blocks".to_string())
            }
            ErrorKind::MethodCount(n) => {
                Diagnosis::new((0, 0), format!("{n} methods in input"))
            }
        }
    }
}

#[derive(Debug, PartialEq, Error)]
#[error("line {line_number}: {inner}")]
pub struct Error<'input> {
    pub line_number: usize,
    pub inner: ErrorKind<'input>,
}

impl<'a> ErrorKind<'a> {
    #[inline]
    fn at(self, line_number: usize) -> Error<'a> {
        Error {
            line_number,
            inner: self,
        }
    }
}

type Result<'input, T> = ::std::result::Result<T, Error<'input>>;

static PLAIN_OPCODES: Lazy<HashMap<&'static str, InstructionKind>> = Lazy::new(|| {
    use InstructionKind::*;
    let binary = [
        BinaryOp::Add,
        BinaryOp::And,
        BinaryOp::Div,
        BinaryOp::Mul,
        BinaryOp::Or,
        BinaryOp::Rem,
        BinaryOp::Ror,
        BinaryOp::Shl,
        BinaryOp::Shr,
        BinaryOp::Sub,
        BinaryOp::UShr,
        BinaryOp::Xor,
    ]
    .map(Binary);
    let conditions = [
        IfCondition::Equal,
        IfCondition::NotEqual,
        IfCondition::LessThan,
        IfCondition::LessThanOrEqual,
        IfCondition::GreaterThan,
        IfCondition::GreaterThanOrEqual,
        IfCondition::Below,
        IfCondition::BelowOrEqual,
        IfCondition::Above,
        IfCondition::AboveOrEqual,
    ]
    .map(Condition);
    let others = [
        NullConstant,
        CurrentMethod,
        Phi,
        Unary(UnaryOp::Neg),
        Unary(UnaryOp::Not),
        Unary(UnaryOp::BooleanNot),
        TypeConversion,
        DivZeroCheck,
        NullCheck,
        BoundsCheck,
        ClinitCheck,
        InstanceOf,
        CheckCast,
        BoundType,
        Select,
        Goto,
        If,
        Return,
        ReturnVoid,
        Throw,
        TryBoundary,
        Deoptimize,
        SuspendCheck,
        ClearException,
        LoadException,
        MemoryBarrier,
        NativeDebugInfo,
        ParallelMove,
        IntermediateAddress,
    ];
    binary
        .into_iter()
        .chain(conditions)
        .chain(others)
        .map(|kind| (kind.debug_name(), kind))
        .collect()
});

struct Attrs<'a, 'input> {
    opcode: Spanned<&'input str>,
    attrs: &'a [Spanned<&'input str>],
}

impl<'a, 'input> Attrs<'a, 'input> {
    fn error(&self, at: Span, expected: &'static str) -> ErrorKind<'input> {
        ErrorKind::BadAttribute {
            opcode: self.opcode,
            at,
            expected,
        }
    }

    fn get<T: FromStr>(&self, index: usize, expected: &'static str) -> std::result::Result<T, ErrorKind<'input>> {
        let attr = self
            .attrs
            .get(index)
            .ok_or_else(|| self.error(self.opcode.span, expected))?;
        attr.parse().map_err(|_| self.error(attr.span, expected))
    }

    fn flag(&self, index: usize, word: &'static str) -> std::result::Result<bool, ErrorKind<'input>> {
        match self.attrs.get(index) {
            None => Ok(false),
            Some(attr) if attr.inner == word => Ok(true),
            Some(attr) => Err(self.error(attr.span, word)),
        }
    }

    fn keyword<T: Copy>(
        &self,
        index: usize,
        table: &[(&str, T)],
        expected: &'static str,
    ) -> std::result::Result<T, ErrorKind<'input>> {
        let attr = self
            .attrs
            .get(index)
            .ok_or_else(|| self.error(self.opcode.span, expected))?;
        table
            .iter()
            .find(|(name, _)| *name == attr.inner)
            .map(|(_, v)| *v)
            .ok_or_else(|| self.error(attr.span, expected))
    }

    fn at_most(&self, n: usize) -> std::result::Result<(), ErrorKind<'input>> {
        match self.attrs.get(n) {
            Some(extra) => Err(self.error(extra.span, "no more attributes")),
            None => Ok(()),
        }
    }
}

const LOGICAL_OPS: [(&str, BinaryOp); 3] = [
    ("and", BinaryOp::And),
    ("or", BinaryOp::Or),
    ("xor", BinaryOp::Xor),
];

const DATA_PROC_OPS: [(&str, BinaryOp); 5] = [
    ("add", BinaryOp::Add),
    ("and", BinaryOp::And),
    ("or", BinaryOp::Or),
    ("sub", BinaryOp::Sub),
    ("xor", BinaryOp::Xor),
];

fn shifter_ops() -> Vec<(&'static str, ShifterOpKind)> {
    ShifterOpKind::ALL.iter().map(|k| (k.name(), *k)).collect()
}

fn types() -> Vec<(&'static str, Type)> {
    Type::ALL.iter().map(|t| (t.name(), *t)).collect()
}

struct ValueDef<'l, 'input> {
    line_number: usize,
    line: &'l InstrLine<'input>,
    block: BlockId,
    ty: Type,
    id: InstrId,
}

fn value_type<'input>(name: &Spanned<&'input str>) -> std::result::Result<Type, ErrorKind<'input>> {
    name.chars()
        .next()
        .and_then(Type::from_prefix)
        .ok_or(ErrorKind::UnknownTypePrefix(*name))
}

fn build_kind<'input>(
    def: &ValueDef<'_, 'input>,
    defs: &HashMap<&'input str, ValueDef<'_, 'input>>,
) -> std::result::Result<InstructionKind, ErrorKind<'input>> {
    use InstructionKind::*;
    let line = def.line;
    let opcode = line.opcode;
    let attrs = Attrs {
        opcode,
        attrs: &line.attrs,
    };
    // type of the `index`-th input, for kinds that carry the type of a stored value
    let input_type = |index: usize| -> std::result::Result<Type, ErrorKind<'input>> {
        let name = line.inputs.get(index).ok_or(ErrorKind::InputCount {
            opcode,
            expected: index + 1,
            actual: line.inputs.len(),
        })?;
        defs.get(name.inner)
            .map(|d| d.ty)
            .ok_or(ErrorKind::UnknownValue(*name))
    };
    let field = |ty: Type| -> std::result::Result<FieldInfo, ErrorKind<'input>> {
        let offset = attrs.get(0, "field offset")?;
        let is_volatile = attrs.flag(1, "volatile")?;
        attrs.at_most(2)?;
        Ok(FieldInfo {
            offset,
            field_type: ty,
            is_volatile,
        })
    };
    if let Some(kind) = PLAIN_OPCODES.get(opcode.inner) {
        attrs.at_most(0)?;
        return Ok(kind.clone());
    }
    let kind = match opcode.inner {
        "IntConstant" => IntConstant(attrs.get(0, "32-bit integer")?),
        "LongConstant" => LongConstant(attrs.get(0, "64-bit integer")?),
        "FloatConstant" => FloatConstant(OrderedFloat(attrs.get(0, "float")?)),
        "DoubleConstant" => DoubleConstant(OrderedFloat(attrs.get(0, "double")?)),
        "ParameterValue" => ParameterValue(attrs.get(0, "parameter index")?),
        "Compare" => {
            if line.attrs.is_empty() {
                Compare(ComparisonBias::NoBias)
            } else {
                Compare(attrs.keyword(
                    0,
                    &[("gt", ComparisonBias::GtBias), ("lt", ComparisonBias::LtBias)],
                    "`gt` or `lt`",
                )?)
            }
        }
        "ArrayGet" => ArrayGet {
            is_string_char_at: attrs.flag(0, "string_char_at")?,
        },
        "ArrayLength" => ArrayLength {
            is_string_length: attrs.flag(0, "string_length")?,
        },
        "ArraySet" => {
            let component_type = input_type(2)?;
            let value_is_null = line
                .inputs
                .get(2)
                .and_then(|v| defs.get(v.inner))
                .map_or(false, |d| d.line.opcode.inner == "NullConstant");
            ArraySet {
                component_type,
                needs_type_check: component_type == Type::Reference && !value_is_null,
            }
        }
        "InstanceFieldGet" => InstanceFieldGet(field(def.ty)?),
        "StaticFieldGet" => StaticFieldGet(field(def.ty)?),
        "InstanceFieldSet" => InstanceFieldSet(field(input_type(1)?)?),
        "StaticFieldSet" => StaticFieldSet(field(input_type(0)?)?),
        "UnresolvedInstanceFieldGet" => UnresolvedInstanceFieldGet(attrs.get(0, "field index")?),
        "UnresolvedInstanceFieldSet" => UnresolvedInstanceFieldSet(attrs.get(0, "field index")?),
        "UnresolvedStaticFieldGet" => UnresolvedStaticFieldGet(attrs.get(0, "field index")?),
        "UnresolvedStaticFieldSet" => UnresolvedStaticFieldSet(attrs.get(0, "field index")?),
        "InvokeStaticOrDirect" | "InvokeVirtual" | "InvokeInterface" | "InvokeUnresolved" => {
            let kind = match opcode.inner {
                "InvokeStaticOrDirect" => InvokeKind::StaticOrDirect,
                "InvokeVirtual" => InvokeKind::Virtual,
                "InvokeInterface" => InvokeKind::Interface,
                _ => InvokeKind::Unresolved,
            };
            let target: String = attrs.get(0, "method name")?;
            Invoke { kind, target }
        }
        "NewInstance" => NewInstance {
            type_index: attrs.get(0, "type index")?,
            is_string_alloc: attrs.flag(1, "string")?,
        },
        "NewArray" => NewArray {
            component_type: attrs.keyword(0, &types(), "component type")?,
        },
        "LoadString" => LoadString(attrs.get(0, "string index")?),
        "LoadClass" => LoadClass(attrs.get(0, "type index")?),
        "ClassTableGet" => ClassTableGet(attrs.get(0, "table index")?),
        "PackedSwitch" => PackedSwitch {
            start_value: attrs.get(0, "start value")?,
            num_entries: attrs.get(1, "number of entries")?,
        },
        "MonitorOperation" => MonitorOperation(attrs.keyword(
            0,
            &[("enter", MonitorKind::Enter), ("exit", MonitorKind::Exit)],
            "`enter` or `exit`",
        )?),
        "MultiplyAccumulate" => MultiplyAccumulate(attrs.keyword(
            0,
            &[("add", BinaryOp::Add), ("sub", BinaryOp::Sub)],
            "`add` or `sub`",
        )?),
        "BitwiseNegatedRight" => {
            BitwiseNegatedRight(attrs.keyword(0, &LOGICAL_OPS, "`and`, `or` or `xor`")?)
        }
        "DataProcWithShifterOp" => DataProcWithShifterOp {
            op: attrs.keyword(0, &DATA_PROC_OPS, "data processing operation")?,
            shift: attrs.keyword(1, &shifter_ops(), "shift or extension kind")?,
            shift_amount: attrs.get(2, "shift amount")?,
        },
        "ArmDexCacheArraysBase" => ArmDexCacheArraysBase(attrs.get(0, "element offset")?),
        _ => return Err(ErrorKind::UnknownOpcode(opcode)),
    };
    let max_attrs = match &kind {
        DataProcWithShifterOp { .. } => 3,
        PackedSwitch { .. }
        | NewInstance { .. }
        | InstanceFieldGet(_)
        | InstanceFieldSet(_)
        | StaticFieldGet(_)
        | StaticFieldSet(_) => 2,
        Compare(ComparisonBias::NoBias) => 0,
        _ => 1,
    };
    attrs.at_most(max_attrs)?;
    Ok(kind)
}

struct BlockDef<'l> {
    line_number: usize,
    header: &'l BlockHeader,
    instrs: Vec<usize>,
}

struct MethodDef<'l, 'input> {
    line_number: usize,
    name: Spanned<&'input str>,
    blocks: Vec<BlockDef<'l>>,
}

fn build_method<'l, 'input>(
    method: &MethodDef<'l, 'input>,
    lines: &'l [(usize, Spanned<LineKind<'input>>)],
) -> Result<'input, Graph> {
    let mut graph = Graph::new(method.name.inner);
    if method.blocks.is_empty() {
        return Err(ErrorKind::EmptyMethod(method.name).at(method.line_number));
    }
    let mut block_ids = HashMap::new();
    for block in &method.blocks {
        let number = block.header.number;
        if block_ids.insert(number.inner, graph.add_block()).is_some() {
            return Err(ErrorKind::DuplicateBlock(number).at(block.line_number));
        }
        let id = block_ids[&number.inner];
        graph.set_try_catch(
            id,
            block.header.attrs.contains(&BlockAttr::Try),
            block.header.attrs.contains(&BlockAttr::Catch),
        );
    }
    for block in &method.blocks {
        let from = block_ids[&block.header.number.inner];
        for succ in &block.header.successors {
            let to = *block_ids
                .get(&succ.inner)
                .ok_or_else(|| ErrorKind::UnknownBlock(*succ).at(block.line_number))?;
            graph.add_successor(from, to);
        }
    }

    // ids are handed out in line order, so every name is known before any
    // instruction is created and inputs may refer forward
    let mut defs: HashMap<&'input str, ValueDef<'l, 'input>> = HashMap::new();
    let mut order = Vec::new();
    for block in &method.blocks {
        let block_id = block_ids[&block.header.number.inner];
        for &index in &block.instrs {
            let (line_number, line) = &lines[index];
            let LineKind::Instr(instr) = &line.inner else {
                unreachable!("block bodies only hold instruction lines")
            };
            let ty = value_type(&instr.name).map_err(|e| e.at(*line_number))?;
            let def = ValueDef {
                line_number: *line_number,
                line: instr,
                block: block_id,
                ty,
                id: InstrId(order.len() as u32),
            };
            if let Some(previous) = defs.get(instr.name.inner) {
                return Err(ErrorKind::DuplicateValue {
                    second_occur: instr.name,
                    previous: (previous.line_number, previous.line.name.span),
                }
                .at(*line_number));
            }
            order.push(instr.name.inner);
            defs.insert(instr.name.inner, def);
        }
    }

    for name in &order {
        let def = &defs[name];
        let kind = build_kind(def, &defs).map_err(|e| e.at(def.line_number))?;
        let id = graph.add_instruction(def.block, kind, def.ty, &[]);
        debug_assert_eq!(id, def.id);
    }

    let lookup = |name: &Spanned<&'input str>, line_number: usize| {
        defs.get(name.inner)
            .map(|d| d.id)
            .ok_or_else(|| ErrorKind::UnknownValue(*name).at(line_number))
    };
    for name in &order {
        let def = &defs[name];
        let line = def.line;
        let expected = match graph.instruction(def.id).kind() {
            InstructionKind::Phi => Some(graph.block(def.block).predecessors().len()),
            kind => kind.input_count(),
        };
        if let Some(expected) = expected {
            if expected != line.inputs.len() {
                return Err(ErrorKind::InputCount {
                    opcode: line.opcode,
                    expected,
                    actual: line.inputs.len(),
                }
                .at(def.line_number));
            }
        }
        for input in &line.inputs {
            let input = lookup(input, def.line_number)?;
            graph.add_input(def.id, input);
        }
        if let Some(env) = &line.environment {
            let values = env
                .iter()
                .map(|slot| slot.as_ref().map(|v| lookup(v, def.line_number)).transpose())
                .collect::<Result<Vec<_>>>()?;
            graph.set_environment(def.id, Environment::new(values));
        }
    }
    graph.finalize();
    log::debug!(
        "parsed method {} with {} blocks and {} instructions",
        graph.name(),
        graph.block_count(),
        graph.instruction_count()
    );
    Ok(graph)
}

enum State<'l, 'input> {
    Top,
    InMethod(MethodDef<'l, 'input>),
    InBlock(MethodDef<'l, 'input>, BlockDef<'l>),
}

pub fn parse(input: &str) -> Result<Module> {
    let mut lines = Vec::new();
    for (text, line_number) in input.lines().zip(1..) {
        let line = parser::hir::line(text).map_err(|e| ErrorKind::PegError(e).at(line_number))?;
        if let Some(line) = line {
            lines.push((line_number, line));
        }
    }

    let mut methods = Vec::new();
    let mut state = State::Top;
    for (index, (line_number, line)) in lines.iter().enumerate() {
        let line_number = *line_number;
        state = match (state, &line.inner) {
            (State::Top, LineKind::MethodBegin(name)) => State::InMethod(MethodDef {
                line_number,
                name: *name,
                blocks: Vec::new(),
            }),
            (State::InMethod(method), LineKind::BlockBegin(header)) => State::InBlock(
                method,
                BlockDef {
                    line_number,
                    header,
                    instrs: Vec::new(),
                },
            ),
            (State::InMethod(method), LineKind::Close) => {
                methods.push(method);
                State::Top
            }
            (State::InBlock(method, mut block), LineKind::Instr(_)) => {
                block.instrs.push(index);
                State::InBlock(method, block)
            }
            (State::InBlock(mut method, block), LineKind::Close) => {
                method.blocks.push(block);
                State::InMethod(method)
            }
            (_, inner) => {
                return Err(ErrorKind::UnexpectedLine(line.span, inner.kind()).at(line_number))
            }
        };
    }
    if !matches!(state, State::Top) {
        return Err(ErrorKind::UnexpectedEof.at(input.lines().count()));
    }

    let methods = methods
        .iter()
        .map(|method| build_method(method, &lines))
        .collect::<Result<Vec<_>>>()?;
    Ok(Module { methods })
}

pub fn parse_method(input: &str) -> Result<Graph> {
    let mut module = parse(input)?;
    match module.methods.len() {
        1 => Ok(module.methods.remove(0)),
        n => Err(ErrorKind::MethodCount(n).at(input.lines().count())),
    }
}
