//! Reference interpreter for HIR methods, used to check that passes which
//! move instructions around keep the observable behaviour of a method.

use std::collections::HashMap;

use hir::{
    BinaryOp, ComparisonBias, Graph, IfCondition, InstrId, InstructionKind, InvokeKind, Module,
    MonitorKind, ShifterOpKind, Type, UnaryOp,
};
use thiserror::Error;

mod value;

pub use value::{Exception, Outcome, Value};

#[derive(Debug, Error)]
pub enum Error {
    #[error("method `{0}` not found")]
    MissingMethod(String),
    #[error("method `{method}` takes {expected} arguments, {actual} given")]
    ArgumentMismatch {
        method: String,
        expected: usize,
        actual: usize,
    },
    #[error("`{instruction}` in `{method}` is not supported by the interpreter")]
    Unsupported { method: String, instruction: String },
    #[error("step budget of {0} instructions exhausted")]
    StepBudgetExhausted(u64),
    #[error("malformed graph `{method}`: {reason}")]
    Malformed { method: String, reason: String },
}

const DEFAULT_STEP_BUDGET: u64 = 10_000_000;

#[derive(Debug, Clone)]
enum Object {
    Array(Vec<Value>),
    Instance { type_index: u32, fields: HashMap<u32, Value> },
    String(u32),
    Class(u32),
}

enum Flow {
    Next(Value),
    Jump(usize),
    Return(Value),
    Throw(Exception),
}

pub struct Interpreter<'m> {
    module: &'m Module,
    heap: Vec<Object>,
    statics: HashMap<u32, Value>,
    steps: u64,
    step_budget: u64,
}

struct Frame<'g> {
    graph: &'g Graph,
    args: &'g [Value],
    values: Vec<Option<Value>>,
}

impl<'g> Frame<'g> {
    fn malformed(&self, reason: String) -> Error {
        Error::Malformed {
            method: self.graph.name().to_string(),
            reason,
        }
    }

    fn get(&self, id: InstrId) -> Result<Value, Error> {
        self.values[id.index()]
            .ok_or_else(|| self.malformed(format!("{} used before definition", self.graph.value_name(id))))
    }

    fn input(&self, instr: InstrId, index: usize) -> Result<Value, Error> {
        let input = self.graph[instr]
            .inputs()
            .get(index)
            .copied()
            .ok_or_else(|| {
                self.malformed(format!("{} lacks input {index}", self.graph.value_name(instr)))
            })?;
        self.get(input)
    }

    fn int_input(&self, instr: InstrId, index: usize) -> Result<i32, Error> {
        let v = self.input(instr, index)?;
        v.as_int().ok_or_else(|| {
            self.malformed(format!(
                "input {index} of {} is {v}, expected an int",
                self.graph.value_name(instr)
            ))
        })
    }
}

impl<'m> Interpreter<'m> {
    pub fn new(module: &'m Module) -> Self {
        Self {
            module,
            heap: Vec::new(),
            statics: HashMap::new(),
            steps: 0,
            step_budget: DEFAULT_STEP_BUDGET,
        }
    }

    pub fn with_step_budget(mut self, step_budget: u64) -> Self {
        self.step_budget = step_budget;
        self
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn run(&mut self, method: &str, args: &[Value]) -> Result<Outcome, Error> {
        let module = self.module;
        let graph = module
            .method(method)
            .ok_or_else(|| Error::MissingMethod(method.to_string()))?;
        log::debug!("interpreting {method} with {} arguments", args.len());
        self.invoke(graph, args)
    }

    fn invoke(&mut self, graph: &Graph, args: &[Value]) -> Result<Outcome, Error> {
        let expected = graph.parameter_count();
        if expected != args.len() {
            return Err(Error::ArgumentMismatch {
                method: graph.name().to_string(),
                expected,
                actual: args.len(),
            });
        }
        let mut frame = Frame {
            graph,
            args,
            values: vec![None; graph.instruction_count()],
        };
        let Some(mut block) = graph.entry_block() else {
            return Err(frame.malformed("no entry block".to_string()));
        };
        let mut predecessor = None;
        loop {
            let b = graph.block(block);
            if let Some(pred) = predecessor {
                let index = b
                    .predecessors()
                    .iter()
                    .position(|&p| p == pred)
                    .ok_or_else(|| frame.malformed(format!("{pred} is not a predecessor of {block}")))?;
                // phis read their inputs before any of them is written
                let incoming = b
                    .phis()
                    .iter()
                    .map(|&phi| {
                        let input = graph[phi].inputs().get(index).copied().ok_or_else(|| {
                            frame.malformed(format!("{} lacks an input", graph.value_name(phi)))
                        })?;
                        frame.get(input)
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                for (&phi, value) in b.phis().iter().zip(incoming) {
                    frame.values[phi.index()] = Some(value);
                }
            }
            let mut next = None;
            for &id in b.instructions() {
                self.steps += 1;
                if self.steps > self.step_budget {
                    return Err(Error::StepBudgetExhausted(self.step_budget));
                }
                match self.eval(&frame, id)? {
                    Flow::Next(value) => frame.values[id.index()] = Some(value),
                    Flow::Jump(successor) => {
                        let target = b.successors().get(successor).copied().ok_or_else(|| {
                            frame.malformed(format!("{block} has no successor #{successor}"))
                        })?;
                        next = Some(target);
                        break;
                    }
                    Flow::Return(value) => return Ok(Outcome::Return(value)),
                    Flow::Throw(exception) => return Ok(Outcome::Exception(exception)),
                }
            }
            let Some(target) = next else {
                return Err(frame.malformed(format!("{block} falls off its end")));
            };
            predecessor = Some(block);
            block = target;
        }
    }

    fn unsupported(&self, frame: &Frame, id: InstrId) -> Error {
        Error::Unsupported {
            method: frame.graph.name().to_string(),
            instruction: frame.graph[id].kind().to_string(),
        }
    }

    fn alloc(&mut self, object: Object) -> Value {
        self.heap.push(object);
        Value::Ref(self.heap.len() - 1)
    }

    fn array(&mut self, array: Value) -> Result<&mut Vec<Value>, Exception> {
        match array {
            Value::Ref(r) => match &mut self.heap[r] {
                Object::Array(values) => Ok(values),
                _ => Err(Exception::ClassCast),
            },
            _ => Err(Exception::NullPointer),
        }
    }

    fn eval(&mut self, frame: &Frame, id: InstrId) -> Result<Flow, Error> {
        use InstructionKind::*;
        let instr = &frame.graph[id];
        let ty = instr.ty();
        let value = match instr.kind() {
            IntConstant(v) => Value::Int(*v),
            LongConstant(v) => Value::Long(*v),
            FloatConstant(v) => Value::Float(v.0),
            DoubleConstant(v) => Value::Double(v.0),
            NullConstant | CurrentMethod => Value::Null,
            ParameterValue(index) => frame.args[*index as usize],
            Phi => return Err(frame.malformed("phi among instructions".to_string())),
            Unary(op) => unary(*op, frame.input(id, 0)?)
                .ok_or_else(|| frame.malformed(format!("bad operand of {}", instr.debug_name())))?,
            Binary(op) => {
                let (l, r) = (frame.input(id, 0)?, frame.input(id, 1)?);
                match binary(*op, l, r) {
                    Some(Ok(v)) => v,
                    Some(Err(e)) => return Ok(Flow::Throw(e)),
                    None => {
                        return Err(frame.malformed(format!(
                            "bad operands {l} and {r} of {}",
                            frame.graph.value_name(id)
                        )))
                    }
                }
            }
            Condition(cond) => {
                let (l, r) = (frame.input(id, 0)?, frame.input(id, 1)?);
                let holds = condition(*cond, l, r).ok_or_else(|| {
                    frame.malformed(format!("bad operands {l} and {r} of {}", cond.name()))
                })?;
                Value::Int(holds as i32)
            }
            Compare(bias) => {
                let (l, r) = (frame.input(id, 0)?, frame.input(id, 1)?);
                Value::Int(compare(*bias, l, r).ok_or_else(|| {
                    frame.malformed(format!("bad operands {l} and {r} of Compare"))
                })?)
            }
            TypeConversion => convert(frame.input(id, 0)?, ty).ok_or_else(|| {
                frame.malformed(format!("bad conversion {}", frame.graph.value_name(id)))
            })?,
            DivZeroCheck => {
                let v = frame.input(id, 0)?;
                if v == Value::Int(0) || v == Value::Long(0) {
                    return Ok(Flow::Throw(Exception::Arithmetic));
                }
                v
            }
            NullCheck => {
                let v = frame.input(id, 0)?;
                if v.is_null() {
                    return Ok(Flow::Throw(Exception::NullPointer));
                }
                v
            }
            BoundsCheck => {
                let index = frame.int_input(id, 0)?;
                let length = frame.int_input(id, 1)?;
                if index < 0 || index >= length {
                    return Ok(Flow::Throw(Exception::ArrayIndexOutOfBounds));
                }
                Value::Int(index)
            }
            ArrayGet {
                is_string_char_at: false,
            } => {
                let index = frame.int_input(id, 1)?;
                match self.array(frame.input(id, 0)?) {
                    Ok(values) => match usize::try_from(index).ok().and_then(|i| values.get(i)) {
                        Some(v) => *v,
                        None => return Ok(Flow::Throw(Exception::ArrayIndexOutOfBounds)),
                    },
                    Err(e) => return Ok(Flow::Throw(e)),
                }
            }
            ArraySet { .. } => {
                let index = frame.int_input(id, 1)?;
                let value = frame.input(id, 2)?;
                match self.array(frame.input(id, 0)?) {
                    Ok(values) => match usize::try_from(index).ok().and_then(|i| values.get_mut(i)) {
                        Some(slot) => *slot = value,
                        None => return Ok(Flow::Throw(Exception::ArrayIndexOutOfBounds)),
                    },
                    Err(e) => return Ok(Flow::Throw(e)),
                }
                Value::Void
            }
            ArrayLength {
                is_string_length: false,
            } => match self.array(frame.input(id, 0)?) {
                Ok(values) => Value::Int(values.len() as i32),
                Err(e) => return Ok(Flow::Throw(e)),
            },
            InstanceFieldGet(field) => match frame.input(id, 0)? {
                Value::Ref(r) => match &self.heap[r] {
                    Object::Instance { fields, .. } => fields
                        .get(&field.offset)
                        .copied()
                        .unwrap_or_else(|| Value::default_of(field.field_type)),
                    _ => return Ok(Flow::Throw(Exception::ClassCast)),
                },
                _ => return Ok(Flow::Throw(Exception::NullPointer)),
            },
            InstanceFieldSet(field) => {
                let value = frame.input(id, 1)?;
                match frame.input(id, 0)? {
                    Value::Ref(r) => match &mut self.heap[r] {
                        Object::Instance { fields, .. } => {
                            fields.insert(field.offset, value);
                        }
                        _ => return Ok(Flow::Throw(Exception::ClassCast)),
                    },
                    _ => return Ok(Flow::Throw(Exception::NullPointer)),
                }
                Value::Void
            }
            StaticFieldGet(field) => self
                .statics
                .get(&field.offset)
                .copied()
                .unwrap_or_else(|| Value::default_of(field.field_type)),
            StaticFieldSet(field) => {
                let value = frame.input(id, 0)?;
                self.statics.insert(field.offset, value);
                Value::Void
            }
            Invoke {
                kind: InvokeKind::StaticOrDirect,
                target,
            } => {
                let module = self.module;
                let callee = module
                    .method(target)
                    .ok_or_else(|| Error::MissingMethod(target.clone()))?;
                let args = instr
                    .inputs()
                    .iter()
                    .map(|&input| frame.get(input))
                    .collect::<Result<Vec<_>, _>>()?;
                match self.invoke(callee, &args)? {
                    Outcome::Return(v) => v,
                    Outcome::Exception(e) => return Ok(Flow::Throw(e)),
                }
            }
            NewInstance { type_index, .. } => self.alloc(Object::Instance {
                type_index: *type_index,
                fields: HashMap::new(),
            }),
            NewArray { component_type } => {
                let length = frame.int_input(id, 0)?;
                let Ok(length) = usize::try_from(length) else {
                    return Ok(Flow::Throw(Exception::NegativeArraySize));
                };
                self.alloc(Object::Array(vec![Value::default_of(*component_type); length]))
            }
            LoadString(index) => self.alloc(Object::String(*index)),
            LoadClass(index) => self.alloc(Object::Class(*index)),
            ClinitCheck | BoundType => frame.input(id, 0)?,
            InstanceOf | CheckCast => {
                let object = frame.input(id, 0)?;
                let class = match frame.input(id, 1)? {
                    Value::Ref(r) => match self.heap[r] {
                        Object::Class(index) => index,
                        _ => return Err(self.unsupported(frame, id)),
                    },
                    _ => return Ok(Flow::Throw(Exception::NullPointer)),
                };
                let is_instance = match object {
                    Value::Ref(r) => matches!(
                        self.heap[r],
                        Object::Instance { type_index, .. } if type_index == class
                    ),
                    _ => false,
                };
                if matches!(instr.kind(), InstanceOf) {
                    Value::Int(is_instance as i32)
                } else if is_instance || object.is_null() {
                    object
                } else {
                    return Ok(Flow::Throw(Exception::ClassCast));
                }
            }
            Select => {
                if frame.int_input(id, 2)? != 0 {
                    frame.input(id, 1)?
                } else {
                    frame.input(id, 0)?
                }
            }
            Goto | TryBoundary => return Ok(Flow::Jump(0)),
            If => {
                let taken = frame.int_input(id, 0)? != 0;
                return Ok(Flow::Jump(if taken { 0 } else { 1 }));
            }
            PackedSwitch {
                start_value,
                num_entries,
            } => {
                let v = frame.int_input(id, 0)?;
                let case = i64::from(v) - i64::from(*start_value);
                let target = if (0..i64::from(*num_entries)).contains(&case) {
                    case as usize
                } else {
                    *num_entries as usize
                };
                return Ok(Flow::Jump(target));
            }
            Return => return Ok(Flow::Return(frame.input(id, 0)?)),
            ReturnVoid => return Ok(Flow::Return(Value::Void)),
            Throw => return Ok(Flow::Throw(Exception::Thrown(frame.input(id, 0)?))),
            SuspendCheck | NativeDebugInfo | MemoryBarrier => Value::Void,
            MonitorOperation(MonitorKind::Enter | MonitorKind::Exit) => {
                if frame.input(id, 0)?.is_null() {
                    return Ok(Flow::Throw(Exception::NullPointer));
                }
                Value::Void
            }
            MultiplyAccumulate(op) => {
                let acc = frame.input(id, 0)?;
                let product = binary(BinaryOp::Mul, frame.input(id, 1)?, frame.input(id, 2)?);
                match product {
                    Some(Ok(product)) => match binary(*op, acc, product) {
                        Some(Ok(v)) => v,
                        _ => return Err(self.unsupported(frame, id)),
                    },
                    _ => return Err(self.unsupported(frame, id)),
                }
            }
            BitwiseNegatedRight(op) => {
                let left = frame.input(id, 0)?;
                let right = frame.input(id, 1)?;
                match unary(UnaryOp::Not, right).and_then(|r| binary(*op, left, r)) {
                    Some(Ok(v)) => v,
                    _ => return Err(self.unsupported(frame, id)),
                }
            }
            DataProcWithShifterOp {
                op,
                shift,
                shift_amount,
            } => {
                let right = shifter_operand(frame.input(id, 1)?, *shift, *shift_amount, ty)
                    .ok_or_else(|| self.unsupported(frame, id))?;
                match binary(*op, frame.input(id, 0)?, right) {
                    Some(Ok(v)) => v,
                    _ => return Err(self.unsupported(frame, id)),
                }
            }
            ArrayGet { .. }
            | ArrayLength { .. }
            | UnresolvedInstanceFieldGet(_)
            | UnresolvedInstanceFieldSet(_)
            | UnresolvedStaticFieldGet(_)
            | UnresolvedStaticFieldSet(_)
            | Invoke { .. }
            | ClassTableGet(_)
            | Deoptimize
            | ClearException
            | LoadException
            | ParallelMove
            | IntermediateAddress
            | ArmDexCacheArraysBase(_) => return Err(self.unsupported(frame, id)),
        };
        Ok(Flow::Next(value))
    }
}

fn unary(op: UnaryOp, v: Value) -> Option<Value> {
    Some(match (op, v) {
        (UnaryOp::Neg, Value::Int(v)) => Value::Int(v.wrapping_neg()),
        (UnaryOp::Neg, Value::Long(v)) => Value::Long(v.wrapping_neg()),
        (UnaryOp::Neg, Value::Float(v)) => Value::Float(-v),
        (UnaryOp::Neg, Value::Double(v)) => Value::Double(-v),
        (UnaryOp::Not, Value::Int(v)) => Value::Int(!v),
        (UnaryOp::Not, Value::Long(v)) => Value::Long(!v),
        (UnaryOp::BooleanNot, Value::Int(v)) => Value::Int(v ^ 1),
        _ => return None,
    })
}

fn binary(op: BinaryOp, l: Value, r: Value) -> Option<Result<Value, Exception>> {
    use BinaryOp::*;
    let v = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Value::Int(match op {
            Add => a.wrapping_add(b),
            And => a & b,
            Div | Rem if b == 0 => return Some(Err(Exception::Arithmetic)),
            Div => a.wrapping_div(b),
            Mul => a.wrapping_mul(b),
            Or => a | b,
            Rem => a.wrapping_rem(b),
            Ror => a.rotate_right(b as u32 & 31),
            Shl => a.wrapping_shl(b as u32),
            Shr => a.wrapping_shr(b as u32),
            Sub => a.wrapping_sub(b),
            UShr => (a as u32).wrapping_shr(b as u32) as i32,
            Xor => a ^ b,
        }),
        (Value::Long(a), Value::Int(b)) if op.is_shift() => Value::Long(match op {
            Ror => a.rotate_right(b as u32 & 63),
            Shl => a.wrapping_shl(b as u32),
            Shr => a.wrapping_shr(b as u32),
            _ => (a as u64).wrapping_shr(b as u32) as i64,
        }),
        (Value::Long(a), Value::Long(b)) => Value::Long(match op {
            Add => a.wrapping_add(b),
            And => a & b,
            Div | Rem if b == 0 => return Some(Err(Exception::Arithmetic)),
            Div => a.wrapping_div(b),
            Mul => a.wrapping_mul(b),
            Or => a | b,
            Rem => a.wrapping_rem(b),
            Sub => a.wrapping_sub(b),
            Xor => a ^ b,
            Ror | Shl | Shr | UShr => return None,
        }),
        (Value::Float(a), Value::Float(b)) => Value::Float(match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            Rem => a % b,
            _ => return None,
        }),
        (Value::Double(a), Value::Double(b)) => Value::Double(match op {
            Add => a + b,
            Sub => a - b,
            Mul => a * b,
            Div => a / b,
            Rem => a % b,
            _ => return None,
        }),
        _ => return None,
    };
    Some(Ok(v))
}

fn condition(cond: IfCondition, l: Value, r: Value) -> Option<bool> {
    use std::cmp::Ordering;
    use IfCondition::*;
    let (ordering, unsigned) = match (l, r) {
        (Value::Int(a), Value::Int(b)) => (Some(a.cmp(&b)), (a as u32).cmp(&(b as u32))),
        (Value::Long(a), Value::Long(b)) => (Some(a.cmp(&b)), (a as u64).cmp(&(b as u64))),
        (Value::Float(a), Value::Float(b)) => (a.partial_cmp(&b), Ordering::Equal),
        (Value::Double(a), Value::Double(b)) => (a.partial_cmp(&b), Ordering::Equal),
        (Value::Null | Value::Ref(_), Value::Null | Value::Ref(_)) => {
            let eq = l == r;
            return match cond {
                Equal => Some(eq),
                NotEqual => Some(!eq),
                _ => None,
            };
        }
        _ => return None,
    };
    // unordered floats only satisfy `NotEqual`
    let Some(ordering) = ordering else {
        return Some(cond == NotEqual);
    };
    Some(match cond {
        Equal => ordering.is_eq(),
        NotEqual => ordering.is_ne(),
        LessThan => ordering.is_lt(),
        LessThanOrEqual => ordering.is_le(),
        GreaterThan => ordering.is_gt(),
        GreaterThanOrEqual => ordering.is_ge(),
        Below => unsigned.is_lt(),
        BelowOrEqual => unsigned.is_le(),
        Above => unsigned.is_gt(),
        AboveOrEqual => unsigned.is_ge(),
    })
}

fn compare(bias: ComparisonBias, l: Value, r: Value) -> Option<i32> {
    let ordering = match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(&b)),
        (Value::Long(a), Value::Long(b)) => Some(a.cmp(&b)),
        (Value::Float(a), Value::Float(b)) => a.partial_cmp(&b),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(&b),
        _ => return None,
    };
    Some(match ordering {
        Some(ordering) => ordering as i32,
        None if bias == ComparisonBias::GtBias => 1,
        None => -1,
    })
}

fn convert(v: Value, to: Type) -> Option<Value> {
    // widen to the largest carrier first, then narrow
    let (as_i64, as_f64) = match v {
        Value::Int(v) => (i64::from(v), f64::from(v)),
        Value::Long(v) => (v, v as f64),
        Value::Float(v) => (v as i64, f64::from(v)),
        Value::Double(v) => (v as i64, v),
        _ => return None,
    };
    Some(match (v, to) {
        (Value::Float(f), Type::Int) => Value::Int(f as i32),
        (Value::Double(d), Type::Int) => Value::Int(d as i32),
        (Value::Float(f), Type::Byte | Type::Short | Type::Char) => {
            return convert(Value::Int(f as i32), to)
        }
        (Value::Double(d), Type::Byte | Type::Short | Type::Char) => {
            return convert(Value::Int(d as i32), to)
        }
        (Value::Long(l), Type::Float) => Value::Float(l as f32),
        (Value::Int(i), Type::Float) => Value::Float(i as f32),
        (_, Type::Int) => Value::Int(as_i64 as i32),
        (_, Type::Long) => Value::Long(as_i64),
        (_, Type::Byte) => Value::Int(as_i64 as i8 as i32),
        (_, Type::Short) => Value::Int(as_i64 as i16 as i32),
        (_, Type::Char) => Value::Int(as_i64 as u16 as i32),
        (_, Type::Boolean) => Value::Int((as_i64 != 0) as i32),
        (_, Type::Float) => Value::Float(as_f64 as f32),
        (_, Type::Double) => Value::Double(as_f64),
        (_, Type::Reference | Type::Void) => return None,
    })
}

/// Right operand of a data-processing instruction after its shift or extension.
fn shifter_operand(v: Value, shift: ShifterOpKind, amount: u32, ty: Type) -> Option<Value> {
    use ShifterOpKind::*;
    let extend = |x: i64| -> i64 {
        match shift {
            Uxtb => i64::from(x as u8),
            Uxth => i64::from(x as u16),
            Uxtw => i64::from(x as u32),
            Sxtb => i64::from(x as i8),
            Sxth => i64::from(x as i16),
            Sxtw => i64::from(x as i32),
            Lsl | Lsr | Asr => x,
        }
    };
    Some(match (v, shift) {
        (Value::Int(v), Lsl) => Value::Int(v.wrapping_shl(amount)),
        (Value::Int(v), Lsr) => Value::Int((v as u32).wrapping_shr(amount) as i32),
        (Value::Int(v), Asr) => Value::Int(v.wrapping_shr(amount)),
        (Value::Long(v), Lsl) => Value::Long(v.wrapping_shl(amount)),
        (Value::Long(v), Lsr) => Value::Long((v as u64).wrapping_shr(amount) as i64),
        (Value::Long(v), Asr) => Value::Long(v.wrapping_shr(amount)),
        // extensions may widen an int operand of a long operation
        (Value::Int(v), _) if ty == Type::Long => {
            Value::Long(extend(i64::from(v)).wrapping_shl(amount))
        }
        (Value::Int(v), _) => Value::Int((extend(i64::from(v)) as i32).wrapping_shl(amount)),
        (Value::Long(v), _) => Value::Long(extend(v).wrapping_shl(amount)),
        _ => return None,
    })
}
