use std::fmt::{self, Display};

use hir::Type;

/// Runtime value. Sub-int types and booleans are held as `Int`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    Ref(usize),
    Void,
}

impl Value {
    pub fn default_of(ty: Type) -> Self {
        match ty {
            Type::Reference => Value::Null,
            Type::Long => Value::Long(0),
            Type::Float => Value::Float(0.0),
            Type::Double => Value::Double(0.0),
            Type::Void => Value::Void,
            Type::Boolean | Type::Byte | Type::Char | Type::Short | Type::Int => Value::Int(0),
        }
    }

    pub fn parse(ty: Type, s: &str) -> Option<Self> {
        let s = s.trim();
        match ty {
            Type::Boolean => match s {
                "true" => Some(Value::Int(1)),
                "false" => Some(Value::Int(0)),
                _ => s.parse().ok().map(Value::Int),
            },
            Type::Byte | Type::Char | Type::Short | Type::Int => s.parse().ok().map(Value::Int),
            Type::Long => s.parse().ok().map(Value::Long),
            Type::Float => s.parse().ok().map(Value::Float),
            Type::Double => s.parse().ok().map(Value::Double),
            Type::Reference => (s == "null").then_some(Value::Null),
            Type::Void => None,
        }
    }

    pub fn as_int(self) -> Option<i32> {
        match self {
            Value::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_long(self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    pub fn is_null(self) -> bool {
        self == Value::Null
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Double(v) => write!(f, "{v:?}"),
            Value::Null => write!(f, "null"),
            Value::Ref(r) => write!(f, "@{r}"),
            Value::Void => write!(f, "void"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Exception {
    Arithmetic,
    NullPointer,
    ArrayIndexOutOfBounds,
    NegativeArraySize,
    ClassCast,
    Thrown(Value),
}

impl Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exception::Arithmetic => write!(f, "java.lang.ArithmeticException"),
            Exception::NullPointer => write!(f, "java.lang.NullPointerException"),
            Exception::ArrayIndexOutOfBounds => {
                write!(f, "java.lang.ArrayIndexOutOfBoundsException")
            }
            Exception::NegativeArraySize => write!(f, "java.lang.NegativeArraySizeException"),
            Exception::ClassCast => write!(f, "java.lang.ClassCastException"),
            Exception::Thrown(v) => write!(f, "exception object {v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Outcome {
    Return(Value),
    Exception(Exception),
}

impl Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Return(v) => write!(f, "{v}"),
            Outcome::Exception(e) => write!(f, "uncaught {e}"),
        }
    }
}
