use std::fmt::{self, Display};

/// Primitive type of a value produced by an instruction.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum Type {
    Reference,
    Boolean,
    Byte,
    Char,
    Short,
    Int,
    Long,
    Float,
    Double,
    Void,
}

impl Type {
    pub const ALL: [Type; 10] = [
        Type::Reference,
        Type::Boolean,
        Type::Byte,
        Type::Char,
        Type::Short,
        Type::Int,
        Type::Long,
        Type::Float,
        Type::Double,
        Type::Void,
    ];

    #[inline]
    pub fn is_floating_point(self) -> bool {
        matches!(self, Type::Float | Type::Double)
    }

    #[inline]
    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Type::Boolean | Type::Byte | Type::Char | Type::Short | Type::Int | Type::Long
        )
    }

    #[inline]
    pub fn is_64bit(self) -> bool {
        matches!(self, Type::Long | Type::Double)
    }

    pub fn prefix(self) -> char {
        match self {
            Type::Reference => 'l',
            Type::Boolean => 'z',
            Type::Byte => 'b',
            Type::Char => 'c',
            Type::Short => 's',
            Type::Int => 'i',
            Type::Long => 'j',
            Type::Float => 'f',
            Type::Double => 'd',
            Type::Void => 'v',
        }
    }

    pub fn from_prefix(c: char) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.prefix() == c)
    }

    pub(crate) fn side_effect_index(self) -> Option<u32> {
        match self {
            Type::Reference => Some(0),
            Type::Boolean => Some(1),
            Type::Byte => Some(2),
            Type::Char => Some(3),
            Type::Short => Some(4),
            Type::Int => Some(5),
            Type::Long => Some(6),
            Type::Float => Some(7),
            Type::Double => Some(8),
            Type::Void => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Type::Reference => "ref",
            Type::Boolean => "boolean",
            Type::Byte => "byte",
            Type::Char => "char",
            Type::Short => "short",
            Type::Int => "int",
            Type::Long => "long",
            Type::Float => "float",
            Type::Double => "double",
            Type::Void => "void",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ty| ty.name() == name)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
