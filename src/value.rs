use std::fmt::{self, Display};

use smallvec::SmallVec;

/// Identifies an interned nested tuple, see [`Value::Fact`].
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub struct FactId(pub u32);

/// A single argument of a tuple.
///
/// Equality is kind-sensitive: `Int(3)` and `Range(3)` are different values.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Clone, Copy)]
pub enum Value {
    /// An interned string, see [`crate::SymbolTable`].
    Symbol(u32),
    Int(i64),
    /// An integer used as a bound, e.g. a version range endpoint.
    Range(i64),
    /// A nested tuple interned in the engine's fact table.
    Fact(FactId),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Symbol(_) => ValueKind::Symbol,
            Value::Int(_) => ValueKind::Int,
            Value::Range(_) => ValueKind::Range,
            Value::Fact(_) => ValueKind::Fact,
        }
    }

    /// The 64-bit payload used as a column index key.
    pub fn bits(&self) -> u64 {
        match self {
            Value::Symbol(s) => u64::from(*s),
            Value::Int(i) | Value::Range(i) => *i as u64,
            Value::Fact(f) => u64::from(f.0),
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Symbol(s) => write!(f, "#{s}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Range(i) => write!(f, "range({i})"),
            Value::Fact(id) => write!(f, "fact({})", id.0),
        }
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy)]
pub enum ValueKind {
    Symbol,
    Int,
    Range,
    Fact,
}

impl Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ValueKind::Symbol => "symbol",
            ValueKind::Int => "int",
            ValueKind::Range => "range",
            ValueKind::Fact => "fact",
        })
    }
}

/// The declared type of a predicate argument.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Copy, Default)]
pub enum ArgType {
    Symbol,
    Int,
    Range,
    #[default]
    Unknown,
}

impl ArgType {
    pub fn from_name(name: &str) -> Option<ArgType> {
        match name {
            "symbol" => Some(ArgType::Symbol),
            "int" => Some(ArgType::Int),
            "range" => Some(ArgType::Range),
            _ => None,
        }
    }

    /// Whether a value of the given kind may be stored under this type.
    pub fn admits(&self, kind: ValueKind) -> bool {
        match self {
            ArgType::Unknown => true,
            ArgType::Symbol => kind == ValueKind::Symbol,
            ArgType::Int => kind == ValueKind::Int,
            ArgType::Range => kind == ValueKind::Range,
        }
    }
}

impl Display for ArgType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ArgType::Symbol => "symbol",
            ArgType::Int => "int",
            ArgType::Range => "range",
            ArgType::Unknown => "unknown",
        })
    }
}

pub type Tuple = SmallVec<[Value; 4]>;

/// Builds a [`Tuple`] from a slice of values.
pub fn tuple(values: &[Value]) -> Tuple {
    Tuple::from_slice(values)
}
