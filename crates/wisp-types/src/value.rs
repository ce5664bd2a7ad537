//! Value types, signatures, limits and runtime values.

use serde::{Deserialize, Serialize};
use std::fmt;

// ══════════════════════════════════════════════════════════════════════════════
// Value types
// ══════════════════════════════════════════════════════════════════════════════

/// A numeric value type of the MVP format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    I32,
    I64,
    F32,
    F64,
}

impl ValueType {
    /// Short text name, as used in validation messages.
    pub fn name(self) -> &'static str {
        match self {
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Format a type list as `[i32, f64]`.
pub fn format_types(types: &[ValueType]) -> String {
    let names: Vec<&str> = types.iter().map(|t| t.name()).collect();
    format!("[{}]", names.join(", "))
}

/// Ordered parameter and result types of a function.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FuncSignature {
    pub param_types: Vec<ValueType>,
    pub result_types: Vec<ValueType>,
}

impl FuncSignature {
    pub fn new(param_types: Vec<ValueType>, result_types: Vec<ValueType>) -> Self {
        Self {
            param_types,
            result_types,
        }
    }
}

impl fmt::Display for FuncSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {}",
            format_types(&self.param_types),
            format_types(&self.result_types)
        )
    }
}

/// Size limits of a memory (in pages) or a table (in elements).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub initial: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<u64>,
}

impl Limits {
    pub fn new(initial: u64, max: Option<u64>) -> Self {
        Self { initial, max }
    }

    /// Whether already-allocated `self` satisfies the `declared` limits of
    /// an import.
    pub fn satisfies(&self, declared: &Limits) -> bool {
        if self.initial < declared.initial {
            return false;
        }
        match (declared.max, self.max) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(declared_max), Some(actual_max)) => actual_max <= declared_max,
        }
    }
}

/// The four kinds of importable/exportable entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExternalKind {
    Func,
    Table,
    Memory,
    Global,
}

impl fmt::Display for ExternalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Func => write!(f, "func"),
            Self::Table => write!(f, "table"),
            Self::Memory => write!(f, "memory"),
            Self::Global => write!(f, "global"),
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Runtime values
// ══════════════════════════════════════════════════════════════════════════════

/// An untagged stack slot: the raw bit pattern of an i32, i64, f32 or f64.
///
/// The type of every slot is fixed by validation, so no tag is stored. 32-bit
/// values live in the low half.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(u64);

impl Value {
    pub const ZERO: Self = Self(0);

    pub fn from_i32(v: u32) -> Self {
        Self(u64::from(v))
    }

    pub fn from_i64(v: u64) -> Self {
        Self(v)
    }

    pub fn from_f32_bits(bits: u32) -> Self {
        Self(u64::from(bits))
    }

    pub fn from_f64_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn from_f32(v: f32) -> Self {
        Self::from_f32_bits(v.to_bits())
    }

    pub fn from_f64(v: f64) -> Self {
        Self(v.to_bits())
    }

    pub fn as_i32(self) -> u32 {
        self.0 as u32
    }

    pub fn as_i64(self) -> u64 {
        self.0
    }

    pub fn as_f32_bits(self) -> u32 {
        self.0 as u32
    }

    pub fn as_f64_bits(self) -> u64 {
        self.0
    }

    pub fn as_f32(self) -> f32 {
        f32::from_bits(self.as_f32_bits())
    }

    pub fn as_f64(self) -> f64 {
        f64::from_bits(self.0)
    }

    pub fn bits(self) -> u64 {
        self.0
    }
}

/// A value together with its static type; used at host and driver boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedValue {
    #[serde(rename = "type")]
    pub ty: ValueType,
    pub value: Value,
}

impl TypedValue {
    pub fn new(ty: ValueType, value: Value) -> Self {
        Self { ty, value }
    }

    /// The zero value of `ty`.
    pub fn zero(ty: ValueType) -> Self {
        Self::new(ty, Value::ZERO)
    }

    pub fn i32(v: i32) -> Self {
        Self::new(ValueType::I32, Value::from_i32(v as u32))
    }

    pub fn i64(v: i64) -> Self {
        Self::new(ValueType::I64, Value::from_i64(v as u64))
    }

    pub fn f32(v: f32) -> Self {
        Self::new(ValueType::F32, Value::from_f32(v))
    }

    pub fn f64(v: f64) -> Self {
        Self::new(ValueType::F64, Value::from_f64(v))
    }

    pub fn f32_bits(bits: u32) -> Self {
        Self::new(ValueType::F32, Value::from_f32_bits(bits))
    }

    pub fn f64_bits(bits: u64) -> Self {
        Self::new(ValueType::F64, Value::from_f64_bits(bits))
    }
}

impl fmt::Display for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            ValueType::I32 => write!(f, "i32:{}", self.value.as_i32()),
            ValueType::I64 => write!(f, "i64:{}", self.value.as_i64()),
            ValueType::F32 => write!(f, "f32:{}", self.value.as_f32()),
            ValueType::F64 => write!(f, "f64:{}", self.value.as_f64()),
        }
    }
}
