//! Control labels and symbolic stack types.

use std::fmt;

use wisp_types::ValueType;

/// One slot of the symbolic operand-type stack.
///
/// `Any` is only ever synthesized while the current label is unreachable; it
/// unifies with every concrete type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackType {
    Known(ValueType),
    Any,
}

impl StackType {
    /// Whether `self` is acceptable where `expected` is required.
    pub fn matches(self, expected: StackType) -> bool {
        match (self, expected) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Known(a), Self::Known(b)) => a == b,
        }
    }
}

impl From<ValueType> for StackType {
    fn from(ty: ValueType) -> Self {
        Self::Known(ty)
    }
}

impl fmt::Display for StackType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Known(ty) => write!(f, "{ty}"),
            Self::Any => write!(f, "any"),
        }
    }
}

/// Format a stack slice as `[i32, any]`, optionally prefixed with `... `
/// when only the top of a deeper stack is shown.
pub(crate) fn format_stack(types: &[StackType], truncated: bool) -> String {
    let names: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    let prefix = if truncated { "... " } else { "" };
    format!("[{prefix}{}]", names.join(", "))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelKind {
    Func,
    Block,
    Loop,
    If,
    /// An `if` whose `else` arm has started.
    Else,
}

impl LabelKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Func => "function",
            Self::Block => "block",
            Self::Loop => "loop",
            Self::If => "if",
            Self::Else => "if false branch",
        }
    }
}

/// An open control scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeCheckerLabel {
    pub kind: LabelKind,
    pub param_types: Vec<ValueType>,
    pub result_types: Vec<ValueType>,
    /// Type-stack depth at entry, after the label's params were popped.
    pub type_stack_limit: usize,
    pub unreachable: bool,
}

impl TypeCheckerLabel {
    pub fn new(
        kind: LabelKind,
        param_types: Vec<ValueType>,
        result_types: Vec<ValueType>,
        type_stack_limit: usize,
    ) -> Self {
        Self {
            kind,
            param_types,
            result_types,
            type_stack_limit,
            unreachable: false,
        }
    }

    /// Types a branch to this label must supply.
    ///
    /// A loop is re-entered from the top, so it takes its params; every other
    /// label is exited, so it takes its results. The compiler's drop/keep
    /// computation reads the same method.
    pub fn br_types(&self) -> &[ValueType] {
        match self.kind {
            LabelKind::Loop => &self.param_types,
            _ => &self.result_types,
        }
    }
}
