//! Runtime error types for the Wisp interpreter.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use wisp_types::ExternalKind;

/// A runtime trap. Terminal for the current invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize, Deserialize)]
pub enum Trap {
    #[error("out of bounds memory access")]
    MemoryAccessOutOfBounds,
    #[error("integer overflow")]
    IntegerOverflow,
    #[error("integer divide by zero")]
    IntegerDivideByZero,
    #[error("invalid conversion to integer")]
    InvalidConversionToInteger,
    #[error("undefined table index")]
    UndefinedTableIndex,
    #[error("uninitialized table element")]
    UninitializedTableElement,
    #[error("unreachable executed")]
    Unreachable,
    #[error("indirect call signature mismatch")]
    IndirectCallSignatureMismatch,
    #[error("call stack exhausted")]
    CallStackExhausted,
    #[error("value stack exhausted")]
    ValueStackExhausted,
    #[error("host result type mismatch")]
    HostResultTypeMismatch,
    #[error("host function trapped")]
    HostTrapped,
    /// The stream holds a byte that is not an opcode.
    #[error("invalid opcode 0x{0:02x}")]
    InvalidOpcode(u8),
}

/// Errors raised by the invocation driver.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    #[error("trap: {0}")]
    Trap(#[from] Trap),

    /// Argument count or types differ from the callee's signature.
    #[error("argument type mismatch")]
    ArgumentTypeMismatch,

    #[error("unknown export \"{0}\"")]
    UnknownExport(String),

    #[error("export \"{name}\" is a {actual}, expected a {expected}")]
    ExportKindMismatch {
        name: String,
        expected: ExternalKind,
        actual: ExternalKind,
    },

    #[error("invalid function index {0}")]
    InvalidFunctionIndex(usize),
}

/// Result alias for stream execution.
pub type EvalResult<T> = Result<T, Trap>;

/// Result alias for driver operations.
pub type InvokeResult<T> = Result<T, InvokeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trap_messages() {
        assert_eq!(Trap::MemoryAccessOutOfBounds.to_string(), "out of bounds memory access");
        assert_eq!(Trap::IntegerDivideByZero.to_string(), "integer divide by zero");
        assert_eq!(Trap::InvalidOpcode(0xff).to_string(), "invalid opcode 0xff");
    }

    #[test]
    fn test_trap_serializes_by_name() {
        let json = serde_json::to_string(&Trap::IntegerOverflow).unwrap();
        assert_eq!(json, "\"IntegerOverflow\"");
    }

    #[test]
    fn test_invoke_error_wraps_trap() {
        let err: InvokeError = Trap::Unreachable.into();
        assert_eq!(err.to_string(), "trap: unreachable executed");
    }
}
