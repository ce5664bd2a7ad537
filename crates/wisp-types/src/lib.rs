//! Shared types for the Wisp interpreter.
//!
//! This crate defines value types and runtime values, the environment
//! registry that owns every compiled entity, the instruction-stream opcode
//! table and reader, the validation error type, and the host-side seams
//! used by embedders.

mod error;
mod value;
pub mod env;
pub mod host;
pub mod opcode;
pub mod stream;

pub use env::{
    DefinedFunc, DefinedModule, Environment, EnvironmentMark, Export, Func, Global, HostFunc,
    HostModule, Import, ImportDesc, Memory, Module, ModuleKind, Table, MAX_PAGES, PAGE_SIZE,
};
pub use error::{ErrorCategory, ErrorCode, ValidationError};
pub use host::{HostCallback, HostError, HostImportDelegate, HostImportError};
pub use opcode::{Immediates, OpClass, Opcode};
pub use stream::{disassemble, Instruction, Operands, StreamReader, TableEntry, INVALID_OFFSET};
pub use value::{format_types, ExternalKind, FuncSignature, Limits, TypedValue, Value, ValueType};

/// Result type used by the checker and compiler.
pub type Result<T> = std::result::Result<T, ValidationError>;
