//! Type checker for the Wisp interpreter.
//!
//! [`TypeChecker`] validates function bodies one instruction at a time
//! against a symbolic operand-type stack. The bytecode compiler drives it in
//! lockstep with code emission and reads its live stack depth to compute the
//! drop/keep counts of every branch.

mod checker;
mod label;

pub use checker::{DropKeep, TypeChecker};
pub use label::{LabelKind, StackType, TypeCheckerLabel};

/// Result alias for checker operations.
pub type CheckResult<T> = wisp_types::Result<T>;
