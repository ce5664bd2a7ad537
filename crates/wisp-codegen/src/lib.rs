//! Bytecode compiler for the Wisp interpreter.
//!
//! Decodes a binary module with `wasmparser`, validates every function body
//! through [`wisp_checker::TypeChecker`], links imports against registered
//! modules, and lowers code into the environment's shared instruction
//! stream.
//!
//! # Architecture
//!
//! ```text
//! .wasm bytes → Parser payloads → ModuleCompiler (pass 1)
//!                                    ├── imports   (link against registered modules)
//!                                    ├── body      (check + lower each function)
//!                                    └── emitter   (stream writes, fixups, drop/keep)
//!             → ModuleCompiler (pass 2) → segments (bounds-check, then write)
//! ```
//!
//! Branch targets that are not known yet are written as placeholders and
//! patched when the target label closes; calls to functions whose bodies
//! come later are patched when the callee's body begins. A module that
//! fails any check rolls the environment back to its state before the
//! compile.

mod body;
mod compiler;
mod emitter;
mod error;
mod imports;
mod segments;

pub use compiler::{compile_and_register, compile_module};
pub use error::{CodegenError, CodegenResult};
