//! Interpreter for the Wisp instruction stream.
//!
//! A [`Thread`] owns a value stack, a call stack and a pc. [`Thread::run`]
//! executes the environment's stream one quantum at a time; the driver
//! functions wrap it into whole calls with typed arguments and results.
//!
//! ```text
//! run_export / run_function → Thread::run (quantum) → Running ─┐
//!                                   ▲                          │
//!                                   └──────────────────────────┘
//!                                         → Returned | Trap
//! ```
//!
//! Execution depends only on `wisp-types`; validation has already happened
//! by the time a stream is run.

mod driver;
mod error;
mod interpreter;
pub mod numeric;
mod thread;
mod trace;

pub use driver::{get_global_export, run_all_exports, run_export, run_function, run_start_function};
pub use error::{EvalResult, InvokeError, InvokeResult, Trap};
pub use thread::{RunStatus, Thread, ThreadOptions};
pub use trace::trace_pc;
