//! Execution threads: fixed-capacity value and call stacks plus a pc.

use serde::{Deserialize, Serialize};
use wisp_types::{TypedValue, Value};

use crate::error::{EvalResult, Trap};

/// Thread configuration, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadOptions {
    /// Value stack capacity, in values.
    pub value_stack_size: usize,
    /// Call stack capacity, in frames.
    pub call_stack_size: usize,
    /// Instructions executed per [`Thread::run`] call made by the driver.
    pub quantum: u32,
    /// Emit every executed instruction through `tracing::trace!`.
    pub trace: bool,
}

impl Default for ThreadOptions {
    fn default() -> Self {
        Self {
            value_stack_size: 64 * 1024,
            call_stack_size: 64 * 1024,
            quantum: 1000,
            trace: false,
        }
    }
}

impl ThreadOptions {
    /// Parse options from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

/// Whether a quantum ended with the invocation still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The quantum ran out; call `run` again to resume.
    Running,
    /// A `return` unwound past the call-stack return top.
    Returned,
}

/// One execution context over an [`Environment`](wisp_types::Environment).
#[derive(Debug)]
pub struct Thread {
    pub(crate) value_stack: Vec<Value>,
    pub(crate) value_stack_top: usize,
    pub(crate) call_stack: Vec<u32>,
    pub(crate) call_stack_top: usize,
    pub(crate) pc: u32,
    /// Scratch buffer for host call arguments.
    pub(crate) host_args: Vec<TypedValue>,
    options: ThreadOptions,
}

impl Default for Thread {
    fn default() -> Self {
        Self::new(ThreadOptions::default())
    }
}

impl Thread {
    pub fn new(options: ThreadOptions) -> Self {
        Self {
            value_stack: vec![Value::ZERO; options.value_stack_size],
            value_stack_top: 0,
            call_stack: vec![0; options.call_stack_size],
            call_stack_top: 0,
            pc: 0,
            host_args: Vec::new(),
            options,
        }
    }

    pub fn options(&self) -> &ThreadOptions {
        &self.options
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }

    pub fn value_stack_top(&self) -> usize {
        self.value_stack_top
    }

    pub fn call_stack_top(&self) -> usize {
        self.call_stack_top
    }

    /// Live values, bottom first.
    pub fn values(&self) -> &[Value] {
        &self.value_stack[..self.value_stack_top]
    }

    /// Empty both stacks and rewind the pc.
    pub fn reset(&mut self) {
        self.value_stack_top = 0;
        self.call_stack_top = 0;
        self.pc = 0;
    }

    // ── Value stack ──────────────────────────────────────────────────────

    pub fn push(&mut self, value: Value) -> EvalResult<()> {
        let slot = self
            .value_stack
            .get_mut(self.value_stack_top)
            .ok_or(Trap::ValueStackExhausted)?;
        *slot = value;
        self.value_stack_top += 1;
        Ok(())
    }

    /// Pop the top value. The stream is validated, so the stack is never
    /// empty here.
    pub fn pop(&mut self) -> Value {
        self.value_stack_top -= 1;
        self.value_stack[self.value_stack_top]
    }

    /// Value `depth` slots below the top; `pick(1)` is the top.
    pub(crate) fn pick(&self, depth: usize) -> Value {
        self.value_stack[self.value_stack_top - depth]
    }

    pub(crate) fn pick_mut(&mut self, depth: usize) -> &mut Value {
        &mut self.value_stack[self.value_stack_top - depth]
    }

    /// Push `count` zeroed values.
    pub(crate) fn alloca(&mut self, count: u32) -> EvalResult<()> {
        let end = self
            .value_stack_top
            .checked_add(count as usize)
            .filter(|&end| end <= self.value_stack.len())
            .ok_or(Trap::ValueStackExhausted)?;
        self.value_stack[self.value_stack_top..end].fill(Value::ZERO);
        self.value_stack_top = end;
        Ok(())
    }

    /// Move the top `keep` values down by `drop` slots and discard the rest.
    pub(crate) fn drop_keep(&mut self, drop: u32, keep: u8) {
        let (drop, keep) = (drop as usize, keep as usize);
        let top = self.value_stack_top;
        if drop > 0 && keep > 0 {
            self.value_stack
                .copy_within(top - keep..top, top - keep - drop);
        }
        self.value_stack_top = top - drop;
    }

    // ── Call stack ───────────────────────────────────────────────────────

    pub(crate) fn push_call(&mut self, return_pc: u32) -> EvalResult<()> {
        let slot = self
            .call_stack
            .get_mut(self.call_stack_top)
            .ok_or(Trap::CallStackExhausted)?;
        *slot = return_pc;
        self.call_stack_top += 1;
        Ok(())
    }

    pub(crate) fn pop_call(&mut self) -> u32 {
        self.call_stack_top -= 1;
        self.call_stack[self.call_stack_top]
    }
}
