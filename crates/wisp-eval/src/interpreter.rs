//! The stream interpreter.
//!
//! [`Thread::run`] executes up to `quantum` instructions starting at the
//! thread's pc. Operands are read in place and only popped once an
//! instruction can no longer trap, so a trapping instruction leaves the pc
//! on itself and memory untouched.

use tracing::warn;
use wisp_types::{
    Environment, Func, Memory, Opcode, StreamReader, TableEntry, TypedValue, Value, MAX_PAGES,
    PAGE_SIZE,
};

use crate::error::{EvalResult, Trap};
use crate::numeric::{self, F32_SIGN, F64_SIGN};
use crate::thread::{RunStatus, Thread};

/// Replace the top value with `f(top)`.
macro_rules! unary {
    ($thread:expr, $get:ident => $put:ident, |$v:ident| $body:expr) => {{
        let $v = $thread.pick(1).$get();
        let result = $body;
        *$thread.pick_mut(1) = Value::$put(result);
    }};
}

/// Replace the top two values with `f(lhs, rhs)`.
macro_rules! binary {
    ($thread:expr, $get:ident => $put:ident, |$l:ident, $r:ident| $body:expr) => {{
        let $r = $thread.pick(1).$get();
        let $l = $thread.pick(2).$get();
        let result = $body;
        $thread.value_stack_top -= 1;
        *$thread.pick_mut(1) = Value::$put(result);
    }};
}

impl Thread {
    /// Execute at most `quantum` instructions.
    ///
    /// Returns [`RunStatus::Returned`] once a `return` executes with the call
    /// stack at `call_stack_return_top`, and [`RunStatus::Running`] when the
    /// quantum runs out first. A trap aborts the quantum with the pc left at
    /// the trapping instruction.
    pub fn run(
        &mut self,
        env: &mut Environment,
        quantum: u32,
        call_stack_return_top: usize,
    ) -> EvalResult<RunStatus> {
        for _ in 0..quantum {
            if self.step(env, call_stack_return_top)? == RunStatus::Returned {
                return Ok(RunStatus::Returned);
            }
        }
        Ok(RunStatus::Running)
    }

    fn step(&mut self, env: &mut Environment, call_stack_return_top: usize) -> EvalResult<RunStatus> {
        let mut reader = StreamReader::new(&env.istream, self.pc as usize);
        let byte = reader.read_u8();
        let op = Opcode::from_byte(byte).ok_or(Trap::InvalidOpcode(byte))?;
        let mut jump: Option<u32> = None;

        use Opcode::*;
        match op {
            // ── Control ──────────────────────────────────────────────────
            Unreachable => return Err(Trap::Unreachable),
            Br => jump = Some(reader.read_u32()),
            BrUnless => {
                let target = reader.read_u32();
                if self.pop().as_i32() == 0 {
                    jump = Some(target);
                }
            }
            BrTable => {
                let count = reader.read_u32();
                let table_offset = reader.read_u32();
                let key = self.pop().as_i32().min(count);
                let entry = TableEntry::read(&env.istream, table_offset, key);
                self.drop_keep(entry.drop, entry.keep);
                jump = Some(entry.offset);
            }
            Return => {
                if self.call_stack_top == call_stack_return_top {
                    return Ok(RunStatus::Returned);
                }
                jump = Some(self.pop_call());
            }
            Call => {
                let target = reader.read_u32();
                self.push_call(reader.position() as u32)?;
                jump = Some(target);
            }
            CallIndirect => {
                let table_index = reader.read_u32() as usize;
                let sig_index = reader.read_u32() as usize;
                let key = self.pick(1).as_i32() as usize;
                let func_index = env.tables[table_index]
                    .func_indexes
                    .get(key)
                    .ok_or(Trap::UndefinedTableIndex)?
                    .ok_or(Trap::UninitializedTableElement)? as usize;
                let func = &env.funcs[func_index];
                if !env.func_signatures_equal(func.sig_index(), sig_index) {
                    return Err(Trap::IndirectCallSignatureMismatch);
                }
                match func {
                    Func::Host(_) => self.invoke_host(env, func_index, 1)?,
                    Func::Defined(defined) => {
                        let target = defined.offset.ok_or(Trap::UninitializedTableElement)?;
                        self.push_call(reader.position() as u32)?;
                        self.value_stack_top -= 1;
                        jump = Some(target);
                    }
                }
            }
            CallHost => {
                let func_index = reader.read_u32() as usize;
                self.call_host(env, func_index)?;
            }

            // ── Internal ─────────────────────────────────────────────────
            Alloca => {
                let count = reader.read_u32();
                self.alloca(count)?;
            }
            DropKeep => {
                let drop = reader.read_u32();
                let keep = reader.read_u8();
                self.drop_keep(drop, keep);
            }
            Data => {
                let size = reader.read_u32();
                reader.skip(size as usize);
            }

            // ── Parametric ───────────────────────────────────────────────
            Drop => self.value_stack_top -= 1,
            Select => {
                let cond = self.pick(1).as_i32();
                let value = if cond != 0 { self.pick(3) } else { self.pick(2) };
                self.value_stack_top -= 2;
                *self.pick_mut(1) = value;
            }

            // ── Variables ────────────────────────────────────────────────
            GetLocal => {
                let slot = reader.read_u32() as usize;
                self.push(self.pick(slot))?;
            }
            SetLocal => {
                let slot = reader.read_u32() as usize;
                let value = self.pop();
                *self.pick_mut(slot) = value;
            }
            TeeLocal => {
                let slot = reader.read_u32() as usize;
                let value = self.pick(1);
                *self.pick_mut(slot) = value;
            }
            GetGlobal => {
                let index = reader.read_u32() as usize;
                self.push(env.globals[index].typed_value.value)?;
            }
            SetGlobal => {
                let index = reader.read_u32() as usize;
                env.globals[index].typed_value.value = self.pop();
            }

            // ── Memory ───────────────────────────────────────────────────
            I32Store | I64Store | F32Store | F64Store | I32Store8 | I32Store16 | I64Store8
            | I64Store16 | I64Store32 => {
                let memory = &mut env.memories[reader.read_u32() as usize];
                let offset = reader.read_u32();
                let size = op.memory_size() as usize;
                let at = effective_address(memory, self.pick(2).as_i32(), offset, size)?;
                let bytes = self.pick(1).bits().to_le_bytes();
                memory.data[at..at + size].copy_from_slice(&bytes[..size]);
                self.value_stack_top -= 2;
            }
            I32Load | I64Load | F32Load | F64Load | I32Load8S | I32Load8U | I32Load16S
            | I32Load16U | I64Load8S | I64Load8U | I64Load16S | I64Load16U | I64Load32S
            | I64Load32U => {
                let memory = &env.memories[reader.read_u32() as usize];
                let offset = reader.read_u32();
                let size = op.memory_size() as usize;
                let at = effective_address(memory, self.pick(1).as_i32(), offset, size)?;
                *self.pick_mut(1) = load(memory, op, at);
            }
            CurrentMemory => {
                let memory = &env.memories[reader.read_u32() as usize];
                self.push(Value::from_i32(memory.page_count() as u32))?;
            }
            GrowMemory => {
                let memory = &mut env.memories[reader.read_u32() as usize];
                let delta = self.pick(1).as_i32();
                let result = grow_memory(memory, delta).unwrap_or(u32::MAX);
                *self.pick_mut(1) = Value::from_i32(result);
            }

            // ── Constants ────────────────────────────────────────────────
            I32Const => self.push(Value::from_i32(reader.read_u32()))?,
            I64Const => self.push(Value::from_i64(reader.read_u64()))?,
            F32Const => self.push(Value::from_f32_bits(reader.read_u32()))?,
            F64Const => self.push(Value::from_f64_bits(reader.read_u64()))?,

            // ── i32 ──────────────────────────────────────────────────────
            I32Eqz => unary!(self, as_i32 => from_i32, |v| u32::from(v == 0)),
            I32Eq => binary!(self, as_i32 => from_i32, |l, r| u32::from(l == r)),
            I32Ne => binary!(self, as_i32 => from_i32, |l, r| u32::from(l != r)),
            I32LtS => binary!(self, as_i32 => from_i32, |l, r| u32::from((l as i32) < (r as i32))),
            I32LtU => binary!(self, as_i32 => from_i32, |l, r| u32::from(l < r)),
            I32GtS => binary!(self, as_i32 => from_i32, |l, r| u32::from((l as i32) > (r as i32))),
            I32GtU => binary!(self, as_i32 => from_i32, |l, r| u32::from(l > r)),
            I32LeS => binary!(self, as_i32 => from_i32, |l, r| u32::from((l as i32) <= (r as i32))),
            I32LeU => binary!(self, as_i32 => from_i32, |l, r| u32::from(l <= r)),
            I32GeS => binary!(self, as_i32 => from_i32, |l, r| u32::from((l as i32) >= (r as i32))),
            I32GeU => binary!(self, as_i32 => from_i32, |l, r| u32::from(l >= r)),
            I32Clz => unary!(self, as_i32 => from_i32, |v| v.leading_zeros()),
            I32Ctz => unary!(self, as_i32 => from_i32, |v| v.trailing_zeros()),
            I32Popcnt => unary!(self, as_i32 => from_i32, |v| v.count_ones()),
            I32Add => binary!(self, as_i32 => from_i32, |l, r| l.wrapping_add(r)),
            I32Sub => binary!(self, as_i32 => from_i32, |l, r| l.wrapping_sub(r)),
            I32Mul => binary!(self, as_i32 => from_i32, |l, r| l.wrapping_mul(r)),
            I32DivS => binary!(self, as_i32 => from_i32, |l, r| numeric::i32_div_s(l, r)?),
            I32DivU => binary!(self, as_i32 => from_i32, |l, r| numeric::i32_div_u(l, r)?),
            I32RemS => binary!(self, as_i32 => from_i32, |l, r| numeric::i32_rem_s(l, r)?),
            I32RemU => binary!(self, as_i32 => from_i32, |l, r| numeric::i32_rem_u(l, r)?),
            I32And => binary!(self, as_i32 => from_i32, |l, r| l & r),
            I32Or => binary!(self, as_i32 => from_i32, |l, r| l | r),
            I32Xor => binary!(self, as_i32 => from_i32, |l, r| l ^ r),
            I32Shl => binary!(self, as_i32 => from_i32, |l, r| l.wrapping_shl(r)),
            I32ShrS => binary!(self, as_i32 => from_i32, |l, r| (l as i32).wrapping_shr(r) as u32),
            I32ShrU => binary!(self, as_i32 => from_i32, |l, r| l.wrapping_shr(r)),
            I32Rotl => binary!(self, as_i32 => from_i32, |l, r| l.rotate_left(r % 32)),
            I32Rotr => binary!(self, as_i32 => from_i32, |l, r| l.rotate_right(r % 32)),
            I32Extend8S => unary!(self, as_i32 => from_i32, |v| v as i8 as i32 as u32),
            I32Extend16S => unary!(self, as_i32 => from_i32, |v| v as i16 as i32 as u32),

            // ── i64 ──────────────────────────────────────────────────────
            I64Eqz => unary!(self, as_i64 => from_i32, |v| u32::from(v == 0)),
            I64Eq => binary!(self, as_i64 => from_i32, |l, r| u32::from(l == r)),
            I64Ne => binary!(self, as_i64 => from_i32, |l, r| u32::from(l != r)),
            I64LtS => binary!(self, as_i64 => from_i32, |l, r| u32::from((l as i64) < (r as i64))),
            I64LtU => binary!(self, as_i64 => from_i32, |l, r| u32::from(l < r)),
            I64GtS => binary!(self, as_i64 => from_i32, |l, r| u32::from((l as i64) > (r as i64))),
            I64GtU => binary!(self, as_i64 => from_i32, |l, r| u32::from(l > r)),
            I64LeS => binary!(self, as_i64 => from_i32, |l, r| u32::from((l as i64) <= (r as i64))),
            I64LeU => binary!(self, as_i64 => from_i32, |l, r| u32::from(l <= r)),
            I64GeS => binary!(self, as_i64 => from_i32, |l, r| u32::from((l as i64) >= (r as i64))),
            I64GeU => binary!(self, as_i64 => from_i32, |l, r| u32::from(l >= r)),
            I64Clz => unary!(self, as_i64 => from_i64, |v| u64::from(v.leading_zeros())),
            I64Ctz => unary!(self, as_i64 => from_i64, |v| u64::from(v.trailing_zeros())),
            I64Popcnt => unary!(self, as_i64 => from_i64, |v| u64::from(v.count_ones())),
            I64Add => binary!(self, as_i64 => from_i64, |l, r| l.wrapping_add(r)),
            I64Sub => binary!(self, as_i64 => from_i64, |l, r| l.wrapping_sub(r)),
            I64Mul => binary!(self, as_i64 => from_i64, |l, r| l.wrapping_mul(r)),
            I64DivS => binary!(self, as_i64 => from_i64, |l, r| numeric::i64_div_s(l, r)?),
            I64DivU => binary!(self, as_i64 => from_i64, |l, r| numeric::i64_div_u(l, r)?),
            I64RemS => binary!(self, as_i64 => from_i64, |l, r| numeric::i64_rem_s(l, r)?),
            I64RemU => binary!(self, as_i64 => from_i64, |l, r| numeric::i64_rem_u(l, r)?),
            I64And => binary!(self, as_i64 => from_i64, |l, r| l & r),
            I64Or => binary!(self, as_i64 => from_i64, |l, r| l | r),
            I64Xor => binary!(self, as_i64 => from_i64, |l, r| l ^ r),
            I64Shl => binary!(self, as_i64 => from_i64, |l, r| l.wrapping_shl(r as u32)),
            I64ShrS => binary!(self, as_i64 => from_i64, |l, r| (l as i64).wrapping_shr(r as u32) as u64),
            I64ShrU => binary!(self, as_i64 => from_i64, |l, r| l.wrapping_shr(r as u32)),
            I64Rotl => binary!(self, as_i64 => from_i64, |l, r| l.rotate_left((r % 64) as u32)),
            I64Rotr => binary!(self, as_i64 => from_i64, |l, r| l.rotate_right((r % 64) as u32)),
            I64Extend8S => unary!(self, as_i64 => from_i64, |v| v as i8 as i64 as u64),
            I64Extend16S => unary!(self, as_i64 => from_i64, |v| v as i16 as i64 as u64),
            I64Extend32S => unary!(self, as_i64 => from_i64, |v| v as i32 as i64 as u64),

            // ── f32 ──────────────────────────────────────────────────────
            F32Eq => binary!(self, as_f32 => from_i32, |l, r| u32::from(l == r)),
            F32Ne => binary!(self, as_f32 => from_i32, |l, r| u32::from(l != r)),
            F32Lt => binary!(self, as_f32 => from_i32, |l, r| u32::from(l < r)),
            F32Gt => binary!(self, as_f32 => from_i32, |l, r| u32::from(l > r)),
            F32Le => binary!(self, as_f32 => from_i32, |l, r| u32::from(l <= r)),
            F32Ge => binary!(self, as_f32 => from_i32, |l, r| u32::from(l >= r)),
            F32Abs => unary!(self, as_f32_bits => from_f32_bits, |v| v & !F32_SIGN),
            F32Neg => unary!(self, as_f32_bits => from_f32_bits, |v| v ^ F32_SIGN),
            F32Ceil => unary!(self, as_f32 => from_f32, |v| v.ceil()),
            F32Floor => unary!(self, as_f32 => from_f32, |v| v.floor()),
            F32Trunc => unary!(self, as_f32 => from_f32, |v| v.trunc()),
            F32Nearest => unary!(self, as_f32_bits => from_f32_bits, |v| numeric::f32_nearest(v)),
            F32Sqrt => unary!(self, as_f32 => from_f32, |v| v.sqrt()),
            F32Add => binary!(self, as_f32 => from_f32, |l, r| l + r),
            F32Sub => binary!(self, as_f32 => from_f32, |l, r| l - r),
            F32Mul => binary!(self, as_f32 => from_f32, |l, r| l * r),
            F32Div => binary!(self, as_f32_bits => from_f32_bits, |l, r| numeric::f32_div(l, r)),
            F32Min => binary!(self, as_f32_bits => from_f32_bits, |l, r| numeric::f32_min(l, r)),
            F32Max => binary!(self, as_f32_bits => from_f32_bits, |l, r| numeric::f32_max(l, r)),
            F32Copysign => {
                binary!(self, as_f32_bits => from_f32_bits, |l, r| numeric::f32_copysign(l, r))
            }

            // ── f64 ──────────────────────────────────────────────────────
            F64Eq => binary!(self, as_f64 => from_i32, |l, r| u32::from(l == r)),
            F64Ne => binary!(self, as_f64 => from_i32, |l, r| u32::from(l != r)),
            F64Lt => binary!(self, as_f64 => from_i32, |l, r| u32::from(l < r)),
            F64Gt => binary!(self, as_f64 => from_i32, |l, r| u32::from(l > r)),
            F64Le => binary!(self, as_f64 => from_i32, |l, r| u32::from(l <= r)),
            F64Ge => binary!(self, as_f64 => from_i32, |l, r| u32::from(l >= r)),
            F64Abs => unary!(self, as_f64_bits => from_f64_bits, |v| v & !F64_SIGN),
            F64Neg => unary!(self, as_f64_bits => from_f64_bits, |v| v ^ F64_SIGN),
            F64Ceil => unary!(self, as_f64 => from_f64, |v| v.ceil()),
            F64Floor => unary!(self, as_f64 => from_f64, |v| v.floor()),
            F64Trunc => unary!(self, as_f64 => from_f64, |v| v.trunc()),
            F64Nearest => unary!(self, as_f64_bits => from_f64_bits, |v| numeric::f64_nearest(v)),
            F64Sqrt => unary!(self, as_f64 => from_f64, |v| v.sqrt()),
            F64Add => binary!(self, as_f64 => from_f64, |l, r| l + r),
            F64Sub => binary!(self, as_f64 => from_f64, |l, r| l - r),
            F64Mul => binary!(self, as_f64 => from_f64, |l, r| l * r),
            F64Div => binary!(self, as_f64_bits => from_f64_bits, |l, r| numeric::f64_div(l, r)),
            F64Min => binary!(self, as_f64_bits => from_f64_bits, |l, r| numeric::f64_min(l, r)),
            F64Max => binary!(self, as_f64_bits => from_f64_bits, |l, r| numeric::f64_max(l, r)),
            F64Copysign => {
                binary!(self, as_f64_bits => from_f64_bits, |l, r| numeric::f64_copysign(l, r))
            }

            // ── Conversions ──────────────────────────────────────────────
            I32WrapI64 => unary!(self, as_i64 => from_i32, |v| v as u32),
            I32TruncSF32 => unary!(self, as_f32_bits => from_i32, |v| numeric::i32_trunc_s_f32(v)?),
            I32TruncUF32 => unary!(self, as_f32_bits => from_i32, |v| numeric::i32_trunc_u_f32(v)?),
            I32TruncSF64 => unary!(self, as_f64_bits => from_i32, |v| numeric::i32_trunc_s_f64(v)?),
            I32TruncUF64 => unary!(self, as_f64_bits => from_i32, |v| numeric::i32_trunc_u_f64(v)?),
            I64ExtendSI32 => unary!(self, as_i32 => from_i64, |v| v as i32 as i64 as u64),
            I64ExtendUI32 => unary!(self, as_i32 => from_i64, |v| u64::from(v)),
            I64TruncSF32 => unary!(self, as_f32_bits => from_i64, |v| numeric::i64_trunc_s_f32(v)?),
            I64TruncUF32 => unary!(self, as_f32_bits => from_i64, |v| numeric::i64_trunc_u_f32(v)?),
            I64TruncSF64 => unary!(self, as_f64_bits => from_i64, |v| numeric::i64_trunc_s_f64(v)?),
            I64TruncUF64 => unary!(self, as_f64_bits => from_i64, |v| numeric::i64_trunc_u_f64(v)?),
            F32ConvertSI32 => unary!(self, as_i32 => from_f32, |v| v as i32 as f32),
            F32ConvertUI32 => unary!(self, as_i32 => from_f32, |v| v as f32),
            F32ConvertSI64 => unary!(self, as_i64 => from_f32, |v| v as i64 as f32),
            F32ConvertUI64 => unary!(self, as_i64 => from_f32, |v| v as f32),
            F32DemoteF64 => unary!(self, as_f64_bits => from_f32_bits, |v| numeric::f32_demote_f64(v)),
            F64ConvertSI32 => unary!(self, as_i32 => from_f64, |v| f64::from(v as i32)),
            F64ConvertUI32 => unary!(self, as_i32 => from_f64, |v| f64::from(v)),
            F64ConvertSI64 => unary!(self, as_i64 => from_f64, |v| v as i64 as f64),
            F64ConvertUI64 => unary!(self, as_i64 => from_f64, |v| v as f64),
            F64PromoteF32 => unary!(self, as_f32 => from_f64, |v| f64::from(v)),
            I32ReinterpretF32 => unary!(self, as_f32_bits => from_i32, |v| v),
            I64ReinterpretF64 => unary!(self, as_f64_bits => from_i64, |v| v),
            F32ReinterpretI32 => unary!(self, as_i32 => from_f32_bits, |v| v),
            F64ReinterpretI64 => unary!(self, as_i64 => from_f64_bits, |v| v),

            // Saturating truncation: `as` clamps and maps NaN to zero.
            I32TruncSatSF32 => unary!(self, as_f32 => from_i32, |v| v as i32 as u32),
            I32TruncSatUF32 => unary!(self, as_f32 => from_i32, |v| v as u32),
            I32TruncSatSF64 => unary!(self, as_f64 => from_i32, |v| v as i32 as u32),
            I32TruncSatUF64 => unary!(self, as_f64 => from_i32, |v| v as u32),
            I64TruncSatSF32 => unary!(self, as_f32 => from_i64, |v| v as i64 as u64),
            I64TruncSatUF32 => unary!(self, as_f32 => from_i64, |v| v as u64),
            I64TruncSatSF64 => unary!(self, as_f64 => from_i64, |v| v as i64 as u64),
            I64TruncSatUF64 => unary!(self, as_f64 => from_i64, |v| v as u64),
        }

        self.pc = jump.unwrap_or(reader.position() as u32);
        Ok(RunStatus::Running)
    }

    /// Call a host function with its params taken from the top of the stack.
    pub(crate) fn call_host(&mut self, env: &Environment, func_index: usize) -> EvalResult<()> {
        self.invoke_host(env, func_index, 0)
    }

    /// Call host func `func_index` with the arguments that sit below the top
    /// `above` slots. Everything from the arguments up is replaced by the
    /// results only once the call has succeeded.
    fn invoke_host(
        &mut self,
        env: &Environment,
        func_index: usize,
        above: usize,
    ) -> EvalResult<()> {
        let Some(Func::Host(func)) = env.funcs.get(func_index) else {
            return Err(Trap::HostTrapped);
        };
        let Some(callback) = func.callback.as_ref() else {
            return Err(Trap::HostTrapped);
        };
        let sig = &env.sigs[func.sig_index];
        let args_top = self.value_stack_top - above;
        let base = args_top - sig.param_types.len();

        let mut args = std::mem::take(&mut self.host_args);
        args.clear();
        args.extend(
            sig.param_types
                .iter()
                .zip(&self.value_stack[base..args_top])
                .map(|(&ty, &value)| TypedValue::new(ty, value)),
        );
        let mut results: Vec<TypedValue> =
            sig.result_types.iter().map(|&ty| TypedValue::zero(ty)).collect();

        let outcome = callback(&args, &mut results);
        self.host_args = args;
        if let Err(err) = outcome {
            warn!(
                module = %func.module_name,
                field = %func.field_name,
                error = %err,
                "host function trapped"
            );
            return Err(Trap::HostTrapped);
        }
        if results.iter().zip(&sig.result_types).any(|(r, &ty)| r.ty != ty) {
            return Err(Trap::HostResultTypeMismatch);
        }

        self.value_stack_top = base;
        for result in results {
            self.push(result.value)?;
        }
        Ok(())
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Linear memory
// ══════════════════════════════════════════════════════════════════════════════

/// Byte index of an access of `size` bytes at `addr + offset`.
fn effective_address(memory: &Memory, addr: u32, offset: u32, size: usize) -> EvalResult<usize> {
    let at = u64::from(addr) + u64::from(offset);
    if at + size as u64 > memory.byte_size() as u64 {
        return Err(Trap::MemoryAccessOutOfBounds);
    }
    Ok(at as usize)
}

fn load(memory: &Memory, op: Opcode, at: usize) -> Value {
    let size = op.memory_size() as usize;
    let mut buf = [0u8; 8];
    buf[..size].copy_from_slice(&memory.data[at..at + size]);
    let raw = u64::from_le_bytes(buf);
    match op {
        Opcode::I32Load | Opcode::I32Load8U | Opcode::I32Load16U => Value::from_i32(raw as u32),
        Opcode::I32Load8S => Value::from_i32(raw as i8 as i32 as u32),
        Opcode::I32Load16S => Value::from_i32(raw as i16 as i32 as u32),
        Opcode::I64Load8S => Value::from_i64(raw as i8 as i64 as u64),
        Opcode::I64Load16S => Value::from_i64(raw as i16 as i64 as u64),
        Opcode::I64Load32S => Value::from_i64(raw as i32 as i64 as u64),
        Opcode::F32Load => Value::from_f32_bits(raw as u32),
        Opcode::F64Load => Value::from_f64_bits(raw),
        _ => Value::from_i64(raw),
    }
}

/// Grow by `delta` pages, returning the old page count, or `None` when the
/// memory cannot grow that far.
fn grow_memory(memory: &mut Memory, delta: u32) -> Option<u32> {
    let old = memory.page_count();
    let max = memory.page_limits.max.unwrap_or(MAX_PAGES).min(MAX_PAGES);
    let new = old + u64::from(delta);
    if new > max || new * PAGE_SIZE > u64::from(u32::MAX) {
        return None;
    }
    let new_size = (new * PAGE_SIZE) as usize;
    memory.data.try_reserve(new_size - memory.data.len()).ok()?;
    memory.data.resize(new_size, 0);
    memory.page_limits.initial = new;
    Some(old as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wisp_types::Limits;

    #[test]
    fn test_effective_address_bounds() {
        let memory = Memory::new(Limits::new(1, None));
        assert_eq!(effective_address(&memory, 65532, 0, 4), Ok(65532));
        assert_eq!(
            effective_address(&memory, 65533, 0, 4),
            Err(Trap::MemoryAccessOutOfBounds)
        );
        assert_eq!(
            effective_address(&memory, u32::MAX, u32::MAX, 1),
            Err(Trap::MemoryAccessOutOfBounds)
        );
    }

    #[test]
    fn test_sign_extending_loads() {
        let mut memory = Memory::new(Limits::new(1, None));
        memory.data[..4].copy_from_slice(&[0xff, 0x80, 0x00, 0x80]);
        assert_eq!(load(&memory, Opcode::I32Load8S, 0).as_i32(), u32::MAX);
        assert_eq!(load(&memory, Opcode::I32Load8U, 0).as_i32(), 0xff);
        assert_eq!(load(&memory, Opcode::I64Load16S, 0).as_i64(), 0xffff_ffff_ffff_80ff);
        assert_eq!(load(&memory, Opcode::I64Load32U, 0).as_i64(), 0x8000_80ff);
    }

    #[test]
    fn test_grow_memory_respects_max() {
        let mut memory = Memory::new(Limits::new(1, Some(2)));
        assert_eq!(grow_memory(&mut memory, 1), Some(1));
        assert_eq!(memory.byte_size(), 2 * PAGE_SIZE as usize);
        assert_eq!(grow_memory(&mut memory, 1), None);
        assert_eq!(grow_memory(&mut memory, 0), Some(2));
        assert_eq!(memory.page_count(), 2);
    }
}
