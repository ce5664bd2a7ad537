//! Function-body lowering.
//!
//! Operators arrive in program order. Each one is first validated by the
//! [`TypeChecker`](wisp_checker::TypeChecker), then lowered into the stream.
//! Structured control flow (`block`, `loop`, `if`, `else`, `end`, `br_if`)
//! is lowered into flat `br` / `br_unless` jumps with explicit drop/keep.

use wasmparser::{BlockType, BrTable, FunctionBody, MemArg, Operator};
use wisp_checker::DropKeep;
use wisp_types::stream::TABLE_ENTRY_SIZE;
use wisp_types::{ErrorCode, OpClass, Opcode, ValueType};

use crate::compiler::{value_type, ModuleCompiler};
use crate::error::{invalid, CodegenError, CodegenResult};

/// Maximum number of declared locals in one function.
pub(crate) const MAX_LOCALS: u32 = 50_000;

impl ModuleCompiler<'_> {
    // ══════════════════════════════════════════════════════════════════════
    // Function setup and teardown
    // ══════════════════════════════════════════════════════════════════════

    pub(crate) fn compile_function_body(&mut self, body: &FunctionBody<'_>) -> CodegenResult<()> {
        let defined_index = self.next_body;
        let func_index = self
            .func_index_mapping
            .get(self.num_func_imports + defined_index)
            .copied()
            .ok_or_else(|| {
                invalid(
                    ErrorCode::FUNCTION_BODY_COUNT,
                    "function body count exceeds function signature count",
                )
            })?;
        let sig = self.env.func_signature(func_index).clone();

        // Locals.
        let mut local_types = sig.param_types.clone();
        let mut local_decl_count = 0u32;
        let mut local_count = 0u32;
        let mut locals = body.get_locals_reader()?;
        for _ in 0..locals.get_count() {
            let (count, ty) = locals.read()?;
            let ty = value_type(ty)?;
            local_count = local_count
                .checked_add(count)
                .filter(|&n| n <= MAX_LOCALS)
                .ok_or_else(|| {
                    invalid(
                        ErrorCode::LIMIT_EXCEEDED,
                        format!("too many locals (max {MAX_LOCALS})"),
                    )
                })?;
            local_decl_count += 1;
            local_types.extend(std::iter::repeat(ty).take(count as usize));
        }

        // Offset, and every call site that was waiting for it.
        let offset = self.istream_offset();
        if let Some(func) = self.env.funcs[func_index].as_defined_mut() {
            func.offset = Some(offset);
            func.local_decl_count = local_decl_count;
            func.local_count = local_count;
            func.param_and_local_types = local_types.clone();
        }
        let pending = self
            .func_fixups
            .get_mut(defined_index)
            .map(std::mem::take)
            .unwrap_or_default();
        for at in pending {
            self.emit_u32_at(at, offset);
        }

        self.labels.clear();
        self.depth_fixups.clear();
        self.local_types = local_types;
        self.checker.begin_function(&sig.result_types);
        self.push_label(None, None);
        if local_count > 0 {
            self.emit_opcode(Opcode::Alloca);
            self.emit_u32(local_count);
        }

        let mut reader = body.get_operators_reader()?;
        while !reader.eof() {
            let (op, offset) = reader.read_with_offset()?;
            self.compile_operator(&op).map_err(|e| e.at(offset))?;
        }
        if !self.labels.is_empty() {
            return Err(invalid(
                ErrorCode::MALFORMED_BINARY,
                "function body must end with an end opcode",
            ));
        }

        self.next_body += 1;
        Ok(())
    }

    /// Drop/keep of a return: the function label's branch plus every param
    /// and local below the operands.
    fn return_drop_keep(&self) -> CodegenResult<DropKeep> {
        let depth = self.checker.label_count().saturating_sub(1);
        let dk = self.checker.br_drop_keep(depth)?;
        Ok(DropKeep {
            drop: dk.drop + self.local_types.len() as u32,
            keep: dk.keep,
        })
    }

    fn end_function_body(&mut self) -> CodegenResult<()> {
        self.fixup_top_label();
        let dk = self.return_drop_keep()?;
        self.checker.end_function()?;
        self.emit_drop_keep(dk)?;
        self.emit_opcode(Opcode::Return);
        if self.depth_fixups.iter().any(|f| !f.is_empty()) {
            return Err(CodegenError::Internal(
                "unresolved branch fixups at function end".to_string(),
            ));
        }
        self.pop_label();
        Ok(())
    }

    // ══════════════════════════════════════════════════════════════════════
    // Operators
    // ══════════════════════════════════════════════════════════════════════

    fn compile_operator(&mut self, op: &Operator<'_>) -> CodegenResult<()> {
        if self.labels.is_empty() {
            return Err(invalid(
                ErrorCode::MALFORMED_BINARY,
                "operators after function end",
            ));
        }

        if let Some(opcode) = simple_opcode(op) {
            match opcode.class() {
                OpClass::Unary => self.checker.on_unary(opcode)?,
                OpClass::Binary => self.checker.on_binary(opcode)?,
                OpClass::Compare => self.checker.on_compare(opcode)?,
                OpClass::Convert => self.checker.on_convert(opcode)?,
                _ => {
                    return Err(CodegenError::Internal(format!(
                        "{} is not a numeric opcode",
                        opcode.name()
                    )))
                }
            }
            self.emit_opcode(opcode);
            return Ok(());
        }
        if let Some((opcode, memarg)) = memory_access(op) {
            return self.on_memory_access(opcode, memarg);
        }

        match *op {
            // ── Control ──────────────────────────────────────────────────
            Operator::Unreachable => {
                self.checker.on_unreachable()?;
                self.emit_opcode(Opcode::Unreachable);
            }
            Operator::Nop => {}
            Operator::Block { blockty } => {
                let (params, results) = self.block_signature(blockty)?;
                self.checker.on_block(&params, &results)?;
                self.push_label(None, None);
            }
            Operator::Loop { blockty } => {
                let (params, results) = self.block_signature(blockty)?;
                self.checker.on_loop(&params, &results)?;
                let offset = self.istream_offset();
                self.push_label(Some(offset), None);
            }
            Operator::If { blockty } => {
                let (params, results) = self.block_signature(blockty)?;
                self.checker.on_if(&params, &results)?;
                self.emit_opcode(Opcode::BrUnless);
                let fixup = self.emit_placeholder();
                self.push_label(None, Some(fixup));
            }
            Operator::Else => {
                self.checker.on_else()?;
                self.emit_opcode(Opcode::Br);
                let fixup = self.emit_placeholder();
                let offset = self.istream_offset();
                let label = self.top_label_mut()?;
                let if_fixup = label.fixup_offset.replace(fixup);
                if let Some(at) = if_fixup {
                    self.emit_u32_at(at, offset);
                }
            }
            Operator::End => {
                if self.labels.len() == 1 {
                    return self.end_function_body();
                }
                self.checker.on_end()?;
                let offset = self.istream_offset();
                if let Some(at) = self.top_label_mut()?.fixup_offset.take() {
                    self.emit_u32_at(at, offset);
                }
                self.fixup_top_label();
                self.pop_label();
            }
            Operator::Br { relative_depth } => {
                let depth = relative_depth as usize;
                let dk = self.checker.br_drop_keep(depth)?;
                self.checker.on_br(depth)?;
                self.emit_br(depth, dk)?;
            }
            Operator::BrIf { relative_depth } => {
                let depth = relative_depth as usize;
                self.checker.on_br_if(depth)?;
                let dk = self.checker.br_drop_keep(depth)?;
                self.emit_opcode(Opcode::BrUnless);
                let skip = self.emit_placeholder();
                self.emit_br(depth, dk)?;
                let offset = self.istream_offset();
                self.emit_u32_at(skip, offset);
            }
            Operator::BrTable { ref targets } => self.on_br_table(targets)?,
            Operator::Return => {
                let dk = self.return_drop_keep()?;
                self.checker.on_return()?;
                self.emit_drop_keep(dk)?;
                self.emit_opcode(Opcode::Return);
            }

            // ── Calls ────────────────────────────────────────────────────
            Operator::Call { function_index } => {
                let func_index = self.translate_func(function_index)?;
                let sig = self.env.func_signature(func_index).clone();
                self.checker.on_call(&sig.param_types, &sig.result_types)?;
                if self.env.funcs[func_index].is_host() {
                    self.emit_opcode(Opcode::CallHost);
                    self.emit_u32(func_index as u32);
                } else {
                    self.emit_opcode(Opcode::Call);
                    self.emit_func_offset(func_index, function_index as usize)?;
                }
            }
            Operator::CallIndirect {
                type_index,
                table_index,
            } => {
                let table = match self.module().table_index {
                    Some(table) if table_index == 0 => table,
                    _ => {
                        return Err(invalid(
                            ErrorCode::MISSING_TABLE,
                            "found call_indirect operator, but no table",
                        ))
                    }
                };
                let sig_index = self.translate_sig(type_index)?;
                let sig = self.env.sigs[sig_index].clone();
                self.checker
                    .on_call_indirect(&sig.param_types, &sig.result_types)?;
                self.emit_opcode(Opcode::CallIndirect);
                self.emit_u32(table as u32);
                self.emit_u32(sig_index as u32);
            }

            // ── Parametric ───────────────────────────────────────────────
            Operator::Drop => {
                self.checker.on_drop()?;
                self.emit_opcode(Opcode::Drop);
            }
            Operator::Select => {
                self.checker.on_select(None)?;
                self.emit_opcode(Opcode::Select);
            }
            Operator::TypedSelect { ty } => {
                self.checker.on_select(Some(value_type(ty)?))?;
                self.emit_opcode(Opcode::Select);
            }

            // ── Variables ────────────────────────────────────────────────
            Operator::LocalGet { local_index } => {
                let ty = self.local_type(local_index)?;
                let slot = self.local_slot(local_index);
                self.checker.on_get_local(ty)?;
                self.emit_opcode(Opcode::GetLocal);
                self.emit_u32(slot);
            }
            Operator::LocalSet { local_index } => {
                let ty = self.local_type(local_index)?;
                self.checker.on_set_local(ty)?;
                let slot = self.local_slot(local_index);
                self.emit_opcode(Opcode::SetLocal);
                self.emit_u32(slot);
            }
            Operator::LocalTee { local_index } => {
                let ty = self.local_type(local_index)?;
                self.checker.on_tee_local(ty)?;
                let slot = self.local_slot(local_index);
                self.emit_opcode(Opcode::TeeLocal);
                self.emit_u32(slot);
            }
            Operator::GlobalGet { global_index } => {
                let index = self.translate_global(global_index)?;
                let ty = self.env.globals[index].typed_value.ty;
                self.checker.on_get_global(ty)?;
                self.emit_opcode(Opcode::GetGlobal);
                self.emit_u32(index as u32);
            }
            Operator::GlobalSet { global_index } => {
                let index = self.translate_global(global_index)?;
                let global = &self.env.globals[index];
                if !global.mutable {
                    return Err(invalid(
                        ErrorCode::IMMUTABLE_GLOBAL_SET,
                        format!("can't set_global on immutable global at index {global_index}."),
                    ));
                }
                let ty = global.typed_value.ty;
                self.checker.on_set_global(ty)?;
                self.emit_opcode(Opcode::SetGlobal);
                self.emit_u32(index as u32);
            }

            // ── Memory ───────────────────────────────────────────────────
            Operator::MemorySize { mem } => {
                let memory = self.memory_for(Opcode::CurrentMemory, mem)?;
                self.checker.on_current_memory()?;
                self.emit_opcode(Opcode::CurrentMemory);
                self.emit_u32(memory);
            }
            Operator::MemoryGrow { mem } => {
                let memory = self.memory_for(Opcode::GrowMemory, mem)?;
                self.checker.on_grow_memory()?;
                self.emit_opcode(Opcode::GrowMemory);
                self.emit_u32(memory);
            }

            // ── Constants ────────────────────────────────────────────────
            Operator::I32Const { value } => {
                self.checker.on_const(ValueType::I32)?;
                self.emit_opcode(Opcode::I32Const);
                self.emit_u32(value as u32);
            }
            Operator::I64Const { value } => {
                self.checker.on_const(ValueType::I64)?;
                self.emit_opcode(Opcode::I64Const);
                self.emit_u64(value as u64);
            }
            Operator::F32Const { value } => {
                self.checker.on_const(ValueType::F32)?;
                self.emit_opcode(Opcode::F32Const);
                self.emit_u32(value.bits());
            }
            Operator::F64Const { value } => {
                self.checker.on_const(ValueType::F64)?;
                self.emit_opcode(Opcode::F64Const);
                self.emit_u64(value.bits());
            }

            ref other => {
                return Err(invalid(
                    ErrorCode::UNSUPPORTED_FEATURE,
                    format!("unsupported operator {other:?}"),
                ))
            }
        }
        Ok(())
    }

    // ── Branch tables ────────────────────────────────────────────────────

    fn on_br_table(&mut self, targets: &BrTable<'_>) -> CodegenResult<()> {
        self.checker.begin_br_table()?;
        let count = targets.len();

        self.emit_opcode(Opcode::BrTable);
        self.emit_u32(count);
        let table_offset_at = self.emit_placeholder();
        self.emit_opcode(Opcode::Data);
        self.emit_u32((count + 1) * TABLE_ENTRY_SIZE);
        let table_offset = self.istream_offset();
        self.emit_u32_at(table_offset_at, table_offset);

        for depth in targets.targets() {
            let depth = depth? as usize;
            self.checker.on_br_table_target(depth)?;
            self.emit_br_table_entry(depth)?;
        }
        let default = targets.default() as usize;
        self.checker.on_br_table_target(default)?;
        self.emit_br_table_entry(default)?;

        self.checker.end_br_table()?;
        Ok(())
    }

    // ── Locals ───────────────────────────────────────────────────────────

    fn local_type(&self, local_index: u32) -> CodegenResult<ValueType> {
        self.local_types
            .get(local_index as usize)
            .copied()
            .ok_or_else(|| {
                invalid(
                    ErrorCode::INVALID_LOCAL_INDEX,
                    format!(
                        "invalid local_index: {local_index} (max {})",
                        self.local_types.len()
                    ),
                )
            })
    }

    /// Distance from the current stack top down to the local's slot.
    fn local_slot(&self, local_index: u32) -> u32 {
        (self.checker.type_stack_len() + self.local_types.len() - local_index as usize) as u32
    }

    // ── Memory access ────────────────────────────────────────────────────

    fn memory_for(&self, opcode: Opcode, mem: u32) -> CodegenResult<u32> {
        match self.module().memory_index {
            Some(memory) if mem == 0 => Ok(memory as u32),
            Some(_) => Err(invalid(
                ErrorCode::MISSING_MEMORY,
                format!("invalid memory index: {mem}"),
            )),
            None => Err(invalid(
                ErrorCode::MISSING_MEMORY,
                format!("{} requires an imported or defined memory.", opcode.name()),
            )),
        }
    }

    fn on_memory_access(&mut self, opcode: Opcode, memarg: MemArg) -> CodegenResult<()> {
        let memory = self.memory_for(opcode, memarg.memory)?;
        let size = opcode.memory_size();
        let aligned = 1u32
            .checked_shl(u32::from(memarg.align))
            .is_some_and(|alignment| alignment <= size);
        if !aligned {
            return Err(invalid(
                ErrorCode::INVALID_ALIGNMENT,
                format!("alignment must not be larger than natural alignment ({size})"),
            ));
        }
        let offset = u32::try_from(memarg.offset).map_err(|_| {
            invalid(
                ErrorCode::LIMIT_EXCEEDED,
                format!("memory offset {} exceeds u32 range", memarg.offset),
            )
        })?;

        if opcode.class() == OpClass::Load {
            self.checker.on_load(opcode)?;
        } else {
            self.checker.on_store(opcode)?;
        }
        self.emit_opcode(opcode);
        self.emit_u32(memory);
        self.emit_u32(offset);
        Ok(())
    }

    // ── Block types ──────────────────────────────────────────────────────

    fn block_signature(&self, blockty: BlockType) -> CodegenResult<(Vec<ValueType>, Vec<ValueType>)> {
        match blockty {
            BlockType::Empty => Ok((Vec::new(), Vec::new())),
            BlockType::Type(ty) => Ok((Vec::new(), vec![value_type(ty)?])),
            BlockType::FuncType(index) => {
                let sig = &self.env.sigs[self.translate_sig(index)?];
                Ok((sig.param_types.clone(), sig.result_types.clone()))
            }
        }
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Operator → opcode tables
// ══════════════════════════════════════════════════════════════════════════════

macro_rules! map_operators {
    ($op:expr; $($operator:ident => $opcode:ident),* $(,)?) => {
        match $op {
            $( Operator::$operator => Some(Opcode::$opcode), )*
            _ => None,
        }
    };
}

/// Stream opcode of an immediate-free numeric operator.
pub(crate) fn simple_opcode(op: &Operator<'_>) -> Option<Opcode> {
    map_operators! { op;
        I32Eqz => I32Eqz, I32Eq => I32Eq, I32Ne => I32Ne,
        I32LtS => I32LtS, I32LtU => I32LtU, I32GtS => I32GtS, I32GtU => I32GtU,
        I32LeS => I32LeS, I32LeU => I32LeU, I32GeS => I32GeS, I32GeU => I32GeU,
        I64Eqz => I64Eqz, I64Eq => I64Eq, I64Ne => I64Ne,
        I64LtS => I64LtS, I64LtU => I64LtU, I64GtS => I64GtS, I64GtU => I64GtU,
        I64LeS => I64LeS, I64LeU => I64LeU, I64GeS => I64GeS, I64GeU => I64GeU,
        F32Eq => F32Eq, F32Ne => F32Ne, F32Lt => F32Lt, F32Gt => F32Gt, F32Le => F32Le, F32Ge => F32Ge,
        F64Eq => F64Eq, F64Ne => F64Ne, F64Lt => F64Lt, F64Gt => F64Gt, F64Le => F64Le, F64Ge => F64Ge,

        I32Clz => I32Clz, I32Ctz => I32Ctz, I32Popcnt => I32Popcnt,
        I32Add => I32Add, I32Sub => I32Sub, I32Mul => I32Mul,
        I32DivS => I32DivS, I32DivU => I32DivU, I32RemS => I32RemS, I32RemU => I32RemU,
        I32And => I32And, I32Or => I32Or, I32Xor => I32Xor,
        I32Shl => I32Shl, I32ShrS => I32ShrS, I32ShrU => I32ShrU, I32Rotl => I32Rotl, I32Rotr => I32Rotr,

        I64Clz => I64Clz, I64Ctz => I64Ctz, I64Popcnt => I64Popcnt,
        I64Add => I64Add, I64Sub => I64Sub, I64Mul => I64Mul,
        I64DivS => I64DivS, I64DivU => I64DivU, I64RemS => I64RemS, I64RemU => I64RemU,
        I64And => I64And, I64Or => I64Or, I64Xor => I64Xor,
        I64Shl => I64Shl, I64ShrS => I64ShrS, I64ShrU => I64ShrU, I64Rotl => I64Rotl, I64Rotr => I64Rotr,

        F32Abs => F32Abs, F32Neg => F32Neg, F32Ceil => F32Ceil, F32Floor => F32Floor,
        F32Trunc => F32Trunc, F32Nearest => F32Nearest, F32Sqrt => F32Sqrt,
        F32Add => F32Add, F32Sub => F32Sub, F32Mul => F32Mul, F32Div => F32Div,
        F32Min => F32Min, F32Max => F32Max, F32Copysign => F32Copysign,

        F64Abs => F64Abs, F64Neg => F64Neg, F64Ceil => F64Ceil, F64Floor => F64Floor,
        F64Trunc => F64Trunc, F64Nearest => F64Nearest, F64Sqrt => F64Sqrt,
        F64Add => F64Add, F64Sub => F64Sub, F64Mul => F64Mul, F64Div => F64Div,
        F64Min => F64Min, F64Max => F64Max, F64Copysign => F64Copysign,

        I32WrapI64 => I32WrapI64,
        I32TruncF32S => I32TruncSF32, I32TruncF32U => I32TruncUF32,
        I32TruncF64S => I32TruncSF64, I32TruncF64U => I32TruncUF64,
        I64ExtendI32S => I64ExtendSI32, I64ExtendI32U => I64ExtendUI32,
        I64TruncF32S => I64TruncSF32, I64TruncF32U => I64TruncUF32,
        I64TruncF64S => I64TruncSF64, I64TruncF64U => I64TruncUF64,
        F32ConvertI32S => F32ConvertSI32, F32ConvertI32U => F32ConvertUI32,
        F32ConvertI64S => F32ConvertSI64, F32ConvertI64U => F32ConvertUI64,
        F32DemoteF64 => F32DemoteF64,
        F64ConvertI32S => F64ConvertSI32, F64ConvertI32U => F64ConvertUI32,
        F64ConvertI64S => F64ConvertSI64, F64ConvertI64U => F64ConvertUI64,
        F64PromoteF32 => F64PromoteF32,
        I32ReinterpretF32 => I32ReinterpretF32, I64ReinterpretF64 => I64ReinterpretF64,
        F32ReinterpretI32 => F32ReinterpretI32, F64ReinterpretI64 => F64ReinterpretI64,

        I32Extend8S => I32Extend8S, I32Extend16S => I32Extend16S,
        I64Extend8S => I64Extend8S, I64Extend16S => I64Extend16S, I64Extend32S => I64Extend32S,

        I32TruncSatF32S => I32TruncSatSF32, I32TruncSatF32U => I32TruncSatUF32,
        I32TruncSatF64S => I32TruncSatSF64, I32TruncSatF64U => I32TruncSatUF64,
        I64TruncSatF32S => I64TruncSatSF32, I64TruncSatF32U => I64TruncSatUF32,
        I64TruncSatF64S => I64TruncSatSF64, I64TruncSatF64U => I64TruncSatUF64,
    }
}

macro_rules! map_memory_operators {
    ($op:expr; $($name:ident),* $(,)?) => {
        match $op {
            $( Operator::$name { memarg } => Some((Opcode::$name, *memarg)), )*
            _ => None,
        }
    };
}

/// Stream opcode and memarg of a load or store.
pub(crate) fn memory_access(op: &Operator<'_>) -> Option<(Opcode, MemArg)> {
    map_memory_operators! { op;
        I32Load, I64Load, F32Load, F64Load,
        I32Load8S, I32Load8U, I32Load16S, I32Load16U,
        I64Load8S, I64Load8U, I64Load16S, I64Load16U, I64Load32S, I64Load32U,
        I32Store, I64Store, F32Store, F64Store,
        I32Store8, I32Store16, I64Store8, I64Store16, I64Store32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_opcode_maps_numeric_ops() {
        assert_eq!(simple_opcode(&Operator::I32Add), Some(Opcode::I32Add));
        assert_eq!(simple_opcode(&Operator::F64PromoteF32), Some(Opcode::F64PromoteF32));
        assert_eq!(
            simple_opcode(&Operator::I64TruncSatF64U),
            Some(Opcode::I64TruncSatUF64)
        );
        assert_eq!(simple_opcode(&Operator::Nop), None);
        assert_eq!(simple_opcode(&Operator::Drop), None);
    }

    #[test]
    fn test_simple_opcodes_are_numeric_classes() {
        let ops = [
            Operator::I32Eqz,
            Operator::I64Rotl,
            Operator::F32Copysign,
            Operator::I32WrapI64,
            Operator::I64Extend32S,
        ];
        for op in &ops {
            let class = simple_opcode(op).map(Opcode::class);
            assert!(matches!(
                class,
                Some(OpClass::Unary | OpClass::Binary | OpClass::Compare | OpClass::Convert)
            ));
        }
    }

    #[test]
    fn test_memory_access_carries_memarg() {
        let memarg = MemArg {
            align: 2,
            max_align: 2,
            offset: 16,
            memory: 0,
        };
        let op = Operator::I32Store { memarg };
        let (opcode, got) = memory_access(&op).unwrap();
        assert_eq!(opcode, Opcode::I32Store);
        assert_eq!(got.offset, 16);
        assert!(memory_access(&Operator::I32Add).is_none());
    }
}
