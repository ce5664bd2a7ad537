//! Module compiler: decodes a binary module, validates it, and appends it to
//! an [`Environment`].
//!
//! Compilation runs in two passes over the binary:
//! 1. Every section except segment payloads: signatures, imports, functions,
//!    table, memory, globals, exports, start, and code. Function bodies are
//!    type-checked and lowered into the stream as they are decoded.
//! 2. Element and data segments only. Every segment is bounds-checked
//!    against the now final table and memory sizes before any is written.
//!
//! Any failure resets the environment to the mark taken before pass 1, so a
//! rejected module leaves no trace and never mutates a shared table or
//! memory.

use tracing::{debug, trace};
use wasmparser::{Encoding, FunctionBody, Parser, Payload, TableInit, ValType};
use wisp_checker::TypeChecker;
use wisp_types::{
    format_types, DefinedFunc, Environment, ErrorCode, ExternalKind, Func, FuncSignature, Global,
    Limits, Memory, Module, Table, TypedValue, ValueType, MAX_PAGES,
};

use crate::emitter::Label;
use crate::error::{invalid, CodegenResult};

// ══════════════════════════════════════════════════════════════════════════════
// Public API
// ══════════════════════════════════════════════════════════════════════════════

/// Compile the binary module `wasm` into `env`.
///
/// Returns the environment index of the new module. On failure the
/// environment is reset to its state before the call.
pub fn compile_module(env: &mut Environment, wasm: &[u8]) -> CodegenResult<usize> {
    let mark = env.mark();
    let result = ModuleCompiler::new(env).compile(wasm);
    match result {
        Ok(module_index) => {
            debug!(
                module = module_index,
                istream_len = env.istream.len(),
                "module compiled"
            );
            Ok(module_index)
        }
        Err(err) => {
            env.reset(&mark);
            debug!(error = %err, "module rejected; environment reset");
            Err(err)
        }
    }
}

/// Compile `wasm` and register it for import under `name`.
pub fn compile_and_register(
    env: &mut Environment,
    name: &str,
    wasm: &[u8],
) -> CodegenResult<usize> {
    let module_index = compile_module(env, wasm)?;
    env.register_module(name, module_index);
    Ok(module_index)
}

// ══════════════════════════════════════════════════════════════════════════════
// ModuleCompiler
// ══════════════════════════════════════════════════════════════════════════════

/// Per-module compile state.
pub(crate) struct ModuleCompiler<'a> {
    pub(crate) env: &'a mut Environment,
    pub(crate) module_index: usize,
    pub(crate) checker: TypeChecker,

    // ── Module → environment index spaces ────────────────────────────────
    pub(crate) sig_index_mapping: Vec<usize>,
    pub(crate) func_index_mapping: Vec<usize>,
    pub(crate) global_index_mapping: Vec<usize>,
    pub(crate) num_func_imports: usize,
    pub(crate) num_global_imports: usize,

    // ── Fixups ───────────────────────────────────────────────────────────
    /// Pending call sites, keyed by defined-function index.
    pub(crate) func_fixups: Vec<Vec<u32>>,
    /// Pending branch sites, keyed by label depth from the function label.
    pub(crate) depth_fixups: Vec<Vec<u32>>,
    pub(crate) labels: Vec<Label>,

    // ── Current function ─────────────────────────────────────────────────
    pub(crate) local_types: Vec<ValueType>,
    /// Defined-function index of the next code entry.
    pub(crate) next_body: usize,
}

impl<'a> ModuleCompiler<'a> {
    fn new(env: &'a mut Environment) -> Self {
        let module_index = env.modules.len();
        env.modules.push(Module::new_defined(env.istream.len()));
        Self {
            env,
            module_index,
            checker: TypeChecker::new(),
            sig_index_mapping: Vec::new(),
            func_index_mapping: Vec::new(),
            global_index_mapping: Vec::new(),
            num_func_imports: 0,
            num_global_imports: 0,
            func_fixups: Vec::new(),
            depth_fixups: Vec::new(),
            labels: Vec::new(),
            local_types: Vec::new(),
            next_body: 0,
        }
    }

    fn compile(mut self, wasm: &[u8]) -> CodegenResult<usize> {
        for payload in Parser::new(0).parse_all(wasm) {
            self.on_payload(payload?)?;
        }
        let istream_end = self.env.istream.len();
        check_istream_size(istream_end)?;
        self.apply_segments(wasm)?;

        if let Some(module) = self.module_mut().as_defined_mut() {
            module.istream_end = istream_end;
        }
        Ok(self.module_index)
    }

    pub(crate) fn module(&self) -> &Module {
        &self.env.modules[self.module_index]
    }

    pub(crate) fn module_mut(&mut self) -> &mut Module {
        &mut self.env.modules[self.module_index]
    }

    // ── Pass 1 ───────────────────────────────────────────────────────────

    fn on_payload(&mut self, payload: Payload<'_>) -> CodegenResult<()> {
        match payload {
            Payload::Version {
                encoding, range, ..
            } => {
                if encoding != Encoding::Module {
                    return Err(invalid(
                        ErrorCode::UNSUPPORTED_FEATURE,
                        "components are not supported",
                    )
                    .at(range.start));
                }
            }
            Payload::TypeSection(reader) => {
                let offset = reader.range().start;
                for ty in reader.into_iter_err_on_gc_types() {
                    let ty = ty?;
                    let params = value_types(ty.params()).map_err(|e| e.at(offset))?;
                    let results = value_types(ty.results()).map_err(|e| e.at(offset))?;
                    self.env.sigs.push(FuncSignature::new(params, results));
                    self.sig_index_mapping.push(self.env.sigs.len() - 1);
                }
            }
            Payload::ImportSection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, import) = item?;
                    self.on_import(&import).map_err(|e| e.at(offset))?;
                }
            }
            Payload::FunctionSection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, sig_index) = item?;
                    let sig_index = self.translate_sig(sig_index).map_err(|e| e.at(offset))?;
                    self.env.funcs.push(Func::Defined(DefinedFunc::new(sig_index)));
                    self.func_index_mapping.push(self.env.funcs.len() - 1);
                    self.func_fixups.push(Vec::new());
                }
            }
            Payload::TableSection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, table) = item?;
                    if !matches!(table.init, TableInit::RefNull) {
                        return Err(invalid(
                            ErrorCode::UNSUPPORTED_FEATURE,
                            "table initializer expressions are not supported",
                        )
                        .at(offset));
                    }
                    self.on_table(&table.ty).map_err(|e| e.at(offset))?;
                }
            }
            Payload::MemorySection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, memory) = item?;
                    self.on_memory(&memory).map_err(|e| e.at(offset))?;
                }
            }
            Payload::GlobalSection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, global) = item?;
                    self.on_global(&global).map_err(|e| e.at(offset))?;
                }
            }
            Payload::ExportSection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, export) = item?;
                    self.on_export(&export).map_err(|e| e.at(offset))?;
                }
            }
            Payload::StartSection { func, range } => {
                self.on_start(func).map_err(|e| e.at(range.start))?;
            }
            Payload::ElementSection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, elem) = item?;
                    self.read_elem_segment(elem).map_err(|e| e.at(offset))?;
                }
            }
            Payload::DataSection(reader) => {
                for item in reader.into_iter_with_offsets() {
                    let (offset, data) = item?;
                    self.read_data_segment(&data).map_err(|e| e.at(offset))?;
                }
            }
            Payload::CodeSectionStart { count, range, .. } => {
                let defined = self.func_index_mapping.len() - self.num_func_imports;
                if count as usize != defined {
                    return Err(invalid(
                        ErrorCode::FUNCTION_BODY_COUNT,
                        format!("function signature count ({defined}) != function body count ({count})"),
                    )
                    .at(range.start));
                }
            }
            Payload::CodeSectionEntry(body) => {
                let offset = body.range().start;
                self.compile_function(&body).map_err(|e| e.at(offset))?;
            }
            Payload::End(offset) => {
                let defined = self.func_index_mapping.len() - self.num_func_imports;
                if self.next_body != defined {
                    return Err(invalid(
                        ErrorCode::FUNCTION_BODY_COUNT,
                        format!(
                            "function signature count ({defined}) != function body count ({})",
                            self.next_body
                        ),
                    )
                    .at(offset));
                }
            }
            Payload::CustomSection(_) | Payload::DataCountSection { .. } => {}
            other => {
                let offset = other.as_section().map_or(0, |(_, range)| range.start);
                return Err(invalid(
                    ErrorCode::UNSUPPORTED_FEATURE,
                    "unsupported section",
                )
                .at(offset));
            }
        }
        Ok(())
    }

    fn compile_function(&mut self, body: &FunctionBody<'_>) -> CodegenResult<()> {
        trace!(
            module = self.module_index,
            body = self.next_body,
            offset = self.istream_offset(),
            "compiling function body"
        );
        self.compile_function_body(body)
    }

    // ── Index translation ────────────────────────────────────────────────

    pub(crate) fn translate_sig(&self, sig_index: u32) -> CodegenResult<usize> {
        self.sig_index_mapping
            .get(sig_index as usize)
            .copied()
            .ok_or_else(|| {
                invalid(
                    ErrorCode::INVALID_SIG_INDEX,
                    format!(
                        "invalid sig_index: {sig_index} (max {})",
                        self.sig_index_mapping.len()
                    ),
                )
            })
    }

    pub(crate) fn translate_func(&self, func_index: u32) -> CodegenResult<usize> {
        self.func_index_mapping
            .get(func_index as usize)
            .copied()
            .ok_or_else(|| {
                invalid(
                    ErrorCode::INVALID_FUNC_INDEX,
                    format!(
                        "invalid func_index: {func_index} (max {})",
                        self.func_index_mapping.len()
                    ),
                )
            })
    }

    pub(crate) fn translate_global(&self, global_index: u32) -> CodegenResult<usize> {
        self.global_index_mapping
            .get(global_index as usize)
            .copied()
            .ok_or_else(|| {
                invalid(
                    ErrorCode::INVALID_GLOBAL_INDEX,
                    format!(
                        "invalid global_index: {global_index} (max {})",
                        self.global_index_mapping.len()
                    ),
                )
            })
    }

    // ── Sections ─────────────────────────────────────────────────────────

    fn on_table(&mut self, ty: &wasmparser::TableType) -> CodegenResult<()> {
        let limits = table_limits(ty)?;
        if self.module().table_index.is_some() {
            return Err(invalid(ErrorCode::MULTIPLE_TABLES, "only one table allowed"));
        }
        self.env.tables.push(Table::new(limits));
        let index = self.env.tables.len() - 1;
        self.module_mut().table_index = Some(index);
        Ok(())
    }

    fn on_memory(&mut self, ty: &wasmparser::MemoryType) -> CodegenResult<()> {
        let limits = memory_limits(ty)?;
        if self.module().memory_index.is_some() {
            return Err(invalid(ErrorCode::MULTIPLE_MEMORIES, "only one memory allowed"));
        }
        self.env.memories.push(Memory::new(limits));
        let index = self.env.memories.len() - 1;
        self.module_mut().memory_index = Some(index);
        Ok(())
    }

    fn on_global(&mut self, global: &wasmparser::Global<'_>) -> CodegenResult<()> {
        let ty = value_type(global.ty.content_type)?;
        let value = self.eval_init_expr(&global.init_expr)?;
        if value.ty != ty {
            return Err(invalid(
                ErrorCode::TYPE_MISMATCH,
                format!("type mismatch in global, expected {ty} but got {}.", value.ty),
            ));
        }
        self.env.globals.push(Global::new(value, global.ty.mutable));
        self.global_index_mapping.push(self.env.globals.len() - 1);
        Ok(())
    }

    fn on_export(&mut self, export: &wasmparser::Export<'_>) -> CodegenResult<()> {
        let (kind, index) = match export.kind {
            wasmparser::ExternalKind::Func => {
                (ExternalKind::Func, self.translate_func(export.index)?)
            }
            wasmparser::ExternalKind::Table => {
                (ExternalKind::Table, self.require_table(export.index)?)
            }
            wasmparser::ExternalKind::Memory => {
                (ExternalKind::Memory, self.require_memory(export.index)?)
            }
            wasmparser::ExternalKind::Global => {
                let index = self.translate_global(export.index)?;
                if self.env.globals[index].mutable {
                    return Err(invalid(
                        ErrorCode::MUTABLE_GLOBAL_EXPORT,
                        "mutable globals cannot be exported",
                    ));
                }
                (ExternalKind::Global, index)
            }
            other => {
                return Err(invalid(
                    ErrorCode::UNSUPPORTED_FEATURE,
                    format!("unsupported export kind {other:?}"),
                ))
            }
        };
        self.module_mut().append_export(kind, index, export.name)?;
        Ok(())
    }

    fn on_start(&mut self, func_index: u32) -> CodegenResult<()> {
        let index = self.translate_func(func_index)?;
        let sig = self.env.func_signature(index);
        if !sig.param_types.is_empty() {
            return Err(invalid(
                ErrorCode::INVALID_START_FUNCTION,
                "start function must be nullary",
            ));
        }
        if !sig.result_types.is_empty() {
            return Err(invalid(
                ErrorCode::INVALID_START_FUNCTION,
                format!(
                    "start function must not return anything, got {}",
                    format_types(&sig.result_types)
                ),
            ));
        }
        if let Some(module) = self.module_mut().as_defined_mut() {
            module.start_func_index = Some(index);
        }
        Ok(())
    }

    /// Environment index of the module's table; `index` must be 0.
    pub(crate) fn require_table(&self, index: u32) -> CodegenResult<usize> {
        match self.module().table_index {
            Some(table) if index == 0 => Ok(table),
            _ => Err(invalid(
                ErrorCode::MISSING_TABLE,
                format!("invalid table index: {index}"),
            )),
        }
    }

    /// Environment index of the module's memory; `index` must be 0.
    pub(crate) fn require_memory(&self, index: u32) -> CodegenResult<usize> {
        match self.module().memory_index {
            Some(memory) if index == 0 => Ok(memory),
            _ => Err(invalid(
                ErrorCode::MISSING_MEMORY,
                format!("invalid memory index: {index}"),
            )),
        }
    }

    // ── Init expressions ─────────────────────────────────────────────────

    /// Evaluate a constant initializer: one `*.const` or a `global.get` of
    /// an imported immutable global.
    pub(crate) fn eval_init_expr(&self, expr: &wasmparser::ConstExpr<'_>) -> CodegenResult<TypedValue> {
        use wasmparser::Operator;

        let mut reader = expr.get_operators_reader();
        let value = match reader.read()? {
            Operator::I32Const { value } => TypedValue::i32(value),
            Operator::I64Const { value } => TypedValue::i64(value),
            Operator::F32Const { value } => TypedValue::f32_bits(value.bits()),
            Operator::F64Const { value } => TypedValue::f64_bits(value.bits()),
            Operator::GlobalGet { global_index } => {
                if global_index as usize >= self.num_global_imports {
                    return Err(invalid(
                        ErrorCode::INVALID_INIT_EXPR,
                        "initializer expression can only reference an imported global",
                    ));
                }
                let global = &self.env.globals[self.translate_global(global_index)?];
                if global.mutable {
                    return Err(invalid(
                        ErrorCode::INVALID_INIT_EXPR,
                        "initializer expression cannot reference a mutable global",
                    ));
                }
                global.typed_value
            }
            other => {
                return Err(invalid(
                    ErrorCode::INVALID_INIT_EXPR,
                    format!("invalid initializer expression: {other:?}"),
                ))
            }
        };
        match reader.read()? {
            Operator::End => Ok(value),
            _ => Err(invalid(
                ErrorCode::INVALID_INIT_EXPR,
                "initializer expression must be a single constant",
            )),
        }
    }
}

/// Stream offsets are 32-bit; a stream that outgrows them is rejected
/// before any segment is written.
fn check_istream_size(len: usize) -> CodegenResult<()> {
    if u32::try_from(len).is_err() {
        return Err(invalid(
            ErrorCode::LIMIT_EXCEEDED,
            "instruction stream exceeds 4 GiB",
        ));
    }
    Ok(())
}

// ══════════════════════════════════════════════════════════════════════════════
// Type conversions
// ══════════════════════════════════════════════════════════════════════════════

pub(crate) fn value_type(ty: ValType) -> CodegenResult<ValueType> {
    match ty {
        ValType::I32 => Ok(ValueType::I32),
        ValType::I64 => Ok(ValueType::I64),
        ValType::F32 => Ok(ValueType::F32),
        ValType::F64 => Ok(ValueType::F64),
        other => Err(invalid(
            ErrorCode::UNSUPPORTED_FEATURE,
            format!("unsupported value type {other:?}"),
        )),
    }
}

pub(crate) fn value_types(types: &[ValType]) -> CodegenResult<Vec<ValueType>> {
    types.iter().copied().map(value_type).collect()
}

fn check_limits(limits: Limits, absolute_max: u64, what: &str) -> CodegenResult<Limits> {
    if limits.initial > absolute_max {
        return Err(invalid(
            ErrorCode::INVALID_LIMITS,
            format!("initial {what} ({}) must be <= {absolute_max}", limits.initial),
        ));
    }
    if let Some(max) = limits.max {
        if max > absolute_max {
            return Err(invalid(
                ErrorCode::INVALID_LIMITS,
                format!("max {what} ({max}) must be <= {absolute_max}"),
            ));
        }
        if limits.initial > max {
            return Err(invalid(
                ErrorCode::INVALID_LIMITS,
                format!("max {what} ({max}) must be >= initial {what} ({})", limits.initial),
            ));
        }
    }
    Ok(limits)
}

pub(crate) fn table_limits(ty: &wasmparser::TableType) -> CodegenResult<Limits> {
    if ty.element_type != wasmparser::RefType::FUNCREF {
        return Err(invalid(
            ErrorCode::UNSUPPORTED_FEATURE,
            "tables must hold funcref",
        ));
    }
    if ty.table64 {
        return Err(invalid(ErrorCode::UNSUPPORTED_FEATURE, "table64 is not supported"));
    }
    let limits = Limits::new(u64::from(ty.initial), ty.maximum.map(u64::from));
    check_limits(limits, u64::from(u32::MAX), "table size")
}

pub(crate) fn memory_limits(ty: &wasmparser::MemoryType) -> CodegenResult<Limits> {
    if ty.memory64 {
        return Err(invalid(ErrorCode::UNSUPPORTED_FEATURE, "memory64 is not supported"));
    }
    if ty.shared {
        return Err(invalid(ErrorCode::UNSUPPORTED_FEATURE, "shared memory is not supported"));
    }
    check_limits(Limits::new(ty.initial, ty.maximum), MAX_PAGES, "pages")
}
