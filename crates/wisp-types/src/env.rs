//! The environment registry and the entities it owns.
//!
//! An [`Environment`] owns every module, signature, function, memory, table
//! and global, plus the shared instruction stream. It only ever grows by
//! appending; [`Environment::mark`] and [`Environment::reset`] truncate it
//! back to an earlier state when a module fails to compile.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{ErrorCode, ValidationError};
use crate::host::{HostCallback, HostImportDelegate};
use crate::stream::disassemble;
use crate::{ExternalKind, FuncSignature, Limits, TypedValue, ValueType};

/// Bytes per linear-memory page.
pub const PAGE_SIZE: u64 = 65536;
/// Absolute page limit of a memory.
pub const MAX_PAGES: u64 = 65536;

// ══════════════════════════════════════════════════════════════════════════════
// Entities
// ══════════════════════════════════════════════════════════════════════════════

/// A linear memory.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    /// `initial` tracks the current page count and is updated on growth.
    pub page_limits: Limits,
    pub data: Vec<u8>,
}

impl Memory {
    /// A zero-filled memory of `limits.initial` pages.
    pub fn new(limits: Limits) -> Self {
        Self {
            page_limits: limits,
            data: vec![0; (limits.initial * PAGE_SIZE) as usize],
        }
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn page_count(&self) -> u64 {
        self.page_limits.initial
    }
}

/// A function table. `None` marks an uninitialized element.
#[derive(Debug, Clone, Default)]
pub struct Table {
    pub limits: Limits,
    pub func_indexes: Vec<Option<u32>>,
}

impl Table {
    pub fn new(limits: Limits) -> Self {
        Self {
            limits,
            func_indexes: vec![None; limits.initial as usize],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Global {
    pub typed_value: TypedValue,
    pub mutable: bool,
}

impl Global {
    pub fn new(typed_value: TypedValue, mutable: bool) -> Self {
        Self {
            typed_value,
            mutable,
        }
    }
}

/// A function whose body lives in the instruction stream.
#[derive(Debug, Clone, Default)]
pub struct DefinedFunc {
    pub sig_index: usize,
    /// Stream offset of the body; `None` until the body starts compiling.
    pub offset: Option<u32>,
    pub local_decl_count: u32,
    pub local_count: u32,
    pub param_and_local_types: Vec<ValueType>,
}

impl DefinedFunc {
    pub fn new(sig_index: usize) -> Self {
        Self {
            sig_index,
            ..Self::default()
        }
    }
}

/// A function implemented by the embedder.
#[derive(Clone)]
pub struct HostFunc {
    pub sig_index: usize,
    pub module_name: String,
    pub field_name: String,
    /// Installed by the embedder; a host func without one cannot be linked.
    pub callback: Option<HostCallback>,
}

impl HostFunc {
    pub fn new(module_name: impl Into<String>, field_name: impl Into<String>, sig_index: usize) -> Self {
        Self {
            sig_index,
            module_name: module_name.into(),
            field_name: field_name.into(),
            callback: None,
        }
    }
}

impl fmt::Debug for HostFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunc")
            .field("sig_index", &self.sig_index)
            .field("module_name", &self.module_name)
            .field("field_name", &self.field_name)
            .field("callback", &self.callback.as_ref().map(|_| "<native>"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum Func {
    Defined(DefinedFunc),
    Host(HostFunc),
}

impl Func {
    pub fn sig_index(&self) -> usize {
        match self {
            Self::Defined(f) => f.sig_index,
            Self::Host(f) => f.sig_index,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self, Self::Host(_))
    }

    pub fn as_defined(&self) -> Option<&DefinedFunc> {
        match self {
            Self::Defined(f) => Some(f),
            Self::Host(_) => None,
        }
    }

    pub fn as_defined_mut(&mut self) -> Option<&mut DefinedFunc> {
        match self {
            Self::Defined(f) => Some(f),
            Self::Host(_) => None,
        }
    }
}

/// The declared type of an import.
#[derive(Debug, Clone, PartialEq)]
pub enum ImportDesc {
    Func { sig_index: usize },
    Table { limits: Limits },
    Memory { limits: Limits },
    Global { ty: ValueType, mutable: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Import {
    pub module_name: String,
    pub field_name: String,
    pub desc: ImportDesc,
}

impl Import {
    pub fn kind(&self) -> ExternalKind {
        match self.desc {
            ImportDesc::Func { .. } => ExternalKind::Func,
            ImportDesc::Table { .. } => ExternalKind::Table,
            ImportDesc::Memory { .. } => ExternalKind::Memory,
            ImportDesc::Global { .. } => ExternalKind::Global,
        }
    }
}

/// An export; `index` is in environment index space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    pub name: String,
    pub kind: ExternalKind,
    pub index: usize,
}

// ══════════════════════════════════════════════════════════════════════════════
// Modules
// ══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct DefinedModule {
    pub imports: Vec<Import>,
    pub start_func_index: Option<usize>,
    /// `[istream_start, istream_end)` holds this module's code.
    pub istream_start: usize,
    pub istream_end: usize,
}

#[derive(Clone)]
pub struct HostModule {
    pub import_delegate: Rc<dyn HostImportDelegate>,
}

impl fmt::Debug for HostModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HostModule")
    }
}

#[derive(Debug, Clone)]
pub enum ModuleKind {
    Defined(DefinedModule),
    Host(HostModule),
}

#[derive(Debug, Clone)]
pub struct Module {
    pub name: String,
    pub exports: Vec<Export>,
    /// Export name → index into `exports`.
    pub export_bindings: HashMap<String, usize>,
    pub memory_index: Option<usize>,
    pub table_index: Option<usize>,
    pub kind: ModuleKind,
}

impl Module {
    pub fn new_defined(istream_start: usize) -> Self {
        Self::with_kind(
            String::new(),
            ModuleKind::Defined(DefinedModule {
                istream_start,
                istream_end: istream_start,
                ..DefinedModule::default()
            }),
        )
    }

    pub fn new_host(name: impl Into<String>, import_delegate: Rc<dyn HostImportDelegate>) -> Self {
        Self::with_kind(name.into(), ModuleKind::Host(HostModule { import_delegate }))
    }

    fn with_kind(name: String, kind: ModuleKind) -> Self {
        Self {
            name,
            exports: Vec::new(),
            export_bindings: HashMap::new(),
            memory_index: None,
            table_index: None,
            kind,
        }
    }

    pub fn is_host(&self) -> bool {
        matches!(self.kind, ModuleKind::Host(_))
    }

    pub fn as_defined(&self) -> Option<&DefinedModule> {
        match &self.kind {
            ModuleKind::Defined(m) => Some(m),
            ModuleKind::Host(_) => None,
        }
    }

    pub fn as_defined_mut(&mut self) -> Option<&mut DefinedModule> {
        match &mut self.kind {
            ModuleKind::Defined(m) => Some(m),
            ModuleKind::Host(_) => None,
        }
    }

    pub fn get_export(&self, name: &str) -> Option<&Export> {
        self.export_bindings.get(name).map(|&i| &self.exports[i])
    }

    /// Append an export, rejecting a name that is already bound.
    pub fn append_export(
        &mut self,
        kind: ExternalKind,
        index: usize,
        name: &str,
    ) -> Result<(), ValidationError> {
        if self.export_bindings.contains_key(name) {
            return Err(ValidationError::new(
                ErrorCode::DUPLICATE_EXPORT,
                format!("duplicate export \"{name}\""),
            ));
        }
        self.exports.push(Export {
            name: name.to_string(),
            kind,
            index,
        });
        self.export_bindings
            .insert(name.to_string(), self.exports.len() - 1);
        Ok(())
    }

    fn truncate_exports(&mut self, len: usize) {
        self.exports.truncate(len);
        self.export_bindings.retain(|_, index| *index < len);
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Environment
// ══════════════════════════════════════════════════════════════════════════════

/// A snapshot of the environment's sizes, taken by [`Environment::mark`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentMark {
    pub modules: usize,
    pub sigs: usize,
    pub funcs: usize,
    pub memories: usize,
    pub tables: usize,
    pub globals: usize,
    pub istream: usize,
    /// Export count of each module that existed at the mark.
    pub module_exports: Vec<usize>,
}

#[derive(Debug, Default)]
pub struct Environment {
    pub modules: Vec<Module>,
    pub sigs: Vec<FuncSignature>,
    pub funcs: Vec<Func>,
    pub memories: Vec<Memory>,
    pub tables: Vec<Table>,
    pub globals: Vec<Global>,
    /// The shared instruction stream.
    pub istream: Vec<u8>,
    /// Name → module index, for modules other modules may import from.
    pub registered_module_bindings: HashMap<String, usize>,
}

impl Environment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self) -> EnvironmentMark {
        EnvironmentMark {
            modules: self.modules.len(),
            sigs: self.sigs.len(),
            funcs: self.funcs.len(),
            memories: self.memories.len(),
            tables: self.tables.len(),
            globals: self.globals.len(),
            istream: self.istream.len(),
            module_exports: self.modules.iter().map(|m| m.exports.len()).collect(),
        }
    }

    /// Truncate everything appended since `mark` was taken.
    pub fn reset(&mut self, mark: &EnvironmentMark) {
        self.registered_module_bindings
            .retain(|_, index| *index < mark.modules);
        self.modules.truncate(mark.modules);
        for (module, &len) in self.modules.iter_mut().zip(&mark.module_exports) {
            module.truncate_exports(len);
        }
        self.sigs.truncate(mark.sigs);
        self.funcs.truncate(mark.funcs);
        self.memories.truncate(mark.memories);
        self.tables.truncate(mark.tables);
        self.globals.truncate(mark.globals);
        self.istream.truncate(mark.istream);
    }

    /// Append a host module and register it under `name`.
    pub fn append_host_module(
        &mut self,
        name: &str,
        import_delegate: Rc<dyn HostImportDelegate>,
    ) -> usize {
        self.modules.push(Module::new_host(name, import_delegate));
        let index = self.modules.len() - 1;
        self.registered_module_bindings
            .insert(name.to_string(), index);
        index
    }

    /// Make module `index` importable under `name`.
    pub fn register_module(&mut self, name: &str, index: usize) {
        if let Some(module) = self.modules.get_mut(index) {
            if module.name.is_empty() {
                module.name = name.to_string();
            }
        }
        self.registered_module_bindings
            .insert(name.to_string(), index);
    }

    pub fn find_registered_module(&self, name: &str) -> Option<usize> {
        self.registered_module_bindings.get(name).copied()
    }

    /// Add a native function to a host module and export it as `name`.
    pub fn append_host_func(
        &mut self,
        module_index: usize,
        name: &str,
        sig: FuncSignature,
        callback: HostCallback,
    ) -> Result<usize, ValidationError> {
        let module_name = self
            .modules
            .get(module_index)
            .filter(|m| m.is_host())
            .map(|m| m.name.clone())
            .ok_or_else(|| {
                ValidationError::new(
                    ErrorCode::UNKNOWN_IMPORT_MODULE,
                    format!("module {module_index} is not a host module"),
                )
            })?;
        self.sigs.push(sig);
        let mut func = HostFunc::new(module_name, name, self.sigs.len() - 1);
        func.callback = Some(callback);
        self.funcs.push(Func::Host(func));
        let func_index = self.funcs.len() - 1;
        self.modules[module_index].append_export(ExternalKind::Func, func_index, name)?;
        Ok(func_index)
    }

    pub fn get_export(&self, module_index: usize, name: &str) -> Option<&Export> {
        self.modules.get(module_index)?.get_export(name)
    }

    pub fn func_signature(&self, func_index: usize) -> &FuncSignature {
        &self.sigs[self.funcs[func_index].sig_index()]
    }

    /// Structural signature equality.
    pub fn func_signatures_equal(&self, a: usize, b: usize) -> bool {
        a == b || self.sigs[a] == self.sigs[b]
    }

    /// Disassemble the stream range owned by a defined module.
    pub fn disassemble_module(&self, module_index: usize) -> String {
        match self.modules.get(module_index).and_then(Module::as_defined) {
            Some(m) => disassemble(&self.istream, m.istream_start, m.istream_end),
            None => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{HostError, HostImportError};

    struct RejectAll;

    impl HostImportDelegate for RejectAll {
        fn import_func(&self, i: &Import, _: &mut HostFunc, _: &FuncSignature) -> Result<(), HostImportError> {
            Err(HostImportError::unknown("function", i))
        }
        fn import_table(&self, i: &Import, _: &mut Table) -> Result<(), HostImportError> {
            Err(HostImportError::unknown("table", i))
        }
        fn import_memory(&self, i: &Import, _: &mut Memory) -> Result<(), HostImportError> {
            Err(HostImportError::unknown("memory", i))
        }
        fn import_global(&self, i: &Import, _: &mut Global) -> Result<(), HostImportError> {
            Err(HostImportError::unknown("global", i))
        }
    }

    fn noop() -> HostCallback {
        Rc::new(|_: &[TypedValue], _: &mut [TypedValue]| Ok::<(), HostError>(()))
    }

    #[test]
    fn test_reset_truncates_to_mark() {
        let mut env = Environment::new();
        env.sigs.push(FuncSignature::default());
        env.istream.extend_from_slice(&[1, 2, 3]);
        let mark = env.mark();

        env.sigs.push(FuncSignature::default());
        env.memories.push(Memory::new(Limits::new(1, None)));
        env.tables.push(Table::new(Limits::new(2, None)));
        env.globals.push(Global::new(TypedValue::i32(1), false));
        env.istream.extend_from_slice(&[4, 5]);
        env.modules.push(Module::new_defined(3));
        env.register_module("late", 0);

        env.reset(&mark);
        assert_eq!(env.mark(), mark);
        assert!(env.find_registered_module("late").is_none());
    }

    #[test]
    fn test_reset_drops_exports_added_to_older_modules() {
        let mut env = Environment::new();
        let host = env.append_host_module("host", Rc::new(RejectAll));
        let mark = env.mark();

        let sig = FuncSignature::new(vec![ValueType::I32], vec![]);
        env.append_host_func(host, "print", sig, noop()).unwrap();
        assert!(env.get_export(host, "print").is_some());

        env.reset(&mark);
        assert!(env.get_export(host, "print").is_none());
        assert_eq!(env.find_registered_module("host"), Some(host));
        assert!(env.funcs.is_empty());
    }

    #[test]
    fn test_duplicate_host_export_is_rejected() {
        let mut env = Environment::new();
        let host = env.append_host_module("host", Rc::new(RejectAll));
        env.append_host_func(host, "f", FuncSignature::default(), noop())
            .unwrap();
        let err = env
            .append_host_func(host, "f", FuncSignature::default(), noop())
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::DUPLICATE_EXPORT);
    }

    #[test]
    fn test_signature_equality_is_structural() {
        let mut env = Environment::new();
        env.sigs.push(FuncSignature::new(vec![ValueType::I32], vec![ValueType::I64]));
        env.sigs.push(FuncSignature::new(vec![ValueType::I32], vec![ValueType::I64]));
        env.sigs.push(FuncSignature::new(vec![ValueType::I64], vec![ValueType::I64]));
        assert!(env.func_signatures_equal(0, 1));
        assert!(!env.func_signatures_equal(1, 2));
    }

    #[test]
    fn test_memory_and_table_allocation() {
        let memory = Memory::new(Limits::new(2, Some(3)));
        assert_eq!(memory.byte_size(), 2 * PAGE_SIZE as usize);
        assert_eq!(memory.page_count(), 2);

        let table = Table::new(Limits::new(4, None));
        assert_eq!(table.func_indexes, vec![None; 4]);
    }
}
