//! Import resolution.
//!
//! Imports resolve against registered modules. A registered defined module
//! (or a host module that already exports the field) must export an entity
//! of the right kind and type. Otherwise a host module's import delegate is
//! asked to synthesize the entity; a synthesized entity is added to the host
//! module's exports so later importers bind to the same one.

use std::rc::Rc;

use tracing::trace;
use wasmparser::TypeRef;
use wisp_types::{
    Export, ExternalKind, Func, Global, HostFunc, HostImportDelegate, HostImportError, Import,
    ImportDesc, Limits, Memory, ModuleKind, Table, TypedValue,
};
use wisp_types::ErrorCode;

use crate::compiler::{memory_limits, table_limits, value_type, ModuleCompiler};
use crate::error::{invalid, CodegenError, CodegenResult};

fn rejected(err: HostImportError) -> CodegenError {
    invalid(ErrorCode::HOST_IMPORT_REJECTED, err.0)
}

/// Check already-allocated `actual` limits against the `declared` limits of
/// an import.
pub(crate) fn check_import_limits(declared: &Limits, actual: &Limits) -> CodegenResult<()> {
    if actual.satisfies(declared) {
        return Ok(());
    }
    let message = match (declared.max, actual.max) {
        _ if actual.initial < declared.initial => format!(
            "actual size ({}) smaller than declared ({})",
            actual.initial, declared.initial
        ),
        (Some(declared_max), None) => {
            format!("max size (unspecified) larger than declared ({declared_max})")
        }
        (Some(declared_max), Some(actual_max)) => {
            format!("max size ({actual_max}) larger than declared ({declared_max})")
        }
        (None, _) => "limits mismatch".to_string(),
    };
    Err(invalid(ErrorCode::IMPORT_LIMITS_MISMATCH, message))
}

impl ModuleCompiler<'_> {
    pub(crate) fn on_import(&mut self, import: &wasmparser::Import<'_>) -> CodegenResult<()> {
        let desc = match import.ty {
            TypeRef::Func(sig_index) => ImportDesc::Func {
                sig_index: self.translate_sig(sig_index)?,
            },
            TypeRef::Table(ty) => ImportDesc::Table {
                limits: table_limits(&ty)?,
            },
            TypeRef::Memory(ty) => ImportDesc::Memory {
                limits: memory_limits(&ty)?,
            },
            TypeRef::Global(ty) => ImportDesc::Global {
                ty: value_type(ty.content_type)?,
                mutable: ty.mutable,
            },
            other => {
                return Err(invalid(
                    ErrorCode::UNSUPPORTED_FEATURE,
                    format!("unsupported import kind {other:?}"),
                ))
            }
        };
        let record = Import {
            module_name: import.module.to_string(),
            field_name: import.name.to_string(),
            desc,
        };

        let source = self
            .env
            .find_registered_module(&record.module_name)
            .ok_or_else(|| {
                invalid(
                    ErrorCode::UNKNOWN_IMPORT_MODULE,
                    format!("unknown import module \"{}\"", record.module_name),
                )
            })?;
        trace!(
            module = %record.module_name,
            field = %record.field_name,
            kind = %record.kind(),
            "resolving import"
        );

        let source_module = &self.env.modules[source];
        let delegate = match (&source_module.kind, source_module.get_export(&record.field_name)) {
            (ModuleKind::Host(host), None) => Some(Rc::clone(&host.import_delegate)),
            _ => None,
        };
        match delegate {
            Some(delegate) => self.import_from_host(source, delegate.as_ref(), &record)?,
            None => self.import_from_module(source, &record)?,
        }

        if let Some(module) = self.module_mut().as_defined_mut() {
            module.imports.push(record);
        }
        Ok(())
    }

    // ── Registered exports ───────────────────────────────────────────────

    fn import_from_module(&mut self, source: usize, import: &Import) -> CodegenResult<()> {
        let export: Export = self
            .env
            .get_export(source, &import.field_name)
            .cloned()
            .ok_or_else(|| {
                invalid(
                    ErrorCode::UNKNOWN_IMPORT_FIELD,
                    format!(
                        "unknown module field \"{}.{}\"",
                        import.module_name, import.field_name
                    ),
                )
            })?;
        if export.kind != import.kind() {
            return Err(invalid(
                ErrorCode::IMPORT_KIND_MISMATCH,
                format!(
                    "expected import \"{}.{}\" to have kind {}, not {}",
                    import.module_name,
                    import.field_name,
                    import.kind(),
                    export.kind
                ),
            ));
        }

        match &import.desc {
            ImportDesc::Func { sig_index } => {
                let actual = self.env.funcs[export.index].sig_index();
                if !self.env.func_signatures_equal(*sig_index, actual) {
                    return Err(invalid(
                        ErrorCode::IMPORT_SIGNATURE_MISMATCH,
                        format!(
                            "import signature mismatch: expected {}, got {}",
                            self.env.sigs[*sig_index], self.env.sigs[actual]
                        ),
                    ));
                }
                self.bind_func_import(export.index);
            }
            ImportDesc::Table { limits } => {
                check_import_limits(limits, &self.env.tables[export.index].limits)?;
                self.bind_table(export.index)?;
            }
            ImportDesc::Memory { limits } => {
                check_import_limits(limits, &self.env.memories[export.index].page_limits)?;
                self.bind_memory(export.index)?;
            }
            ImportDesc::Global { ty, mutable } => {
                check_global(import, &self.env.globals[export.index], *ty, *mutable)?;
                self.bind_global_import(export.index);
            }
        }
        Ok(())
    }

    // ── Host delegate ────────────────────────────────────────────────────

    fn import_from_host(
        &mut self,
        source: usize,
        delegate: &dyn HostImportDelegate,
        import: &Import,
    ) -> CodegenResult<()> {
        let (kind, index) = match &import.desc {
            ImportDesc::Func { sig_index } => {
                let sig = self.env.sigs[*sig_index].clone();
                let mut func =
                    HostFunc::new(&import.module_name, &import.field_name, *sig_index);
                delegate
                    .import_func(import, &mut func, &sig)
                    .map_err(rejected)?;
                if func.callback.is_none() {
                    return Err(invalid(
                        ErrorCode::HOST_IMPORT_REJECTED,
                        format!(
                            "host function \"{}.{}\" has no callback",
                            import.module_name, import.field_name
                        ),
                    ));
                }
                if func.sig_index >= self.env.sigs.len()
                    || !self.env.func_signatures_equal(*sig_index, func.sig_index)
                {
                    return Err(invalid(
                        ErrorCode::IMPORT_SIGNATURE_MISMATCH,
                        format!(
                            "host function \"{}.{}\" changed its signature",
                            import.module_name, import.field_name
                        ),
                    ));
                }
                self.env.funcs.push(Func::Host(func));
                let index = self.env.funcs.len() - 1;
                self.bind_func_import(index);
                (ExternalKind::Func, index)
            }
            ImportDesc::Table { limits } => {
                let mut table = Table::new(*limits);
                delegate.import_table(import, &mut table).map_err(rejected)?;
                check_import_limits(limits, &table.limits)?;
                self.env.tables.push(table);
                let index = self.env.tables.len() - 1;
                self.bind_table(index)?;
                (ExternalKind::Table, index)
            }
            ImportDesc::Memory { limits } => {
                let mut memory = Memory::new(*limits);
                delegate
                    .import_memory(import, &mut memory)
                    .map_err(rejected)?;
                check_import_limits(limits, &memory.page_limits)?;
                self.env.memories.push(memory);
                let index = self.env.memories.len() - 1;
                self.bind_memory(index)?;
                (ExternalKind::Memory, index)
            }
            ImportDesc::Global { ty, mutable } => {
                let mut global = Global::new(TypedValue::zero(*ty), *mutable);
                delegate
                    .import_global(import, &mut global)
                    .map_err(rejected)?;
                check_global(import, &global, *ty, *mutable)?;
                self.env.globals.push(global);
                let index = self.env.globals.len() - 1;
                self.bind_global_import(index);
                (ExternalKind::Global, index)
            }
        };

        let host = &mut self.env.modules[source];
        if host.get_export(&import.field_name).is_none() {
            host.append_export(kind, index, &import.field_name)?;
        }
        Ok(())
    }

    // ── Binding ──────────────────────────────────────────────────────────

    fn bind_func_import(&mut self, func_index: usize) {
        self.func_index_mapping.push(func_index);
        self.num_func_imports += 1;
    }

    fn bind_global_import(&mut self, global_index: usize) {
        self.global_index_mapping.push(global_index);
        self.num_global_imports += 1;
    }

    fn bind_table(&mut self, table_index: usize) -> CodegenResult<()> {
        if self.module().table_index.is_some() {
            return Err(invalid(ErrorCode::MULTIPLE_TABLES, "only one table allowed"));
        }
        self.module_mut().table_index = Some(table_index);
        Ok(())
    }

    fn bind_memory(&mut self, memory_index: usize) -> CodegenResult<()> {
        if self.module().memory_index.is_some() {
            return Err(invalid(ErrorCode::MULTIPLE_MEMORIES, "only one memory allowed"));
        }
        self.module_mut().memory_index = Some(memory_index);
        Ok(())
    }
}

fn check_global(
    import: &Import,
    global: &Global,
    ty: wisp_types::ValueType,
    mutable: bool,
) -> CodegenResult<()> {
    if global.typed_value.ty != ty || global.mutable != mutable {
        return Err(invalid(
            ErrorCode::IMPORT_GLOBAL_MISMATCH,
            format!(
                "global import \"{}.{}\" expected {}{ty}, got {}{}",
                import.module_name,
                import.field_name,
                if mutable { "mut " } else { "" },
                if global.mutable { "mut " } else { "" },
                global.typed_value.ty,
            ),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_import_limits_accept_tighter_actual() {
        let declared = Limits::new(1, Some(4));
        let actual = Limits::new(2, Some(3));
        assert!(check_import_limits(&declared, &actual).is_ok());
    }

    #[test]
    fn test_import_limits_reject_small_initial() {
        let err = check_import_limits(&Limits::new(2, None), &Limits::new(1, None)).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::IMPORT_LIMITS_MISMATCH));
        assert!(err.to_string().contains("actual size (1) smaller than declared (2)"));
    }

    #[test]
    fn test_import_limits_reject_unbounded_actual() {
        let err =
            check_import_limits(&Limits::new(1, Some(2)), &Limits::new(1, None)).unwrap_err();
        assert!(err
            .to_string()
            .contains("max size (unspecified) larger than declared (2)"));
    }

    #[test]
    fn test_import_limits_reject_larger_max() {
        let err =
            check_import_limits(&Limits::new(1, Some(2)), &Limits::new(1, Some(3))).unwrap_err();
        assert!(err.to_string().contains("max size (3) larger than declared (2)"));
    }

    #[test]
    fn test_import_limits_agree_with_satisfies() {
        let limits = [
            Limits::new(0, None),
            Limits::new(1, None),
            Limits::new(1, Some(1)),
            Limits::new(1, Some(3)),
            Limits::new(2, Some(2)),
        ];
        for declared in &limits {
            for actual in &limits {
                assert_eq!(
                    check_import_limits(declared, actual).is_ok(),
                    actual.satisfies(declared),
                    "declared {declared:?}, actual {actual:?}"
                );
            }
        }
    }
}
