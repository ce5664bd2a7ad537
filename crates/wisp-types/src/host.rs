//! Host-side seams: native function callbacks and the import delegate.

use std::rc::Rc;

use thiserror::Error;

use crate::env::{Global, HostFunc, Import, Memory, Table};
use crate::{FuncSignature, TypedValue};

/// Failure reported by a host function callback. Surfaces as a trap.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("host function failed: {0}")]
pub struct HostError(pub String);

/// Rejection of an import by a [`HostImportDelegate`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HostImportError(pub String);

impl HostImportError {
    /// Standard "unknown host ... import" rejection.
    pub fn unknown(kind: &str, import: &Import) -> Self {
        Self(format!(
            "unknown host {kind} import \"{}.{}\"",
            import.module_name, import.field_name
        ))
    }
}

/// Native callback behind a host function.
///
/// `results` arrives pre-sized and zero-initialised with the declared result
/// types; the callback overwrites it in place.
pub type HostCallback = Rc<dyn Fn(&[TypedValue], &mut [TypedValue]) -> Result<(), HostError>>;

/// Embedder hook that synthesizes the entities a module imports from a host
/// module.
///
/// Each method receives the import record and an entity pre-built from the
/// import's declared type. Returning `Ok` accepts the (possibly modified)
/// entity; the compiler then checks it against the declaration.
pub trait HostImportDelegate {
    fn import_func(
        &self,
        import: &Import,
        func: &mut HostFunc,
        sig: &FuncSignature,
    ) -> Result<(), HostImportError>;

    fn import_table(&self, import: &Import, table: &mut Table) -> Result<(), HostImportError>;

    fn import_memory(&self, import: &Import, memory: &mut Memory) -> Result<(), HostImportError>;

    fn import_global(&self, import: &Import, global: &mut Global) -> Result<(), HostImportError>;
}
