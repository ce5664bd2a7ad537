//! Codegen error types.

use thiserror::Error;
use wisp_types::{ErrorCode, ValidationError};

/// Errors that can occur while compiling a module into the stream.
#[derive(Debug, Error)]
pub enum CodegenError {
    /// The binary could not be decoded.
    #[error("malformed binary: {0}")]
    Decode(#[from] wasmparser::BinaryReaderError),

    /// The module decoded but failed a validation or linking check.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// An internal consistency check failed.
    #[error("internal codegen error: {0}")]
    Internal(String),
}

impl CodegenError {
    /// Error code of a decode or validation failure.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::Decode(_) => Some(ErrorCode::MALFORMED_BINARY),
            Self::Validation(e) => Some(e.code),
            Self::Internal(_) => None,
        }
    }

    /// Byte offset into the module binary, when known.
    pub fn offset(&self) -> Option<usize> {
        match self {
            Self::Decode(e) => Some(e.offset()),
            Self::Validation(e) => e.offset,
            Self::Internal(_) => None,
        }
    }

    /// Attach `offset` to a validation error that has none yet.
    pub(crate) fn at(self, offset: usize) -> Self {
        match self {
            Self::Validation(e) => Self::Validation(e.at(offset)),
            other => other,
        }
    }
}

/// Shorthand for a validation failure.
pub(crate) fn invalid(code: ErrorCode, message: impl Into<String>) -> CodegenError {
    CodegenError::Validation(ValidationError::new(code, message))
}

/// Codegen result type alias.
pub type CodegenResult<T> = Result<T, CodegenError>;
