use serde::{Deserialize, Serialize};
use std::fmt;

/// Error category, determined by error code range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    Decode,
    Type,
    Index,
    Link,
    Structure,
    Limit,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Decode => write!(f, "decode"),
            Self::Type => write!(f, "type"),
            Self::Index => write!(f, "index"),
            Self::Link => write!(f, "link"),
            Self::Structure => write!(f, "structure"),
            Self::Limit => write!(f, "limit"),
        }
    }
}

/// Numeric validation error code (E100–E699).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ErrorCode(pub u16);

impl ErrorCode {
    // ── Decode errors (E100–E199) ──
    pub const MALFORMED_BINARY: Self = Self(100);
    pub const UNSUPPORTED_FEATURE: Self = Self(101);

    // ── Type errors (E200–E299) ──
    pub const TYPE_MISMATCH: Self = Self(200);
    pub const INCONSISTENT_BR_TABLE: Self = Self(201);
    pub const IF_WITHOUT_ELSE_SIGNATURE: Self = Self(202);
    pub const LABEL_KIND_MISMATCH: Self = Self(203);

    // ── Index errors (E300–E399) ──
    pub const INVALID_FUNC_INDEX: Self = Self(300);
    pub const INVALID_SIG_INDEX: Self = Self(301);
    pub const INVALID_GLOBAL_INDEX: Self = Self(302);
    pub const INVALID_LOCAL_INDEX: Self = Self(303);
    pub const INVALID_DEPTH: Self = Self(304);
    pub const MISSING_TABLE: Self = Self(305);
    pub const MISSING_MEMORY: Self = Self(306);

    // ── Link errors (E400–E499) ──
    pub const UNKNOWN_IMPORT_MODULE: Self = Self(400);
    pub const UNKNOWN_IMPORT_FIELD: Self = Self(401);
    pub const IMPORT_KIND_MISMATCH: Self = Self(402);
    pub const IMPORT_SIGNATURE_MISMATCH: Self = Self(403);
    pub const IMPORT_LIMITS_MISMATCH: Self = Self(404);
    pub const HOST_IMPORT_REJECTED: Self = Self(405);
    pub const IMPORT_GLOBAL_MISMATCH: Self = Self(406);

    // ── Structure errors (E500–E599) ──
    pub const DUPLICATE_EXPORT: Self = Self(500);
    pub const MULTIPLE_TABLES: Self = Self(501);
    pub const MULTIPLE_MEMORIES: Self = Self(502);
    pub const INVALID_INIT_EXPR: Self = Self(503);
    pub const INVALID_START_FUNCTION: Self = Self(504);
    pub const SEGMENT_OUT_OF_BOUNDS: Self = Self(505);
    pub const MUTABLE_GLOBAL_EXPORT: Self = Self(506);
    pub const IMMUTABLE_GLOBAL_SET: Self = Self(507);
    pub const INVALID_ALIGNMENT: Self = Self(508);
    pub const FUNCTION_BODY_COUNT: Self = Self(509);

    // ── Limit errors (E600–E699) ──
    pub const LIMIT_EXCEEDED: Self = Self(600);
    pub const INVALID_LIMITS: Self = Self(601);

    /// Get the category for this error code.
    pub fn category(self) -> ErrorCategory {
        match self.0 {
            100..=199 => ErrorCategory::Decode,
            200..=299 => ErrorCategory::Type,
            300..=399 => ErrorCategory::Index,
            400..=499 => ErrorCategory::Link,
            500..=599 => ErrorCategory::Structure,
            600..=699 => ErrorCategory::Limit,
            _ => ErrorCategory::Decode, // fallback
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "E{}", self.0)
    }
}

/// A structured validation error raised while checking or compiling a module.
///
/// Every failed check produces exactly one of these; compilation of the
/// current module stops at the first one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// Error code (e.g., E200).
    pub code: ErrorCode,
    /// Error category (derived from code).
    pub category: ErrorCategory,
    /// Human-readable error message.
    pub message: String,
    /// Byte offset into the module binary of the offending event, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<usize>,
}

impl ValidationError {
    /// Create a new error with no offset.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            category: code.category(),
            message: message.into(),
            offset: None,
        }
    }

    /// Attach a byte offset unless one is already set.
    pub fn at(mut self, offset: usize) -> Self {
        if self.offset.is_none() {
            self.offset = Some(offset);
        }
        self
    }

    /// Render as a single-line JSON object.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| format!("{{\"message\":{:?}}}", self.message))
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.offset {
            Some(offset) => write!(
                f,
                "{:08x}: {} [{}] {}",
                offset, self.code, self.category, self.message
            ),
            None => write!(f, "{} [{}] {}", self.code, self.category, self.message),
        }
    }
}

impl std::error::Error for ValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_category() {
        assert_eq!(ErrorCode::MALFORMED_BINARY.category(), ErrorCategory::Decode);
        assert_eq!(ErrorCode::TYPE_MISMATCH.category(), ErrorCategory::Type);
        assert_eq!(ErrorCode::INVALID_DEPTH.category(), ErrorCategory::Index);
        assert_eq!(
            ErrorCode::IMPORT_SIGNATURE_MISMATCH.category(),
            ErrorCategory::Link
        );
        assert_eq!(ErrorCode::DUPLICATE_EXPORT.category(), ErrorCategory::Structure);
        assert_eq!(ErrorCode::LIMIT_EXCEEDED.category(), ErrorCategory::Limit);
    }

    #[test]
    fn test_error_code_display() {
        assert_eq!(format!("{}", ErrorCode::TYPE_MISMATCH), "E200");
        assert_eq!(format!("{}", ErrorCode::UNKNOWN_IMPORT_MODULE), "E400");
    }

    #[test]
    fn test_offset_is_set_once() {
        let err = ValidationError::new(ErrorCode::TYPE_MISMATCH, "type mismatch")
            .at(0x2a)
            .at(0x99);
        assert_eq!(err.offset, Some(0x2a));
        assert_eq!(err.to_string(), "0000002a: E200 [type] type mismatch");
    }

    #[test]
    fn test_validation_error_json_serialization() {
        let err = ValidationError::new(
            ErrorCode::DUPLICATE_EXPORT,
            "duplicate export \"main\"",
        );
        let json = err.to_json();
        assert!(json.contains("\"code\":500"));
        assert!(json.contains("\"category\":\"structure\""));
        assert!(!json.contains("\"offset\""), "absent offset is skipped");

        let back: ValidationError = serde_json::from_str(&json).unwrap();
        assert_eq!(back, err);
    }

    #[test]
    fn test_error_determinism_100_iterations() {
        let first = ValidationError::new(ErrorCode::TYPE_MISMATCH, "type mismatch").at(12);
        let first_json = first.to_json();

        for i in 0..100 {
            let err = ValidationError::new(ErrorCode::TYPE_MISMATCH, "type mismatch").at(12);
            assert_eq!(first_json, err.to_json(), "Determinism failure at iteration {i}");
        }
    }
}
