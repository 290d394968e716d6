//! Error types for engram operations.
//!
//! This module provides the error hierarchy for the consolidation pipeline
//! with structured error codes for programmatic handling.

use thiserror::Error;

/// Result type alias for engram operations.
pub type EngramResult<T> = Result<T, EngramError>;

/// Main error type for all engram operations.
#[derive(Error, Debug)]
pub enum EngramError {
    /// Transient I/O failure (network or store timeout). Retryable.
    #[error("Transient I/O error: {message}")]
    TransientIo {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A record is malformed or fails its integrity check. The record is
    /// quarantined; the batch continues.
    #[error("Data integrity error for record '{record_id}': {message}")]
    DataIntegrity {
        record_id: String,
        message: String,
        code: ErrorCode,
    },

    /// A computed value left its contracted range and could not be clamped.
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        message: String,
        code: ErrorCode,
        field: String,
        value: f64,
    },

    /// Another run of the same stage holds the run lock.
    #[error("Stage '{stage}' is already running")]
    ConcurrencyConflict { stage: String },

    /// Configuration is invalid. Fatal at startup, before any record is
    /// processed.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Database operation failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Enrichment collaborator failed.
    #[error("Enrichment error: {message}")]
    Enrichment {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Embedding collaborator failed.
    #[error("Embedding error: {message}")]
    Embedding {
        message: String,
        code: ErrorCode,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Record not found.
    #[error("Record not found: {record_id}")]
    NotFound { record_id: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error codes for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Transient I/O (IO_xxx)
    IoTimeout,
    IoConnectionFailed,
    IoRetriesExhausted,

    // Integrity (INT_xxx)
    IntMissingField,
    IntMalformedRecord,
    IntHashMismatch,

    // Invariant (INV_xxx)
    InvStrengthOutOfRange,
    InvRankOutOfRange,
    InvCapacityOutOfRange,

    // Database (DB_xxx)
    DbOperationFailed,
    DbTransactionFailed,
    DbPoolExhausted,

    // Enrichment (ENR_xxx)
    EnrUnavailable,
    EnrInvalidResponse,

    // Embedding (EMB_xxx)
    EmbUnavailable,
    EmbDimensionMismatch,

    // Internal
    Internal,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::IoTimeout => "IO_001",
            ErrorCode::IoConnectionFailed => "IO_002",
            ErrorCode::IoRetriesExhausted => "IO_003",
            ErrorCode::IntMissingField => "INT_001",
            ErrorCode::IntMalformedRecord => "INT_002",
            ErrorCode::IntHashMismatch => "INT_003",
            ErrorCode::InvStrengthOutOfRange => "INV_001",
            ErrorCode::InvRankOutOfRange => "INV_002",
            ErrorCode::InvCapacityOutOfRange => "INV_003",
            ErrorCode::DbOperationFailed => "DB_001",
            ErrorCode::DbTransactionFailed => "DB_002",
            ErrorCode::DbPoolExhausted => "DB_003",
            ErrorCode::EnrUnavailable => "ENR_001",
            ErrorCode::EnrInvalidResponse => "ENR_002",
            ErrorCode::EmbUnavailable => "EMB_001",
            ErrorCode::EmbDimensionMismatch => "EMB_002",
            ErrorCode::Internal => "GEN_001",
        }
    }
}

impl EngramError {
    /// Create a transient I/O error (timeout).
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::TransientIo {
            message: message.into(),
            code: ErrorCode::IoTimeout,
            source: None,
        }
    }

    /// Create a transient I/O error (connection).
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientIo {
            message: message.into(),
            code: ErrorCode::IoConnectionFailed,
            source: None,
        }
    }

    /// Create a data integrity error for a single record.
    pub fn integrity(record_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DataIntegrity {
            record_id: record_id.into(),
            message: message.into(),
            code: ErrorCode::IntMalformedRecord,
        }
    }

    /// Create a hash-mismatch integrity error.
    pub fn hash_mismatch(record_id: impl Into<String>) -> Self {
        let id = record_id.into();
        Self::DataIntegrity {
            record_id: id.clone(),
            message: format!("stored content hash does not match for '{}'", id),
            code: ErrorCode::IntHashMismatch,
        }
    }

    /// Create an invariant violation for an out-of-range strength value.
    pub fn invariant(field: impl Into<String>, value: f64) -> Self {
        let field = field.into();
        Self::InvariantViolation {
            message: format!("{} = {} is outside [0, 1]", field, value),
            code: ErrorCode::InvStrengthOutOfRange,
            field,
            value,
        }
    }

    /// Create a database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbOperationFailed,
            source: None,
        }
    }

    /// Create a pool-exhaustion database error.
    pub fn pool_exhausted(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            code: ErrorCode::DbPoolExhausted,
            source: None,
        }
    }

    /// Create an enrichment error.
    pub fn enrichment(message: impl Into<String>) -> Self {
        Self::Enrichment {
            message: message.into(),
            code: ErrorCode::EnrUnavailable,
            source: None,
        }
    }

    /// Create an embedding error.
    pub fn embedding(message: impl Into<String>) -> Self {
        Self::Embedding {
            message: message.into(),
            code: ErrorCode::EmbUnavailable,
            source: None,
        }
    }

    /// Get the error code.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::TransientIo { code, .. } => *code,
            Self::DataIntegrity { code, .. } => *code,
            Self::InvariantViolation { code, .. } => *code,
            Self::Database { code, .. } => *code,
            Self::Enrichment { code, .. } => *code,
            Self::Embedding { code, .. } => *code,
            _ => ErrorCode::Internal,
        }
    }

    /// Whether this error is transient and worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientIo { .. })
            || matches!(
                self,
                Self::Database {
                    code: ErrorCode::DbPoolExhausted,
                    ..
                }
            )
    }

    /// Whether this error quarantines a single record rather than failing
    /// the batch.
    pub fn is_record_scoped(&self) -> bool {
        matches!(self, Self::DataIntegrity { .. })
    }
}

impl From<rusqlite::Error> for EngramError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Database {
            message: err.to_string(),
            code: ErrorCode::DbOperationFailed,
            source: Some(Box::new(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_is_transient() {
        let err = EngramError::timeout("store did not respond");
        assert_eq!(err.code(), ErrorCode::IoTimeout);
        assert!(err.is_transient());
    }

    #[test]
    fn test_integrity_is_record_scoped() {
        let err = EngramError::integrity("item-7", "missing created_at");
        assert!(err.is_record_scoped());
        assert!(!err.is_transient());
        assert!(err.to_string().contains("item-7"));
    }

    #[test]
    fn test_invariant_message() {
        let err = EngramError::invariant("retrieval_strength", 1.7);
        assert_eq!(err.code(), ErrorCode::InvStrengthOutOfRange);
        assert!(err.to_string().contains("retrieval_strength"));
    }

    #[test]
    fn test_error_code_as_str() {
        assert_eq!(ErrorCode::IoTimeout.as_str(), "IO_001");
        assert_eq!(ErrorCode::DbPoolExhausted.as_str(), "DB_003");
    }

    #[test]
    fn test_concurrency_conflict_display() {
        let err = EngramError::ConcurrencyConflict {
            stage: "consolidation".to_string(),
        };
        assert!(err.to_string().contains("already running"));
    }
}
