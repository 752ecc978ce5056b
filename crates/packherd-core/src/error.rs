//! Error types for packherd-core

use serde::Serialize;
use thiserror::Error;

use crate::models::SyncConflict;

/// Result type alias using packherd-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in packherd-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing input, rejected synchronously
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation-in-progress or package-level conflicts
    #[error("Conflict: {code}")]
    Conflict {
        /// Stable machine-readable conflict code
        code: String,
        /// Package-level conflicts with suggested resolutions, when known
        conflicts: Vec<SyncConflict>,
    },

    /// Unknown pool/endpoint/snapshot/operation id
    #[error("Not found: {0}")]
    NotFound(String),

    /// Missing, expired, or mismatched token
    #[error("Auth error: {0}")]
    Auth(String),

    /// External executor failed to report completion in time
    #[error("Executor timeout for operation {0}")]
    ExecutorTimeout(String),

    /// libSQL error
    #[error("Storage error: {0}")]
    LibSql(#[from] libsql::Error),

    /// Snapshot/pool persistence failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Conflict error with no package detail (e.g. `operation_in_progress`)
    pub fn conflict(code: impl Into<String>) -> Self {
        Self::Conflict {
            code: code.into(),
            conflicts: Vec::new(),
        }
    }

    /// Conflict error carrying package-level conflicts
    pub fn conflict_with(code: impl Into<String>, conflicts: Vec<SyncConflict>) -> Self {
        Self::Conflict {
            code: code.into(),
            conflicts,
        }
    }

    /// Stable taxonomy code for the transport layer
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation_error",
            Self::Conflict { .. } => "conflict_error",
            Self::NotFound(_) => "not_found_error",
            Self::Auth(_) => "auth_error",
            Self::ExecutorTimeout(_) => "executor_timeout_error",
            Self::LibSql(_) | Self::Storage(_) | Self::Serialization(_) | Self::Io(_) => {
                "storage_error"
            }
        }
    }

    /// Convert into the structured envelope consumed by transport layers
    #[must_use]
    pub fn to_envelope(&self) -> ErrorEnvelope {
        let details = match self {
            Self::Conflict { conflicts, .. } if !conflicts.is_empty() => {
                serde_json::to_value(conflicts).ok()
            }
            _ => None,
        };
        ErrorEnvelope {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.to_string(),
                details,
                timestamp: crate::util::unix_timestamp_ms(),
            },
        }
    }
}

/// Structured error envelope: `{error: {code, message, details, timestamp}}`
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

/// Body of the structured error envelope
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    pub timestamp: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ConflictKind, SyncConflict};

    #[test]
    fn taxonomy_codes_are_stable() {
        assert_eq!(Error::Validation("x".into()).code(), "validation_error");
        assert_eq!(Error::conflict("operation_in_progress").code(), "conflict_error");
        assert_eq!(Error::NotFound("x".into()).code(), "not_found_error");
        assert_eq!(Error::Auth("x".into()).code(), "auth_error");
        assert_eq!(Error::ExecutorTimeout("x".into()).code(), "executor_timeout_error");
        assert_eq!(Error::Storage("x".into()).code(), "storage_error");
    }

    #[test]
    fn envelope_includes_conflict_details() {
        let conflict = SyncConflict {
            kind: ConflictKind::VersionMismatch,
            package: "glibc".to_string(),
            current: Some("2.38-1".to_string()),
            target: Some("2.39-1".to_string()),
            suggested_resolution: "align versions manually".to_string(),
        };
        let envelope = Error::conflict_with("version_conflicts", vec![conflict]).to_envelope();

        assert_eq!(envelope.error.code, "conflict_error");
        assert!(envelope.error.details.is_some());
        assert!(envelope.error.timestamp > 0);

        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["error"]["details"][0]["package"], "glibc");
    }

    #[test]
    fn envelope_omits_empty_details() {
        let json = serde_json::to_value(Error::NotFound("pool".into()).to_envelope()).unwrap();
        assert!(json["error"].get("details").is_none());
    }
}
