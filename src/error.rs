//! Error types for Neotoma.
//!
//! All errors are strongly typed using thiserror. Every error maps onto a
//! fixed wire vocabulary ([`ErrorCode`]) with an HTTP status and a retry
//! flag, and renders to agents as an [`ErrorEnvelope`].

use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::ids::{EntityId, SourceId, TraceId};
use crate::storage::StorageError;

/// Validation errors that occur during input validation.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField { field: String },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong { field: String, max_length: usize },

    #[error("Invalid {kind} id: '{value}'")]
    InvalidId { kind: &'static str, value: String },

    #[error("Invalid entity type '{value}': expected lowercase snake_case")]
    InvalidEntityType { value: String },

    #[error("Invalid relationship type '{value}': expected UPPER_SNAKE_CASE")]
    InvalidRelationshipType { value: String },

    #[error("Identifier for entity type '{entity_type}' normalizes to an empty string")]
    EmptyIdentifier { entity_type: String },

    #[error("Record of type '{entity_type}' has no identifier (expected one of: {})", .candidates.join(", "))]
    MissingIdentifier {
        entity_type: String,
        candidates: Vec<String>,
    },

    #[error("Payload must contain at least one record")]
    EmptyPayload,

    #[error("Source priority {value} is out of range [0, {max}]")]
    PriorityOutOfRange { value: i32, max: i32 },

    #[error("Relationship cannot point from an entity to itself: {entity_id}")]
    SelfRelationship { entity_id: EntityId },

    #[error("Cannot merge an entity into itself: {entity_id}")]
    SelfMerge { entity_id: EntityId },

    #[error("Cannot merge entities of different types: {from} into {to}")]
    EntityTypeMismatch { from: String, to: String },

    #[error("Invalid request: {message}")]
    InvalidRequest { message: String },
}

/// Execution errors that occur during operation execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Entity not found: {id}")]
    EntityNotFound { id: EntityId },

    #[error("Source not found: {id}")]
    SourceNotFound { id: SourceId },

    #[error("Field '{field}' not found on entity {entity_id}")]
    FieldNotFound { entity_id: EntityId, field: String },

    #[error("Entity {id} was already merged into {merged_into}")]
    EntityAlreadyMerged { id: EntityId, merged_into: EntityId },

    #[error("Relationship {relationship_type} would close a cycle: {}", .path.join(" -> "))]
    CycleDetected {
        relationship_type: String,
        path: Vec<String>,
    },

    #[error("Interpretation of source {source_id} failed: {reason}")]
    InterpretationFailed { source_id: SourceId, reason: String },

    #[error("Unknown action: {name}")]
    UnknownAction { name: String },

    #[error("Search index did not catch up within {duration_ms}ms")]
    IndexTimeout { duration_ms: u64 },

    #[error("Storage write failed: {0}")]
    StorageWrite(StorageError),

    #[error("Storage read failed: {0}")]
    StorageRead(StorageError),
}

/// Top-level error type for Neotoma.
#[derive(Debug, Error)]
pub enum NeotomaError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// The fixed error vocabulary exposed to agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Malformed or out-of-range input.
    ValidationError,
    /// Entity type is not registered.
    InvalidEntityType,
    /// No action with that name.
    UnknownAction,
    /// No entity with that ID.
    EntityNotFound,
    /// No source with that ID.
    SourceNotFound,
    /// The snapshot has no such field.
    FieldNotFound,
    /// The entity was merged into another.
    EntityAlreadyMerged,
    /// The write would close a cycle in an acyclic type.
    CycleDetected,
    /// Source content could not be turned into records.
    InterpretationFailed,
    /// A store rejected a write.
    DbInsertFailed,
    /// A store read failed.
    DbQueryFailed,
    /// Unexpected failure.
    InternalError,
    /// The search index did not catch up in time.
    IndexTimeout,
    /// The storage backend cannot serve requests.
    StorageUnavailable,
}

impl ErrorCode {
    /// The full catalog, in documentation order.
    pub const ALL: [Self; 14] = [
        Self::ValidationError,
        Self::InvalidEntityType,
        Self::UnknownAction,
        Self::EntityNotFound,
        Self::SourceNotFound,
        Self::FieldNotFound,
        Self::EntityAlreadyMerged,
        Self::CycleDetected,
        Self::InterpretationFailed,
        Self::DbInsertFailed,
        Self::DbQueryFailed,
        Self::InternalError,
        Self::IndexTimeout,
        Self::StorageUnavailable,
    ];

    /// Wire name of the code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationError => "VALIDATION_ERROR",
            Self::InvalidEntityType => "INVALID_ENTITY_TYPE",
            Self::UnknownAction => "UNKNOWN_ACTION",
            Self::EntityNotFound => "ENTITY_NOT_FOUND",
            Self::SourceNotFound => "SOURCE_NOT_FOUND",
            Self::FieldNotFound => "FIELD_NOT_FOUND",
            Self::EntityAlreadyMerged => "ENTITY_ALREADY_MERGED",
            Self::CycleDetected => "CYCLE_DETECTED",
            Self::InterpretationFailed => "INTERPRETATION_FAILED",
            Self::DbInsertFailed => "DB_INSERT_FAILED",
            Self::DbQueryFailed => "DB_QUERY_FAILED",
            Self::InternalError => "INTERNAL_ERROR",
            Self::IndexTimeout => "INDEX_TIMEOUT",
            Self::StorageUnavailable => "STORAGE_UNAVAILABLE",
        }
    }

    /// HTTP status an HTTP gateway should use for this code.
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::ValidationError | Self::InvalidEntityType => 400,
            Self::UnknownAction
            | Self::EntityNotFound
            | Self::SourceNotFound
            | Self::FieldNotFound => 404,
            Self::EntityAlreadyMerged | Self::CycleDetected => 409,
            Self::InterpretationFailed => 422,
            Self::DbInsertFailed | Self::DbQueryFailed | Self::InternalError => 500,
            Self::IndexTimeout | Self::StorageUnavailable => 503,
        }
    }

    /// Returns true if a client may retry the same request unchanged.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::DbInsertFailed
                | Self::DbQueryFailed
                | Self::IndexTimeout
                | Self::StorageUnavailable
        )
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl NeotomaError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Maps this error onto the wire vocabulary.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(ValidationError::InvalidEntityType { .. }) => {
                ErrorCode::InvalidEntityType
            }
            Self::Validation(_) => ErrorCode::ValidationError,
            Self::Execution(e) => match e {
                ExecutionError::EntityNotFound { .. } => ErrorCode::EntityNotFound,
                ExecutionError::SourceNotFound { .. } => ErrorCode::SourceNotFound,
                ExecutionError::FieldNotFound { .. } => ErrorCode::FieldNotFound,
                ExecutionError::EntityAlreadyMerged { .. } => ErrorCode::EntityAlreadyMerged,
                ExecutionError::CycleDetected { .. } => ErrorCode::CycleDetected,
                ExecutionError::InterpretationFailed { .. } => ErrorCode::InterpretationFailed,
                ExecutionError::UnknownAction { .. } => ErrorCode::UnknownAction,
                ExecutionError::IndexTimeout { .. } => ErrorCode::IndexTimeout,
                ExecutionError::StorageWrite(s) | ExecutionError::StorageRead(s)
                    if s.is_unavailable() =>
                {
                    ErrorCode::StorageUnavailable
                }
                ExecutionError::StorageWrite(_) => ErrorCode::DbInsertFailed,
                ExecutionError::StorageRead(_) => ErrorCode::DbQueryFailed,
            },
            Self::Internal { .. } => ErrorCode::InternalError,
        }
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.code().is_retryable()
    }

    /// Structured details for the error envelope.
    #[must_use]
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::Validation(v) => match v {
                ValidationError::MissingField { field }
                | ValidationError::FieldTooLong { field, .. } => json!({ "field": field }),
                ValidationError::InvalidId { kind, value } => {
                    json!({ "kind": kind, "value": value })
                }
                ValidationError::InvalidEntityType { value }
                | ValidationError::InvalidRelationshipType { value } => json!({ "value": value }),
                ValidationError::MissingIdentifier {
                    entity_type,
                    candidates,
                } => json!({ "entity_type": entity_type, "identifier_fields": candidates }),
                ValidationError::EmptyIdentifier { entity_type } => {
                    json!({ "entity_type": entity_type })
                }
                ValidationError::SelfRelationship { entity_id }
                | ValidationError::SelfMerge { entity_id } => json!({ "entity_id": entity_id }),
                ValidationError::InvalidRequest { message } => json!({ "reason": message }),
                _ => serde_json::Value::Null,
            },
            Self::Execution(e) => match e {
                ExecutionError::EntityNotFound { id } => json!({ "entity_id": id }),
                ExecutionError::SourceNotFound { id } => json!({ "source_id": id }),
                ExecutionError::FieldNotFound { entity_id, field } => {
                    json!({ "entity_id": entity_id, "field": field })
                }
                ExecutionError::EntityAlreadyMerged { id, merged_into } => {
                    json!({ "entity_id": id, "merged_into": merged_into })
                }
                ExecutionError::CycleDetected {
                    relationship_type,
                    path,
                } => json!({ "relationship_type": relationship_type, "path": path }),
                ExecutionError::InterpretationFailed { source_id, .. } => {
                    json!({ "source_id": source_id })
                }
                ExecutionError::UnknownAction { name } => json!({ "action": name }),
                ExecutionError::IndexTimeout { duration_ms } => {
                    json!({ "timeout_ms": duration_ms })
                }
                ExecutionError::StorageWrite(_) | ExecutionError::StorageRead(_) => {
                    serde_json::Value::Null
                }
            },
            Self::Internal { .. } => serde_json::Value::Null,
        }
    }
}

/// Result type alias for Neotoma operations.
pub type NeotomaResult<T> = Result<T, NeotomaError>;

/// Body of an error envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
    /// Structured context; omitted when `null`.
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub details: serde_json::Value,
    /// Fresh per failure, also logged.
    pub trace_id: TraceId,
}

/// `{ "error": { code, message, details, trace_id } }`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    /// The error.
    pub error: ErrorBody,
}

impl ErrorEnvelope {
    /// Wraps an error for the wire.
    #[must_use]
    pub fn from_error(err: &NeotomaError, trace_id: TraceId) -> Self {
        Self {
            error: ErrorBody {
                code: err.code(),
                message: err.to_string(),
                details: err.details(),
                trace_id,
            },
        }
    }

    /// HTTP status for this envelope.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        self.error.code.http_status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_message() {
        let err = ValidationError::MissingIdentifier {
            entity_type: "invoice".to_string(),
            candidates: vec!["invoice_number".to_string()],
        };
        let msg = format!("{err}");
        assert!(msg.contains("invoice"));
        assert!(msg.contains("invoice_number"));
    }

    #[test]
    fn test_code_mapping() {
        let err: NeotomaError = ValidationError::EmptyPayload.into();
        assert_eq!(err.code(), ErrorCode::ValidationError);
        assert!(err.is_validation());

        let err: NeotomaError = ValidationError::InvalidEntityType {
            value: "Bad Type".to_string(),
        }
        .into();
        assert_eq!(err.code(), ErrorCode::InvalidEntityType);

        let id = EntityId::for_key("person", "ada");
        let err: NeotomaError = ExecutionError::EntityNotFound { id }.into();
        assert_eq!(err.code(), ErrorCode::EntityNotFound);
        assert!(err.is_execution());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_storage_errors_map_by_direction() {
        let err: NeotomaError =
            ExecutionError::StorageWrite(StorageError::Backend("disk full".to_string())).into();
        assert_eq!(err.code(), ErrorCode::DbInsertFailed);
        assert!(err.is_retryable());

        let err: NeotomaError =
            ExecutionError::StorageRead(StorageError::Backend("bad read".to_string())).into();
        assert_eq!(err.code(), ErrorCode::DbQueryFailed);

        let err: NeotomaError =
            ExecutionError::StorageRead(StorageError::Unavailable("poisoned lock".to_string()))
                .into();
        assert_eq!(err.code(), ErrorCode::StorageUnavailable);
        assert_eq!(err.code().http_status(), 503);
    }

    #[test]
    fn test_catalog_statuses() {
        assert_eq!(ErrorCode::ValidationError.http_status(), 400);
        assert_eq!(ErrorCode::EntityNotFound.http_status(), 404);
        assert_eq!(ErrorCode::CycleDetected.http_status(), 409);
        assert_eq!(ErrorCode::InterpretationFailed.http_status(), 422);
        assert_eq!(ErrorCode::DbInsertFailed.http_status(), 500);
        assert!(!ErrorCode::InternalError.is_retryable());
        assert!(ErrorCode::IndexTimeout.is_retryable());
    }

    #[test]
    fn test_wire_names_match_serde() {
        for code in ErrorCode::ALL {
            let json = serde_json::to_string(&code).unwrap();
            assert_eq!(json, format!("\"{}\"", code.as_str()));
        }
    }

    #[test]
    fn test_envelope_shape() {
        let id = EntityId::for_key("person", "ada");
        let err: NeotomaError = ExecutionError::EntityNotFound { id: id.clone() }.into();
        let envelope = ErrorEnvelope::from_error(&err, TraceId::new());
        let value = serde_json::to_value(&envelope).unwrap();

        assert_eq!(value["error"]["code"], "ENTITY_NOT_FOUND");
        assert_eq!(value["error"]["details"]["entity_id"], id.as_str());
        assert!(value["error"]["message"].as_str().unwrap().contains("Entity not found"));
        assert!(value["error"]["trace_id"].is_string());
        assert_eq!(envelope.http_status(), 404);
    }

    #[test]
    fn test_envelope_omits_null_details() {
        let err = NeotomaError::internal("unexpected state");
        let value = serde_json::to_value(ErrorEnvelope::from_error(&err, TraceId::new())).unwrap();
        assert!(value["error"].get("details").is_none());
        assert_eq!(value["error"]["code"], "INTERNAL_ERROR");
    }
}
