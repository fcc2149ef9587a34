use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::extensions::ExtensionParseError;
use crate::types::EntityUid;

/// Request-level and load-level failures. When one of these is returned no
/// decision was made.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum PolicyError {
    #[error("failed to lock policy set for read/write: {0}")]
    LockError(String),

    #[error("failed to parse: {0}")]
    ParseError(String),

    #[error("entity `{0}` does not exist in the entity store")]
    UnknownEntity(String),

    #[error("request validation error: {0}")]
    RequestValidationError(String),

    #[error("Context creation error: {0}")]
    ContextError(String),

    #[error("Entity error: {0}")]
    EntityError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("duplicate template or policy id `{0}`")]
    DuplicatePolicyId(String),

    #[error("Linking error: {0}")]
    LinkingError(String),

    #[error("policy validation failed: {0}")]
    ValidationFailed(String),

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<serde_json::Error> for PolicyError {
    fn from(err: serde_json::Error) -> Self {
        PolicyError::InvalidFormat(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for PolicyError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        PolicyError::LockError(err.to_string())
    }
}

/// An error raised while evaluating the condition of a single policy.
///
/// These never abort an authorization call: the offending policy is
/// skipped and the error is reported alongside the decision.
#[derive(Debug, Error, Serialize, Deserialize, Clone, PartialEq, Eq, Hash, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EvalError {
    #[error("type error: expected {expected}, got {actual}")]
    TypeError { expected: String, actual: String },

    #[error("entity `{uid}` does not exist")]
    EntityDoesNotExist {
        #[schema(value_type = String)]
        uid: EntityUid,
    },

    #[error("`{on}` does not have the attribute `{attr}`")]
    AttributeNotFound { on: String, attr: String },

    #[error("integer overflow while evaluating `{op}`")]
    IntegerOverflow { op: String },

    #[error("failed to construct {extension} value: {message}")]
    ExtensionParse { extension: String, message: String },

    #[error("extension function `{name}` does not exist")]
    UnknownFunction { name: String },

    #[error("wrong number of arguments to `{name}`: expected {expected}, got {actual}")]
    WrongArity {
        name: String,
        expected: usize,
        actual: usize,
    },

    #[error("slot `{slot}` is not linked")]
    UnlinkedSlot { slot: String },
}

impl EvalError {
    pub(crate) fn type_error(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        EvalError::TypeError {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<ExtensionParseError> for EvalError {
    fn from(err: ExtensionParseError) -> Self {
        EvalError::ExtensionParse {
            extension: err.extension().to_string(),
            message: err.to_string(),
        }
    }
}
