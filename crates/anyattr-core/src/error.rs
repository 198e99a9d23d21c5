//! Core error types for anyattr-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! schema definition, value coercion, owner compatibility and mapping
//! validation failures.

use thiserror::Error;

use crate::types::SchemaKind;

/// Core errors produced by the anyattr-core crate.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    /// Raw input could not be coerced to the schema's declared type.
    #[error("cannot parse '{value}' for schema '{schema}': {cause}")]
    Parsing {
        schema: String,
        value: String,
        cause: String,
    },

    /// A parsed value was rejected by the attribute validator.
    #[error("invalid value '{value}' for schema '{schema}': {reason}")]
    InvalidValue {
        schema: String,
        value: String,
        reason: String,
    },

    /// The schema is not among the ones the owner is allowed to carry.
    #[error("schema '{schema}' not allowed for {owner}")]
    UnallowedSchema { schema: String, owner: String },

    /// An operation was invoked out of order.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// A plain schema's type cannot change while attribute values reference it.
    #[error("schema '{schema}' is in use and its type cannot change")]
    SchemaInUse { schema: String },

    /// A schema key is already taken by a schema of another kind.
    #[error("schema key '{key}' already defined as {existing:?}")]
    DuplicateSchema { key: String, existing: SchemaKind },

    #[error("{kind:?} schema not found: '{key}'")]
    SchemaNotFound { kind: SchemaKind, key: String },

    /// A schema definition failed validation.
    #[error("invalid schema '{key}': {reason}")]
    InvalidSchema { key: String, reason: String },

    #[error("any type not found: '{key}'")]
    AnyTypeNotFound { key: String },

    #[error("any type class not found: '{key}'")]
    ClassNotFound { key: String },

    /// A mapping item or mapping failed validation.
    #[error("invalid mapping: {reason}")]
    InvalidMapping { reason: String },

    /// A write was attempted on a readonly virtual schema.
    #[error("schema '{schema}' is readonly")]
    ReadonlySchema { schema: String },

    /// The encryptor rejected the configured algorithm or key.
    #[error("encryption failed with algorithm '{algorithm}': {reason}")]
    Encryption { algorithm: String, reason: String },

    /// The expression evaluator failed.
    #[error("evaluation of '{expression}' failed: {reason}")]
    Evaluation { expression: String, reason: String },

    /// An external resource could not serve a virtual attribute.
    #[error("resource '{resource}' failed: {reason}")]
    Resource { resource: String, reason: String },
}
