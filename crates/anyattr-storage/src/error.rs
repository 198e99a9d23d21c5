//! Storage error types.
//!
//! [`StorageError`] wraps the failures of both backends plus the domain
//! conflicts detected at commit, such as a unique value already held by
//! another owner.

use thiserror::Error;

use anyattr_core::{AnyKey, CoreError};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Applying the embedded migrations failed.
    #[error("migration error: {0}")]
    Migration(String),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A unique value is already held by another owner. `value` is the
    /// canonical text, without the schema's conversion pattern.
    #[error("duplicate value '{value}' for unique schema '{schema}'")]
    Duplicate { schema: String, value: String },

    #[error("any not found: {0}")]
    AnyNotFound(AnyKey),

    #[error("schema not found: {0}")]
    SchemaNotFound(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// A data integrity violation was detected.
    #[error("integrity error: {reason}")]
    IntegrityError { reason: String },

    /// Stored data could not be turned back into domain objects.
    #[error("reconstruction error: {reason}")]
    ReconstructionError { reason: String },
}
