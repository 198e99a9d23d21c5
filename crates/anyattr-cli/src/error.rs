//! CLI errors and their exit codes.

use anyattr_core::CoreError;
use anyattr_storage::StorageError;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Bad arguments or input files (exit 1).
    #[error("{0}")]
    BadRequest(String),

    /// Named entity does not exist (exit 2).
    #[error("not found: {0}")]
    NotFound(String),

    /// Rejected by the attribute model (exit 1).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Storage failures, uniqueness conflicts included (exit 3).
    #[error(transparent)]
    Storage(StorageError),
}

impl From<StorageError> for CliError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::Core(core) => CliError::Core(core),
            StorageError::AnyNotFound(key) => CliError::NotFound(format!("any {}", key)),
            StorageError::SchemaNotFound(key) => CliError::NotFound(format!("schema '{}'", key)),
            StorageError::ResourceNotFound(key) => CliError::NotFound(format!("resource '{}'", key)),
            other => CliError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for CliError {
    fn from(e: serde_json::Error) -> Self {
        CliError::BadRequest(format!("invalid JSON: {}", e))
    }
}

impl CliError {
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::BadRequest(_) | CliError::Core(_) => 1,
            CliError::NotFound(_) => 2,
            CliError::Storage(_) => 3,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_split_by_cause() {
        let missing: CliError = StorageError::SchemaNotFound("phone".into()).into();
        assert_eq!(missing.exit_code(), 2);
        assert_eq!(missing.to_string(), "not found: schema 'phone'");

        let dup: CliError = StorageError::Duplicate {
            schema: "email".into(),
            value: "a@b".into(),
        }
        .into();
        assert_eq!(dup.exit_code(), 3);

        let core: CliError = StorageError::Core(CoreError::InvalidState("x".into())).into();
        assert!(matches!(core, CliError::Core(_)));
    }
}
