//! Crate-level error type.
//!
//! Individual modules define their own error enums (`StorageError`,
//! `TemplateError`, `BackendError`); this module folds them into the
//! error surface exposed to administrative callers. Generation callers
//! never see these directly: the orchestrator returns tagged outcome
//! values instead of propagating errors across its boundary.

use thiserror::Error;

use crate::generation::BackendError;
use crate::storage::StorageError;
use crate::template::TemplateError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("Invalid template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    #[error("Generation backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Structured output parse error: {0}")]
    Parse(String),

    #[error("Structured output validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

// Absent rows are a distinct category for callers deciding between
// "retry manually" and "edit the template", so the not-found variants
// of StorageError are lifted out of the storage bucket here.
impl From<StorageError> for CoreError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::TemplateNotFound(id) => CoreError::NotFound(format!("template {id}")),
            StorageError::VersionNotFound(id) => {
                CoreError::NotFound(format!("template version {id}"))
            }
            other => CoreError::Storage(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn storage_not_found_maps_to_not_found() {
        let id = Uuid::new_v4();
        let err: CoreError = StorageError::TemplateNotFound(id).into();
        assert!(matches!(err, CoreError::NotFound(_)));
        assert!(err.to_string().contains(&id.to_string()));
    }

    #[test]
    fn other_storage_errors_stay_storage() {
        let err: CoreError = StorageError::DuplicateName("greet".to_string()).into();
        assert!(matches!(err, CoreError::Storage(_)));
    }
}
