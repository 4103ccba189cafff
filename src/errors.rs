use sea_orm::error::DbErr;
use thiserror::Error;

/// Service-level error taxonomy.
///
/// Document operations validate everything before writing anything: a
/// `ValidationError` or `InsufficientStock` always means nothing was
/// persisted. `ConcurrentModification` means the caller should retry the
/// whole document operation, not just the failing line.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Consistency error: {0}")]
    ConsistencyError(String),

    #[error("Concurrent modification: {0}")]
    ConcurrentModification(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn db_error(error: DbErr) -> Self {
        ServiceError::DatabaseError(error)
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        ServiceError::NotFound(what.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::ValidationError(message.into())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_detail() {
        let err = ServiceError::NotFound("material 42".to_string());
        assert_eq!(err.to_string(), "Not found: material 42");

        let err = ServiceError::InsufficientStock("current 10, change -15".to_string());
        assert!(err.to_string().starts_with("Insufficient stock:"));
    }
}
