use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Quota would be exceeded.
    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    /// No node can take the request right now.
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// A chunk could not be read back from any node holding it.
    #[error("data loss: {0}")]
    DataLoss(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Short machine-readable name, used in JSON error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            StorageError::NotFound(_) => "not_found",
            StorageError::PermissionDenied(_) => "permission_denied",
            StorageError::Unauthenticated(_) => "unauthenticated",
            StorageError::ResourceExhausted(_) => "resource_exhausted",
            StorageError::Unavailable(_) => "unavailable",
            StorageError::DataLoss(_) => "data_loss",
            StorageError::InvalidArgument(_) => "invalid_argument",
            StorageError::FailedPrecondition(_) => "failed_precondition",
            StorageError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StorageError::NotFound("record not found".to_string()),
            other => StorageError::Internal(format!("database error: {}", other)),
        }
    }
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            _ => StorageError::Internal(format!("io error: {}", err)),
        }
    }
}

impl From<reqwest::Error> for StorageError {
    fn from(err: reqwest::Error) -> Self {
        StorageError::Unavailable(format!("node request failed: {}", err))
    }
}
