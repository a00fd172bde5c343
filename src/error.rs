use thiserror::Error;

/// Errors surfaced by the backend to its host.
///
/// Every operation reports failure through one of these variants instead of
/// panicking, so the host can tell an unconfigured operation apart from a
/// rejected input or a failed query.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    /// The query template backing this operation is not configured.
    #[error("Operation not supported: {0}")]
    NotSupported(&'static str),

    #[error("User not found: {0}")]
    NotFound(String),

    #[error("Password exceeds the maximum length of {max} bytes", max = crate::password::MAX_PASSWORD_LENGTH)]
    PasswordTooLong,

    #[error("Password hashing failed: {0}")]
    Hashing(String),

    #[error("Query error: {0}")]
    Query(String),

    #[error("Database error: {0}")]
    Database(String),

    /// A database failure whose driver message was withheld because the
    /// statement carried password material.
    #[error("Database error (details withheld)")]
    DatabaseRedacted,
}

impl AppError {
    /// Drop driver detail from database failures, leaving other errors intact.
    pub fn redacted(self) -> Self {
        match self {
            AppError::Database(_) => AppError::DatabaseRedacted,
            other => other,
        }
    }

    /// Whether this error means the operation was never attempted.
    pub fn is_not_supported(&self) -> bool {
        matches!(self, AppError::NotSupported(_))
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::Database(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Configuration(err.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
