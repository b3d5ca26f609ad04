//! Error types for bridgeorm

use thiserror::Error;

/// Result type alias for bridgeorm operations
pub type OrmResult<T> = Result<T, OrmError>;

/// Error types for builder, compiler and executor operations
#[derive(Debug, Error)]
pub enum OrmError {
    /// A builder setter received an argument of the wrong shape
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Field/value count disagreement in an underscored condition name
    #[error("Count mismatch: {fields} field(s) but {values} value(s)")]
    CountMismatch { fields: usize, values: usize },

    /// UPDATE/DELETE without a where clause
    #[error("Missing predicate: {0}")]
    MissingPredicate(String),

    /// INSERT/UPDATE without a payload
    #[error("Missing values: {0}")]
    MissingValues(String),

    /// Driver-level connection failure
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend rejected a compiled command
    #[error("Backend error: {0}")]
    Backend(String),

    /// Transaction state error (nested begin, commit without begin, ...)
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The backend cannot express the requested clause
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Row decode/mapping error
    #[error("Decode error on column '{column}': {message}")]
    Decode { column: String, message: String },

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),

    /// Pool error
    #[cfg(feature = "pool")]
    #[error("Pool error: {0}")]
    Pool(String),
}

impl OrmError {
    /// Create an invalid argument error
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a decode error for a specific column
    pub fn decode(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Decode {
            column: column.into(),
            message: message.into(),
        }
    }

    /// Check if this is a missing predicate error
    pub fn is_missing_predicate(&self) -> bool {
        matches!(self, Self::MissingPredicate(_))
    }

    /// Check if this is an invalid argument error
    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, Self::InvalidArgument(_))
    }

    /// Classify a tokio_postgres error.
    ///
    /// Errors carrying a server `DbError` mean the command reached Postgres and was
    /// rejected; everything else is treated as a connection failure.
    pub fn from_db_error(err: tokio_postgres::Error) -> Self {
        if let Some(db_err) = err.as_db_error() {
            return Self::Backend(format!("{} ({})", db_err.message(), db_err.code().code()));
        }
        if err.is_closed() {
            return Self::Connection("connection closed".to_string());
        }
        Self::Connection(err.to_string())
    }
}

#[cfg(feature = "pool")]
impl From<deadpool_postgres::PoolError> for OrmError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        Self::Pool(err.to_string())
    }
}

#[cfg(feature = "mongodb")]
impl From<mongodb::error::Error> for OrmError {
    fn from(err: mongodb::error::Error) -> Self {
        use mongodb::error::ErrorKind;

        match err.kind.as_ref() {
            ErrorKind::Command(_) | ErrorKind::Write(_) => Self::Backend(err.to_string()),
            _ => Self::Connection(err.to_string()),
        }
    }
}
