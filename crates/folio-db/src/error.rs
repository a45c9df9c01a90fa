//! Error types for the data layer.
//!
//! All errors are propagated via [`DbError`] which wraps the underlying
//! [`sqlx`] and [`fred`] errors, plus the statement and transaction
//! lifecycle failures of the execution layer.
//!
//! [`DbError`] is `Clone`: a transaction actor reports one statement failure
//! both to the submitting caller and on its terminal subscription, so the
//! non-cloneable driver errors are held behind an [`Arc`].

use std::sync::Arc;

/// Errors that can occur in the data layer.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DbError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[source] Arc<sqlx::Error>),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[source] Arc<sqlx::migrate::MigrateError>),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[source] Arc<serde_json::Error>),

    /// A key was not found in `Dragonfly`.
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A statement was executed a second time.
    #[error("statement has already been executed")]
    AlreadyExecuted,

    /// The connection registry has not been initialized.
    #[error("connection has not been initialized")]
    ConnectionNotInitialized,

    /// A unit of work failed against the backend.
    #[error("{context}: {source}")]
    Execution {
        /// What was being done when the failure happened.
        context: String,
        /// The underlying failure.
        source: Box<DbError>,
    },

    /// A backend call did not finish before the caller's deadline.
    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(String),

    /// The transaction actor has already terminated.
    #[error("transaction is closed")]
    TransactionClosed,

    /// No async runtime is available to start a transaction actor.
    #[error("runtime error: {0}")]
    Runtime(String),
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        Self::Postgres(Arc::new(err))
    }
}

impl From<sqlx::migrate::MigrateError> for DbError {
    fn from(err: sqlx::migrate::MigrateError) -> Self {
        Self::Migration(Arc::new(err))
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(Arc::new(err))
    }
}

impl DbError {
    /// Wrap `self` with a description of the failed operation.
    #[must_use]
    pub fn context(self, context: impl Into<String>) -> Self {
        Self::Execution {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with every [`DbError::Execution`] layer removed.
    pub fn root(&self) -> &Self {
        match self {
            Self::Execution { source, .. } => source.root(),
            other => other,
        }
    }
}
