//! The seam between statements and a concrete store.
//!
//! A [`Backend`] knows how to open, commit and abandon one unit of
//! transactional work. What a "handle" is differs per store: for
//! `PostgreSQL` it is a live `sqlx` transaction, for `Dragonfly` it is a
//! batch of writes that only reaches the server on commit.

use std::future::Future;

use tokio::time::Instant;

use crate::error::DbError;

/// A store that statements can run against.
pub trait Backend: Send + Sync + 'static {
    /// The transaction handle statements operate on.
    type Handle: Send + 'static;

    /// Open a new transaction handle.
    fn begin(&self) -> impl Future<Output = Result<Self::Handle, DbError>> + Send;

    /// Make everything done through `handle` durable.
    fn commit(&self, handle: Self::Handle) -> impl Future<Output = Result<(), DbError>> + Send;

    /// Abandon everything done through `handle`.
    fn rollback(&self, handle: Self::Handle)
    -> impl Future<Output = Result<(), DbError>> + Send;
}

/// Run `fut`, failing with [`DbError::DeadlineExceeded`] once `deadline`
/// passes. `None` means no deadline.
pub(crate) async fn within<T, F>(
    deadline: Option<Instant>,
    action: &str,
    fut: F,
) -> Result<T, DbError>
where
    F: Future<Output = Result<T, DbError>>,
{
    match deadline {
        Some(at) => tokio::time::timeout_at(at, fut).await.map_err(|elapsed| {
            tracing::debug!(action, error = %elapsed, "backend call abandoned at deadline");
            DbError::DeadlineExceeded(action.to_owned())
        })?,
        None => fut.await,
    }
}
