//! Single-use units of database work.
//!
//! A [`Statement`] pairs a unit of work with the result container it fills.
//! It runs at most once. Run on its own it opens, commits (or rolls back)
//! its own transaction; bound to a caller's handle with
//! [`ExecuteOptions::with_transaction`] it leaves the transaction boundary
//! to whoever owns that handle.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::time::Instant;

use crate::backend::{Backend, within};
use crate::error::DbError;
use crate::registry::ConnectionRegistry;

/// The unit of work inside a statement.
type Work<H, R> =
    Box<dyn for<'a> FnOnce(&'a mut H, &'a R) -> BoxFuture<'a, Result<(), DbError>> + Send>;

/// Options for [`Statement::execute`].
pub struct ExecuteOptions<'a, H> {
    transaction: Option<&'a mut H>,
    deadline: Option<Instant>,
}

impl<'a, H> ExecuteOptions<'a, H> {
    /// Run against an already-open handle. The statement will neither
    /// commit nor roll it back.
    #[must_use]
    pub fn with_transaction(mut self, handle: &'a mut H) -> Self {
        self.transaction = Some(handle);
        self
    }

    /// Bound every backend call made by the statement.
    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

impl<H> Default for ExecuteOptions<'_, H> {
    fn default() -> Self {
        Self {
            transaction: None,
            deadline: None,
        }
    }
}

/// One unit of work against handle type `H`, filling a result container `R`.
pub struct Statement<H, R> {
    work: Option<Work<H, R>>,
    result: Arc<R>,
    executed: bool,
}

impl<H, R> Statement<H, R>
where
    H: Send + 'static,
    R: Send + Sync + 'static,
{
    /// Bind `work` to `result`.
    ///
    /// ```ignore
    /// let stmt = Statement::new(SingleResult::new(), |tx: &mut PgTx, rows: &SingleResult<u64>| {
    ///     Box::pin(async move {
    ///         let done = sqlx::query("DELETE FROM articles").execute(&mut **tx).await?;
    ///         rows.set(done.rows_affected());
    ///         Ok(())
    ///     })
    /// });
    /// ```
    pub fn new<F>(result: R, work: F) -> Self
    where
        F: for<'a> FnOnce(&'a mut H, &'a R) -> BoxFuture<'a, Result<(), DbError>>
            + Send
            + 'static,
    {
        Self {
            work: Some(Box::new(work)),
            result: Arc::new(result),
            executed: false,
        }
    }

    /// The container this statement fills. Meaningful once
    /// [`Statement::execute`] has succeeded.
    pub fn result(&self) -> Arc<R> {
        Arc::clone(&self.result)
    }

    /// Whether the statement has been consumed.
    pub const fn is_executed(&self) -> bool {
        self.executed
    }

    /// Execute the statement.
    ///
    /// Without a bound handle the statement takes the connection from
    /// `registry`, begins a transaction, runs, and commits, rolling back on
    /// failure. With a bound handle it only runs.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::AlreadyExecuted`] on any call after the first,
    /// whatever the first call's outcome.
    /// Returns [`DbError::ConnectionNotInitialized`] if no handle is bound
    /// and the registry is empty.
    /// Returns [`DbError::Execution`] wrapping the backend failure if the
    /// work fails inside a transaction this statement opened.
    pub async fn execute<B>(
        &mut self,
        registry: &ConnectionRegistry<B>,
        options: ExecuteOptions<'_, H>,
    ) -> Result<(), DbError>
    where
        B: Backend<Handle = H>,
    {
        let work = self.consume()?;
        let result = Arc::clone(&self.result);
        let ExecuteOptions {
            transaction,
            deadline,
        } = options;

        if let Some(handle) = transaction {
            return within(deadline, "executing statement", work(handle, &result)).await;
        }

        let backend = registry.get()?;
        let mut handle = within(deadline, "beginning transaction", backend.begin()).await?;

        let outcome = within(deadline, "executing statement", work(&mut handle, &result)).await;
        match outcome {
            Ok(()) => within(deadline, "committing transaction", backend.commit(handle)).await,
            Err(err) => {
                if let Err(rollback_err) =
                    within(deadline, "rolling back transaction", backend.rollback(handle)).await
                {
                    tracing::warn!(error = %rollback_err, "rollback after failed statement failed");
                }
                Err(err.context("statement failed, transaction rolled back"))
            }
        }
    }

    /// Run against `handle` without touching the transaction boundary.
    async fn run_in(&mut self, handle: &mut H) -> Result<(), DbError> {
        let work = self.consume()?;
        let result = Arc::clone(&self.result);
        work(handle, &result).await
    }

    /// Mark the statement executed and hand out its work exactly once.
    fn consume(&mut self) -> Result<Work<H, R>, DbError> {
        if self.executed {
            return Err(DbError::AlreadyExecuted);
        }
        self.executed = true;
        self.work.take().ok_or(DbError::AlreadyExecuted)
    }
}

impl<H, R> std::fmt::Debug for Statement<H, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("executed", &self.executed)
            .finish_non_exhaustive()
    }
}

/// A statement with its result type erased, as queued by transaction
/// actors.
pub trait Executable<H>: Send {
    /// Run against an open handle owned by the caller.
    fn execute_in<'a>(&'a mut self, handle: &'a mut H) -> BoxFuture<'a, Result<(), DbError>>;
}

/// Boxed [`Executable`].
pub type BoxedStatement<H> = Box<dyn Executable<H>>;

impl<H, R> Executable<H> for Statement<H, R>
where
    H: Send + 'static,
    R: Send + Sync + 'static,
{
    fn execute_in<'a>(&'a mut self, handle: &'a mut H) -> BoxFuture<'a, Result<(), DbError>> {
        Box::pin(self.run_in(handle))
    }
}

impl<H> Executable<H> for BoxedStatement<H> {
    fn execute_in<'a>(&'a mut self, handle: &'a mut H) -> BoxFuture<'a, Result<(), DbError>> {
        (**self).execute_in(handle)
    }
}
