//! Projections of a folded article into the read stores.
//!
//! A [`Projection`] turns an [`Article`] into the statements that bring
//! one store in line with it, and names the transaction manager those
//! statements run under. [`project`] drives one projection through one
//! transaction: submit every statement, commit, wait for the terminal
//! outcome.

use std::future::Future;

use folio_db::{
    ArticleStore, Backend, BatchManager, BoxedStatement, DbError, KvBatch, KvRead, PgTx,
    PostgresPool, RelationalManager, TagStore, TransactionManager,
};
use folio_types::Article;
use tokio::time::Instant;

use crate::error::SyncError;

/// Handle type of the statements a projection produces.
pub type HandleOf<P> = <<P as Projection>::Manager as TransactionManager>::Handle;

/// One read store the orchestrator keeps in line with the event history.
pub trait Projection: Send + Sync {
    /// Transaction manager the statements run under.
    type Manager: TransactionManager;

    /// Short store name for logs and errors.
    fn name(&self) -> &'static str;

    /// The manager starting this projection's transactions.
    fn manager(&self) -> &Self::Manager;

    /// The statements that make the store reflect `article`, in order.
    ///
    /// All writes must be idempotent: a retried sync re-runs them.
    fn statements(
        &self,
        article: &Article,
    ) -> impl Future<Output = Result<Vec<BoxedStatement<HandleOf<Self>>>, DbError>> + Send;
}

/// Run `projection` for `article` in one transaction.
///
/// # Errors
///
/// Returns [`SyncError::Projection`] carrying the first failure: building
/// the statements, any statement, or the commit.
pub async fn project<P: Projection>(
    projection: &P,
    article: &Article,
    deadline: Option<Instant>,
) -> Result<(), SyncError> {
    let store = projection.name();
    let statements = projection
        .statements(article)
        .await
        .map_err(|err| SyncError::projection(store, err))?;
    let count = statements.len();

    let tx = projection
        .manager()
        .get_and_start(deadline)
        .map_err(|err| SyncError::projection(store, err))?;
    let outcome = tx.subscribe_error();

    for statement in statements {
        if let Err(err) = tx.execute_statement(statement).await {
            tx.rollback();
            let cause = match outcome.recv().await {
                // The actor is gone; its terminal value says why.
                Some(Err(terminal)) if matches!(err, DbError::TransactionClosed) => terminal,
                Some(Err(terminal)) => {
                    tracing::debug!(store, error = %terminal, "transaction ended after statement failure");
                    err
                }
                _ => err,
            };
            return Err(SyncError::projection(store, cause));
        }
    }

    tx.commit();
    match outcome.recv().await {
        Some(Ok(())) => {
            tracing::debug!(store, article_id = %article.id, statements = count, "projection committed");
            Ok(())
        }
        Some(Err(err)) => Err(SyncError::projection(store, err)),
        None => Err(SyncError::projection(store, DbError::TransactionClosed)),
    }
}

/// Store A: the article row and its tag associations in `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct ArticleProjection {
    manager: RelationalManager<PostgresPool>,
}

impl ArticleProjection {
    /// Project through `manager`.
    pub const fn new(manager: RelationalManager<PostgresPool>) -> Self {
        Self { manager }
    }
}

impl Projection for ArticleProjection {
    type Manager = RelationalManager<PostgresPool>;

    fn name(&self) -> &'static str {
        "articles"
    }

    fn manager(&self) -> &Self::Manager {
        &self.manager
    }

    async fn statements(&self, article: &Article) -> Result<Vec<BoxedStatement<PgTx>>, DbError> {
        Ok(vec![
            Box::new(ArticleStore::upsert_article(article.clone())),
            Box::new(ArticleStore::reconcile_tags(article.id, article.tags.clone())),
        ])
    }
}

/// Store B: tag rows and tag-to-article indexes in a key-value store.
#[derive(Debug)]
pub struct TagProjection<B> {
    manager: BatchManager<B>,
}

impl<B> TagProjection<B> {
    /// Project through `manager`; reads go through its registry.
    pub const fn new(manager: BatchManager<B>) -> Self {
        Self { manager }
    }
}

impl<B> Projection for TagProjection<B>
where
    B: Backend<Handle = KvBatch> + KvRead,
{
    type Manager = BatchManager<B>;

    fn name(&self) -> &'static str {
        "tags"
    }

    fn manager(&self) -> &Self::Manager {
        &self.manager
    }

    async fn statements(&self, article: &Article) -> Result<Vec<BoxedStatement<KvBatch>>, DbError> {
        let kv = self.manager.registry().get()?;
        let plan = TagStore::plan(kv.as_ref(), article).await?;
        tracing::debug!(
            article_id = %article.id,
            current = plan.current.len(),
            detached = plan.detached.len(),
            orphaned = plan.orphaned.len(),
            "Planned tag projection"
        );
        Ok(plan.statements())
    }
}
