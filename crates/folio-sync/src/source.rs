//! Where change records come from.
//!
//! The orchestrator only needs the full ascending history of one article.
//! [`PgEventSource`] reads it from the event store, executing the statement
//! on its own through the connection registry.

use std::future::Future;
use std::sync::Arc;

use folio_db::{ConnectionRegistry, DbError, EventStore, ExecuteOptions, PostgresPool};
use folio_types::{ArticleEvent, ArticleId};
use tokio::time::Instant;

/// A source of article change records.
pub trait EventSource: Send + Sync {
    /// Every change record of `article_id`, oldest first.
    fn history(
        &self,
        article_id: ArticleId,
        deadline: Option<Instant>,
    ) -> impl Future<Output = Result<Vec<ArticleEvent>, DbError>> + Send;
}

/// Change records stored in `PostgreSQL`.
#[derive(Debug, Clone)]
pub struct PgEventSource {
    registry: Arc<ConnectionRegistry<PostgresPool>>,
}

impl PgEventSource {
    /// Read through the connection in `registry`.
    pub const fn new(registry: Arc<ConnectionRegistry<PostgresPool>>) -> Self {
        Self { registry }
    }

    /// Append a delivered change record. Returns whether it was new.
    ///
    /// # Errors
    ///
    /// Returns the event store's failure.
    pub async fn record(&self, event: ArticleEvent) -> Result<bool, DbError> {
        let mut append = EventStore::append(event);
        append
            .execute(&self.registry, ExecuteOptions::default())
            .await?;
        Ok(append.result().value())
    }
}

impl EventSource for PgEventSource {
    async fn history(
        &self,
        article_id: ArticleId,
        deadline: Option<Instant>,
    ) -> Result<Vec<ArticleEvent>, DbError> {
        let mut history = EventStore::history(article_id);
        let mut options = ExecuteOptions::default();
        if let Some(deadline) = deadline {
            options = options.with_deadline(deadline);
        }
        history.execute(&self.registry, options).await?;
        Ok(history.result().drain())
    }
}
