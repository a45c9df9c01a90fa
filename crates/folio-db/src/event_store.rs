//! Event store: the append-only log of article change records.
//!
//! Every article mutation lands here as one row of `article_events`. Event
//! ids are UUID v7, so `ORDER BY id` is history order. The full record is
//! kept as JSONB next to the columns the store filters on.
//!
//! Both operations are returned as [`Statement`]s: the caller picks whether
//! they run in their own transaction or inside an existing one.

use folio_types::{ArticleEvent, ArticleId};
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PgTx;
use crate::result::{MultipleResult, SingleResult};
use crate::statement::Statement;

/// Statements over the `article_events` table.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventStore;

impl EventStore {
    /// Append `event` to the log.
    ///
    /// Idempotent on the event id: re-appending a delivered record is a
    /// no-op. The result is `true` when a row was written.
    pub fn append(event: ArticleEvent) -> Statement<PgTx, SingleResult<bool>> {
        Statement::new(SingleResult::new(), move |tx: &mut PgTx, inserted: &SingleResult<bool>| {
            Box::pin(async move {
                let payload = serde_json::to_value(&event)?;
                let done = sqlx::query(
                    r"INSERT INTO article_events (id, article_id, payload, created_at)
                      VALUES ($1, $2, $3, $4)
                      ON CONFLICT (id) DO NOTHING",
                )
                .bind(event.id.into_inner())
                .bind(event.article_id.into_inner())
                .bind(&payload)
                .bind(event.created_at)
                .execute(&mut **tx)
                .await?;

                let written = done.rows_affected() > 0;
                tracing::debug!(
                    event_id = %event.id,
                    article_id = %event.article_id,
                    written,
                    "Appended article event"
                );
                inserted.set(written);
                Ok(())
            })
        })
    }

    /// Full history of `article_id`, oldest first.
    pub fn history(article_id: ArticleId) -> Statement<PgTx, MultipleResult<ArticleEvent>> {
        Statement::new(
            MultipleResult::new(),
            move |tx: &mut PgTx, events: &MultipleResult<ArticleEvent>| {
                Box::pin(async move {
                    let rows = sqlx::query_as::<_, EventRow>(
                        r"SELECT id, article_id, payload, created_at
                          FROM article_events
                          WHERE article_id = $1
                          ORDER BY id ASC",
                    )
                    .bind(article_id.into_inner())
                    .fetch_all(&mut **tx)
                    .await?;

                    let history = rows
                        .into_iter()
                        .map(EventRow::into_event)
                        .collect::<Result<Vec<_>, _>>()?;
                    tracing::debug!(%article_id, count = history.len(), "Loaded article history");
                    events.set(history);
                    Ok(())
                })
            },
        )
    }
}

/// A row from the `article_events` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct EventRow {
    /// Event id (UUID v7).
    pub id: Uuid,
    /// Article the event belongs to.
    pub article_id: Uuid,
    /// The serialized [`ArticleEvent`].
    pub payload: serde_json::Value,
    /// Time the event was recorded.
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl EventRow {
    /// Decode the stored record.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if the payload is not a valid
    /// event.
    pub fn into_event(self) -> Result<ArticleEvent, DbError> {
        let mut event: ArticleEvent = serde_json::from_value(self.payload)?;
        // Indexed columns are authoritative.
        event.id = self.id.into();
        event.article_id = self.article_id.into();
        Ok(event)
    }
}
