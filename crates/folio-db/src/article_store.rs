//! Article store (Store A): articles keyed by id with their tag
//! associations, on `PostgreSQL`.
//!
//! Writes are upserts keyed by the article id and the `(article, tag)`
//! pair, so projecting the same folded state twice changes nothing.
//!
//! Listings use cursor pagination over the article id. A page fetches one
//! row more than its limit; [`MultipleResult::has_next`] on the last slot
//! tells whether that extra row exists.

use std::collections::BTreeSet;

use folio_types::{Article, ArticleId, PageInfo, Pagination};
use uuid::Uuid;

use crate::error::DbError;
use crate::postgres::PgTx;
use crate::result::{MultipleResult, SingleResult};
use crate::statement::Statement;

/// Statements over the `articles` and `article_tags` tables.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArticleStore;

impl ArticleStore {
    /// Insert or overwrite the scalar fields of `article`.
    ///
    /// The result is the number of rows written.
    pub fn upsert_article(article: Article) -> Statement<PgTx, SingleResult<u64>> {
        Statement::new(SingleResult::new(), move |tx: &mut PgTx, written: &SingleResult<u64>| {
            Box::pin(async move {
                let done = sqlx::query(
                    r"INSERT INTO articles (id, title, body, thumbnail, is_visible, updated_at)
                      VALUES ($1, $2, $3, $4, $5, now())
                      ON CONFLICT (id) DO UPDATE SET
                          title = EXCLUDED.title,
                          body = EXCLUDED.body,
                          thumbnail = EXCLUDED.thumbnail,
                          is_visible = EXCLUDED.is_visible,
                          updated_at = EXCLUDED.updated_at",
                )
                .bind(article.id.into_inner())
                .bind(&article.title)
                .bind(&article.body)
                .bind(&article.thumbnail)
                .bind(article.is_visible)
                .execute(&mut **tx)
                .await?;

                tracing::debug!(article_id = %article.id, "Upserted article");
                written.set(done.rows_affected());
                Ok(())
            })
        })
    }

    /// Make the stored associations of `article_id` exactly `tags`.
    ///
    /// Associations not in `tags` are deleted, missing ones inserted. The
    /// result is the number of association rows removed plus inserted.
    pub fn reconcile_tags(
        article_id: ArticleId,
        tags: BTreeSet<String>,
    ) -> Statement<PgTx, SingleResult<u64>> {
        Statement::new(SingleResult::new(), move |tx: &mut PgTx, changed: &SingleResult<u64>| {
            Box::pin(async move {
                let tags: Vec<String> = tags.into_iter().collect();

                let removed = sqlx::query(
                    r"DELETE FROM article_tags
                      WHERE article_id = $1 AND NOT (tag = ANY($2::TEXT[]))",
                )
                .bind(article_id.into_inner())
                .bind(&tags)
                .execute(&mut **tx)
                .await?;

                let inserted = sqlx::query(
                    r"INSERT INTO article_tags (article_id, tag)
                      SELECT $1, tag FROM UNNEST($2::TEXT[]) AS tag
                      ON CONFLICT (article_id, tag) DO NOTHING",
                )
                .bind(article_id.into_inner())
                .bind(&tags)
                .execute(&mut **tx)
                .await?;

                tracing::debug!(
                    %article_id,
                    removed = removed.rows_affected(),
                    inserted = inserted.rows_affected(),
                    "Reconciled article tags"
                );
                changed.set(
                    removed
                        .rows_affected()
                        .saturating_add(inserted.rows_affected()),
                );
                Ok(())
            })
        })
    }

    /// Load one article with its tags.
    pub fn find_article(article_id: ArticleId) -> Statement<PgTx, SingleResult<Option<Article>>> {
        Statement::new(
            SingleResult::new(),
            move |tx: &mut PgTx, found: &SingleResult<Option<Article>>| {
                Box::pin(async move {
                    let row = sqlx::query_as::<_, ArticleRow>(
                        r"SELECT a.id, a.title, a.body, a.thumbnail, a.is_visible,
                                 COALESCE(array_agg(t.tag ORDER BY t.tag)
                                          FILTER (WHERE t.tag IS NOT NULL), '{}'::TEXT[]) AS tags
                          FROM articles a
                          LEFT JOIN article_tags t ON t.article_id = a.id
                          WHERE a.id = $1
                          GROUP BY a.id",
                    )
                    .bind(article_id.into_inner())
                    .fetch_optional(&mut **tx)
                    .await?;

                    found.set(row.map(ArticleRow::into_article));
                    Ok(())
                })
            },
        )
    }

    /// Fetch one page of visible articles, plus one look-ahead row.
    ///
    /// Rows arrive in the order they are read from the cursor: ascending
    /// ids for [`PageDirection::Next`], descending for
    /// [`PageDirection::Previous`]. Turn them into a page with
    /// [`assemble_page`].
    ///
    /// [`PageDirection::Next`]: folio_types::PageDirection::Next
    /// [`PageDirection::Previous`]: folio_types::PageDirection::Previous
    pub fn list_articles(pagination: &Pagination) -> Statement<PgTx, MultipleResult<ArticleRow>> {
        let cursor = pagination.cursor.clone();
        let fetch = i64::from(pagination.fetch_limit());
        let query = if pagination.is_next() {
            r"SELECT a.id, a.title, a.body, a.thumbnail, a.is_visible,
                     COALESCE(array_agg(t.tag ORDER BY t.tag)
                              FILTER (WHERE t.tag IS NOT NULL), '{}'::TEXT[]) AS tags
              FROM articles a
              LEFT JOIN article_tags t ON t.article_id = a.id
              WHERE a.is_visible AND ($1::UUID IS NULL OR a.id > $1)
              GROUP BY a.id
              ORDER BY a.id ASC
              LIMIT $2"
        } else {
            r"SELECT a.id, a.title, a.body, a.thumbnail, a.is_visible,
                     COALESCE(array_agg(t.tag ORDER BY t.tag)
                              FILTER (WHERE t.tag IS NOT NULL), '{}'::TEXT[]) AS tags
              FROM articles a
              LEFT JOIN article_tags t ON t.article_id = a.id
              WHERE a.is_visible AND ($1::UUID IS NULL OR a.id < $1)
              GROUP BY a.id
              ORDER BY a.id DESC
              LIMIT $2"
        };

        Statement::new(
            MultipleResult::new(),
            move |tx: &mut PgTx, rows: &MultipleResult<ArticleRow>| {
                Box::pin(async move {
                    let after = cursor.as_deref().map(parse_cursor).transpose()?;
                    let fetched = sqlx::query_as::<_, ArticleRow>(query)
                        .bind(after)
                        .bind(fetch)
                        .fetch_all(&mut **tx)
                        .await?;

                    tracing::debug!(count = fetched.len(), "Fetched article page");
                    rows.set(fetched);
                    Ok(())
                })
            },
        )
    }
}

/// A page of articles in ascending id order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticlePage {
    /// Articles on this page.
    pub items: Vec<Article>,
    /// Page boundaries.
    pub page_info: PageInfo,
}

/// Build a page from the rows fetched by [`ArticleStore::list_articles`].
///
/// Consumes at most `pagination.limit` rows from `rows`.
pub fn assemble_page(pagination: &Pagination, rows: &MultipleResult<ArticleRow>) -> ArticlePage {
    let limit = usize::try_from(pagination.limit).unwrap_or(usize::MAX);
    let mut items = Vec::with_capacity(limit.min(rows.remaining()));
    let mut more = false;

    while items.len() < limit {
        if items.len().saturating_add(1) == limit {
            // Last slot: a second remaining row belongs to another page.
            more = rows.has_next();
        }
        match rows.next() {
            Some(row) => items.push(row.into_article()),
            None => break,
        }
    }

    if pagination.is_previous() {
        items.reverse();
    }

    let from_cursor = pagination.cursor.is_some();
    let (has_next_page, has_previous_page) = if pagination.is_next() {
        (more, from_cursor)
    } else {
        (from_cursor, more)
    };

    let page_info = PageInfo {
        has_next_page,
        has_previous_page,
        start_cursor: items.first().map(|article| article.id.to_string()),
        end_cursor: items.last().map(|article| article.id.to_string()),
    };
    ArticlePage { items, page_info }
}

fn parse_cursor(cursor: &str) -> Result<Uuid, DbError> {
    cursor
        .parse::<Uuid>()
        .map_err(|e| DbError::Config(format!("Invalid page cursor {cursor:?}: {e}")))
}

/// A row from `articles` joined with its aggregated tags.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ArticleRow {
    /// Article id.
    pub id: Uuid,
    /// Title.
    pub title: String,
    /// Body content.
    pub body: String,
    /// Thumbnail URL.
    pub thumbnail: String,
    /// Visibility flag.
    pub is_visible: bool,
    /// Associated tags, sorted.
    pub tags: Vec<String>,
}

impl ArticleRow {
    /// Convert into the domain type.
    pub fn into_article(self) -> Article {
        Article {
            id: self.id.into(),
            title: self.title,
            body: self.body,
            thumbnail: self.thumbnail,
            tags: self.tags.into_iter().collect(),
            is_visible: self.is_visible,
        }
    }
}
