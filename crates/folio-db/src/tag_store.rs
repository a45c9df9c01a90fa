//! Tag store (Store B): tags keyed by name on `Dragonfly`.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `tag:row:{name}` | JSON | [`TagRow`] |
//! | `tag:articles:{name}` | Set | Ids of articles carrying the tag |
//! | `article:{id}:tags` | Set | Tags last projected for the article |
//!
//! The tag name is always the last segment, after a fixed prefix per key
//! kind, so no tag name can produce another tag's key.
//!
//! The reverse index `article:{id}:tags` is what makes reconciliation
//! possible: it says which associations the previous projection wrote, so
//! the next one knows what to detach. Reads happen outside the batch
//! through [`KvRead`]; every write is staged into a [`KvBatch`].

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use folio_types::{Article, ArticleId};
use serde::{Deserialize, Serialize};

use crate::error::DbError;
use crate::kv::{KvBatch, KvRead};
use crate::result::SingleResult;
use crate::statement::{BoxedStatement, Statement};

/// Key of the tag row.
pub fn tag_key(tag: &str) -> String {
    format!("tag:row:{tag}")
}

/// Key of the set of articles carrying `tag`.
pub fn tag_articles_key(tag: &str) -> String {
    format!("tag:articles:{tag}")
}

/// Key of the reverse index of tags on `article_id`.
pub fn article_tags_key(article_id: ArticleId) -> String {
    format!("article:{article_id}:tags")
}

/// The stored tag row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRow {
    /// Tag name, also its key.
    pub name: String,
    /// Last time a projection wrote the tag.
    pub updated_at: DateTime<Utc>,
}

/// Statements over the tag keys. Each stages writes and reports how many.
#[derive(Debug, Clone, Copy, Default)]
pub struct TagStore;

impl TagStore {
    /// Insert or overwrite the row of `tag`.
    pub fn upsert_tag(tag: String) -> Statement<KvBatch, SingleResult<usize>> {
        Statement::new(SingleResult::new(), move |batch: &mut KvBatch, staged: &SingleResult<usize>| {
            Box::pin(async move {
                let row = TagRow {
                    updated_at: Utc::now(),
                    name: tag,
                };
                batch.set_json(&tag_key(&row.name), &row)?;
                staged.set(1);
                Ok(())
            })
        })
    }

    /// Associate `article_id` with `tag`.
    pub fn attach(article_id: ArticleId, tag: String) -> Statement<KvBatch, SingleResult<usize>> {
        Statement::new(SingleResult::new(), move |batch: &mut KvBatch, staged: &SingleResult<usize>| {
            Box::pin(async move {
                batch.set_add(tag_articles_key(&tag), article_id.to_string());
                staged.set(1);
                Ok(())
            })
        })
    }

    /// Drop the association between `article_id` and `tag`.
    pub fn detach(article_id: ArticleId, tag: String) -> Statement<KvBatch, SingleResult<usize>> {
        Statement::new(SingleResult::new(), move |batch: &mut KvBatch, staged: &SingleResult<usize>| {
            Box::pin(async move {
                batch.set_remove(tag_articles_key(&tag), article_id.to_string());
                staged.set(1);
                Ok(())
            })
        })
    }

    /// Remove `tag` and its association set.
    pub fn delete_tag(tag: String) -> Statement<KvBatch, SingleResult<usize>> {
        Statement::new(SingleResult::new(), move |batch: &mut KvBatch, staged: &SingleResult<usize>| {
            Box::pin(async move {
                batch.delete(tag_key(&tag));
                batch.delete(tag_articles_key(&tag));
                staged.set(2);
                Ok(())
            })
        })
    }

    /// Rewrite the reverse index of `article_id` to exactly `tags`.
    pub fn replace_article_tags(
        article_id: ArticleId,
        tags: BTreeSet<String>,
    ) -> Statement<KvBatch, SingleResult<usize>> {
        Statement::new(SingleResult::new(), move |batch: &mut KvBatch, staged: &SingleResult<usize>| {
            Box::pin(async move {
                let key = article_tags_key(article_id);
                batch.delete(key.clone());
                let count = tags.len();
                for tag in tags {
                    batch.set_add(key.clone(), tag);
                }
                staged.set(count.saturating_add(1));
                Ok(())
            })
        })
    }

    /// Read what is needed to reconcile the tag keys with `article`.
    ///
    /// # Errors
    ///
    /// Returns the store's read failure.
    pub async fn plan<K: KvRead>(kv: &K, article: &Article) -> Result<TagPlan, DbError> {
        let previous = kv.set_members(&article_tags_key(article.id)).await?;
        let mut members = BTreeMap::new();
        for tag in previous.difference(&article.tags) {
            let holders = kv.set_members(&tag_articles_key(tag)).await?;
            members.insert(tag.clone(), holders);
        }
        Ok(TagPlan::new(article, &previous, &members))
    }
}

/// The writes that bring the tag keys in line with one folded article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagPlan {
    article_id: ArticleId,
    /// Tags the article carries; each is upserted and attached.
    pub current: BTreeSet<String>,
    /// Tags the article no longer carries.
    pub detached: BTreeSet<String>,
    /// Detached tags no other article carries; deleted.
    pub orphaned: BTreeSet<String>,
}

impl TagPlan {
    /// Compare `article` with the tags projected last time.
    ///
    /// `members` maps each detached tag to its current article set.
    pub fn new(
        article: &Article,
        previous: &BTreeSet<String>,
        members: &BTreeMap<String, BTreeSet<String>>,
    ) -> Self {
        let own = article.id.to_string();
        let detached: BTreeSet<String> = previous.difference(&article.tags).cloned().collect();
        let orphaned = detached
            .iter()
            .filter(|tag| {
                members
                    .get(*tag)
                    .is_none_or(|holders| holders.iter().all(|holder| *holder == own))
            })
            .cloned()
            .collect();
        Self {
            article_id: article.id,
            current: article.tags.clone(),
            detached,
            orphaned,
        }
    }

    /// The statements for one batch, in the order they must be applied.
    pub fn statements(&self) -> Vec<BoxedStatement<KvBatch>> {
        let mut statements: Vec<BoxedStatement<KvBatch>> = Vec::new();
        for tag in &self.current {
            statements.push(Box::new(TagStore::upsert_tag(tag.clone())));
            statements.push(Box::new(TagStore::attach(self.article_id, tag.clone())));
        }
        for tag in &self.detached {
            statements.push(Box::new(TagStore::detach(self.article_id, tag.clone())));
        }
        for tag in &self.orphaned {
            statements.push(Box::new(TagStore::delete_tag(tag.clone())));
        }
        statements.push(Box::new(TagStore::replace_article_tags(
            self.article_id,
            self.current.clone(),
        )));
        statements
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::memory::MemoryKv;
    use crate::statement::Executable as _;

    fn article(tags: &[&str]) -> Article {
        let mut article = Article::empty(ArticleId::new());
        article.tags = tags.iter().map(|t| (*t).to_owned()).collect();
        article
    }

    async fn project(kv: &MemoryKv, article: &Article) -> TagPlan {
        let plan = TagStore::plan(kv, article).await.unwrap();
        let mut batch = kv.begin().await.unwrap();
        for mut statement in plan.statements() {
            statement.execute_in(&mut batch).await.unwrap();
        }
        kv.commit(batch).await.unwrap();
        plan
    }

    #[test]
    fn key_patterns() {
        let id = ArticleId::new();
        assert_eq!(tag_key("rust"), "tag:row:rust");
        assert_eq!(tag_articles_key("rust"), "tag:articles:rust");
        assert_eq!(article_tags_key(id), format!("article:{id}:tags"));
    }

    #[test]
    fn tag_names_never_produce_another_tags_key() {
        let names = ["x", "x:articles", "articles:x", "row:x", "x:row", ""];
        let mut keys = BTreeSet::new();
        for name in names {
            assert!(keys.insert(tag_key(name)));
            assert!(keys.insert(tag_articles_key(name)));
        }
    }

    #[tokio::test]
    async fn first_projection_writes_rows_and_both_indexes() {
        let kv = MemoryKv::new();
        let a = article(&["x", "y"]);

        project(&kv, &a).await;

        assert!(kv.contains_key(&tag_key("x")) && kv.contains_key(&tag_key("y")));
        assert!(kv.members(&tag_articles_key("x")).contains(&a.id.to_string()));
        assert_eq!(kv.members(&article_tags_key(a.id)), a.tags);
    }

    #[tokio::test]
    async fn suffix_like_tag_name_keeps_other_tag_associations() {
        let kv = MemoryKv::new();
        let a = article(&["x", "x:articles"]);

        project(&kv, &a).await;

        let own = BTreeSet::from([a.id.to_string()]);
        assert_eq!(kv.members(&tag_articles_key("x")), own);
        assert_eq!(kv.members(&tag_articles_key("x:articles")), own);
        let row: TagRow = serde_json::from_str(&kv.get(&tag_key("x:articles")).unwrap()).unwrap();
        assert_eq!(row.name, "x:articles");
        let row: TagRow = serde_json::from_str(&kv.get(&tag_key("x")).unwrap()).unwrap();
        assert_eq!(row.name, "x");

        // Dropping one tag must leave the other intact.
        let mut a = a;
        a.tags.remove("x");
        let plan = project(&kv, &a).await;
        assert_eq!(plan.orphaned, BTreeSet::from(["x".to_owned()]));
        assert!(!kv.contains_key(&tag_key("x")));
        assert_eq!(kv.members(&tag_articles_key("x:articles")), own);
    }

    #[tokio::test]
    async fn detaching_the_last_article_deletes_the_tag() {
        let kv = MemoryKv::new();
        let mut a = article(&["x", "y"]);
        project(&kv, &a).await;

        a.tags.remove("x");
        let plan = project(&kv, &a).await;

        assert!(plan.orphaned.contains("x"));
        assert!(!kv.contains_key(&tag_key("x")));
        assert!(!kv.contains_key(&tag_articles_key("x")));
        assert!(kv.contains_key(&tag_key("y")));
        assert_eq!(kv.members(&article_tags_key(a.id)), a.tags);
    }

    #[tokio::test]
    async fn shared_tag_survives_one_detach() {
        let kv = MemoryKv::new();
        let mut a = article(&["shared"]);
        let b = article(&["shared"]);
        project(&kv, &a).await;
        project(&kv, &b).await;

        a.tags.clear();
        let plan = project(&kv, &a).await;

        assert!(plan.orphaned.is_empty());
        assert!(kv.contains_key(&tag_key("shared")));
        assert_eq!(
            kv.members(&tag_articles_key("shared")),
            BTreeSet::from([b.id.to_string()])
        );
    }

    #[tokio::test]
    async fn reprojecting_the_same_state_is_idempotent() {
        let kv = MemoryKv::new();
        let a = article(&["x"]);
        project(&kv, &a).await;
        let first = kv.members(&tag_articles_key("x"));

        let again = project(&kv, &a).await;

        assert!(again.detached.is_empty());
        assert_eq!(kv.members(&tag_articles_key("x")), first);
        assert_eq!(kv.commit_count(), 2);
    }
}
