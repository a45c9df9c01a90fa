//! The Sync Orchestrator.
//!
//! One sync rebuilds an article from its full change history and writes the
//! result into both read stores:
//!
//! ```text
//! EventSource --history--> fold --> Article --+--> project(store A) --+--> publish
//!                                             +--> project(store B) --+
//! ```
//!
//! The two projections run concurrently, each in its own transaction. There
//! is no atomicity across them: when one fails the sync fails, and a store
//! that already committed stays committed. Every write is an idempotent
//! upsert of state derived from the history, so retrying the sync
//! converges both stores.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use folio_types::{Article, ArticleId};
use tokio::time::Instant;

use crate::error::SyncError;
use crate::projection::{Projection, project};
use crate::publish::Publisher;
use crate::source::EventSource;

/// Default time budget for one sync.
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(10);

/// Keeps two read stores in line with the article event history.
#[derive(Debug)]
pub struct SyncOrchestrator<E, A, B, P> {
    source: E,
    store_a: A,
    store_b: B,
    publisher: P,
    timeout: Duration,
}

impl<E, A, B, P> SyncOrchestrator<E, A, B, P>
where
    E: EventSource,
    A: Projection,
    B: Projection,
    P: Publisher,
{
    /// Wire the orchestrator with the default time budget.
    pub const fn new(source: E, store_a: A, store_b: B, publisher: P) -> Self {
        Self {
            source,
            store_a,
            store_b,
            publisher,
            timeout: DEFAULT_SYNC_TIMEOUT,
        }
    }

    /// Bound each sync by `timeout`.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The event source.
    pub const fn source(&self) -> &E {
        &self.source
    }

    /// Rebuild `article_id` from its history, project it into both stores
    /// and publish a change notification.
    ///
    /// Returns the folded article.
    ///
    /// # Errors
    ///
    /// - [`SyncError::Db`] if the history cannot be loaded.
    /// - [`SyncError::EmptyHistory`] if there is nothing to fold.
    /// - [`SyncError::Projection`] naming the store that failed first in
    ///   time. When both fail, the later failure is only logged.
    /// - [`SyncError::Publish`] if both stores committed but the
    ///   notification was not sent.
    /// - [`SyncError::Timeout`] if the whole step exceeded its budget.
    #[tracing::instrument(skip(self), err(level = tracing::Level::WARN))]
    pub async fn sync(&self, article_id: ArticleId) -> Result<Article, SyncError> {
        let Some(deadline) = Instant::now().checked_add(self.timeout) else {
            return self.run(article_id, None).await;
        };
        match tokio::time::timeout_at(deadline, self.run(article_id, Some(deadline))).await {
            Ok(outcome) => outcome,
            Err(_elapsed) => Err(SyncError::Timeout {
                article_id,
                after: self.timeout,
            }),
        }
    }

    async fn run(
        &self,
        article_id: ArticleId,
        deadline: Option<Instant>,
    ) -> Result<Article, SyncError> {
        let history = self.source.history(article_id, deadline).await?;
        if history.is_empty() {
            return Err(SyncError::EmptyHistory { article_id });
        }
        let article = Article::fold(article_id, &history);
        tracing::debug!(
            events = history.len(),
            tags = article.tags.len(),
            "Folded article history"
        );

        // Both branches run to completion; a failure in one never cancels
        // the other's commit.
        let finished = AtomicUsize::new(0);
        let (store_a, store_b) = tokio::join!(
            async {
                let outcome = project(&self.store_a, &article, deadline).await;
                (finished.fetch_add(1, Ordering::SeqCst), outcome)
            },
            async {
                let outcome = project(&self.store_b, &article, deadline).await;
                (finished.fetch_add(1, Ordering::SeqCst), outcome)
            },
        );
        first_failure(store_a, store_b)?;

        self.publisher.publish(article_id).await?;
        tracing::info!(
            %article_id,
            store_a = self.store_a.name(),
            store_b = self.store_b.name(),
            "Article synced"
        );
        Ok(article)
    }
}

/// The earlier of two ranked branch outcomes that failed, if any.
fn first_failure(
    a: (usize, Result<(), SyncError>),
    b: (usize, Result<(), SyncError>),
) -> Result<(), SyncError> {
    match (a, b) {
        ((_, Ok(())), (_, Ok(()))) => Ok(()),
        ((_, Err(err)), (_, Ok(()))) | ((_, Ok(())), (_, Err(err))) => Err(err),
        ((rank_a, Err(err_a)), (rank_b, Err(err_b))) => {
            let (first, later) = if rank_a <= rank_b {
                (err_a, err_b)
            } else {
                (err_b, err_a)
            };
            tracing::warn!(error = %later, "other store failed as well");
            Err(first)
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::AtomicBool;
    use std::sync::{Arc, Mutex, PoisonError};

    use folio_db::{
        BatchManager, BoxedStatement, ConnectionRegistry, DbError, KvBatch, MemoryKv,
        RelationalManager, SingleResult, Statement,
    };
    use folio_db::tag_store::{tag_articles_key, tag_key};
    use folio_types::ArticleEvent;

    use super::*;
    use crate::projection::TagProjection;

    /// Change records held in memory.
    #[derive(Default)]
    struct MemorySource {
        events: Mutex<Vec<ArticleEvent>>,
        stall: bool,
    }

    impl MemorySource {
        fn push(&self, event: ArticleEvent) {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
        }
    }

    impl EventSource for MemorySource {
        async fn history(
            &self,
            article_id: ArticleId,
            _deadline: Option<Instant>,
        ) -> Result<Vec<ArticleEvent>, DbError> {
            if self.stall {
                tokio::time::sleep(Duration::from_secs(3600)).await;
            }
            let events = self.events.lock().unwrap_or_else(PoisonError::into_inner);
            Ok(events
                .iter()
                .filter(|event| event.article_id == article_id)
                .cloned()
                .collect())
        }
    }

    /// Store A stand-in: the article as one JSON value per id, written
    /// through the relational actor.
    struct RowProjection {
        manager: RelationalManager<MemoryKv>,
    }

    impl Projection for RowProjection {
        type Manager = RelationalManager<MemoryKv>;

        fn name(&self) -> &'static str {
            "articles"
        }

        fn manager(&self) -> &Self::Manager {
            &self.manager
        }

        async fn statements(&self, article: &Article) -> Result<Vec<BoxedStatement<KvBatch>>, DbError> {
            let article = article.clone();
            let upsert = Statement::new(
                SingleResult::<usize>::new(),
                move |batch: &mut KvBatch, written: &SingleResult<usize>| {
                    Box::pin(async move {
                        batch.set_json(&format!("article:{}", article.id), &article)?;
                        written.set(1);
                        Ok(())
                    })
                },
            );
            Ok(vec![Box::new(upsert)])
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        published: AtomicUsize,
        fail: AtomicBool,
    }

    impl Publisher for RecordingPublisher {
        async fn publish(&self, _article_id: ArticleId) -> Result<(), SyncError> {
            if self.fail.swap(false, Ordering::SeqCst) {
                return Err(SyncError::Publish {
                    message: "broker unavailable".to_owned(),
                });
            }
            self.published.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Harness {
        orchestrator:
            SyncOrchestrator<MemorySource, RowProjection, TagProjection<MemoryKv>, RecordingPublisher>,
        articles: Arc<ConnectionRegistry<MemoryKv>>,
        tags: Arc<ConnectionRegistry<MemoryKv>>,
    }

    impl Harness {
        fn new(source: MemorySource) -> Self {
            let articles = Arc::new(ConnectionRegistry::with_connection(MemoryKv::new()));
            let tags = Arc::new(ConnectionRegistry::with_connection(MemoryKv::new()));
            let orchestrator = SyncOrchestrator::new(
                source,
                RowProjection {
                    manager: RelationalManager::new(Arc::clone(&articles)),
                },
                TagProjection::new(BatchManager::new(Arc::clone(&tags))),
                RecordingPublisher::default(),
            );
            Self {
                orchestrator,
                articles,
                tags,
            }
        }

        fn articles(&self) -> Arc<MemoryKv> {
            self.articles.get().unwrap()
        }

        fn tags(&self) -> Arc<MemoryKv> {
            self.tags.get().unwrap()
        }

        fn published(&self) -> usize {
            self.orchestrator.publisher.published.load(Ordering::SeqCst)
        }
    }

    fn history_for(article_id: ArticleId) -> MemorySource {
        let source = MemorySource::default();
        source.push(ArticleEvent::new(article_id).with_title("A"));
        source.push(ArticleEvent::new(article_id).with_attach(["x"]));
        source.push(
            ArticleEvent::new(article_id)
                .with_detach(["x"])
                .with_attach(["y"]),
        );
        source
    }

    #[tokio::test]
    async fn sync_folds_projects_and_publishes() {
        let article_id = ArticleId::new();
        let harness = Harness::new(history_for(article_id));

        let synced = harness.orchestrator.sync(article_id).await;

        let article = synced.unwrap();
        assert_eq!(article.title, "A");
        assert_eq!(article.tags, BTreeSet::from(["y".to_owned()]));

        let stored = harness.articles().get(&format!("article:{article_id}"));
        let stored: Article = serde_json::from_str(&stored.unwrap()).unwrap();
        assert_eq!(stored, article);

        let tags = harness.tags();
        assert!(tags.contains_key(&tag_key("y")));
        assert!(!tags.contains_key(&tag_key("x")), "folded away before it was ever projected");
        assert_eq!(tags.commit_count(), 1);
        assert_eq!(harness.published(), 1);
    }

    #[tokio::test]
    async fn empty_history_touches_nothing() {
        let harness = Harness::new(MemorySource::default());
        let article_id = ArticleId::new();

        let outcome = harness.orchestrator.sync(article_id).await;

        assert!(matches!(outcome, Err(SyncError::EmptyHistory { article_id: id }) if id == article_id));
        assert_eq!(harness.articles().commit_count(), 0);
        assert_eq!(harness.tags().commit_count(), 0);
        assert_eq!(harness.published(), 0);
    }

    #[tokio::test]
    async fn partial_failure_keeps_the_committed_store_and_retry_converges() {
        let article_id = ArticleId::new();
        let harness = Harness::new(history_for(article_id));
        harness.tags().fail_next_commit();

        let first = harness.orchestrator.sync(article_id).await;

        assert!(matches!(first, Err(SyncError::Projection { store: "tags", .. })));
        assert_eq!(harness.articles().commit_count(), 1, "store A is not undone");
        assert!(!harness.tags().contains_key(&tag_key("y")));
        assert_eq!(harness.published(), 0);

        let retry = harness.orchestrator.sync(article_id).await;

        retry.unwrap();
        assert!(harness.tags().contains_key(&tag_key("y")));
        assert_eq!(harness.published(), 1);
        let stored = harness.articles().get(&format!("article:{article_id}"));
        let stored: Article = serde_json::from_str(&stored.unwrap()).unwrap();
        assert_eq!(stored.tags, BTreeSet::from(["y".to_owned()]));
    }

    #[tokio::test]
    async fn publish_failure_fails_the_sync_after_both_commits() {
        let article_id = ArticleId::new();
        let harness = Harness::new(history_for(article_id));
        harness
            .orchestrator
            .publisher
            .fail
            .store(true, Ordering::SeqCst);

        let outcome = harness.orchestrator.sync(article_id).await;

        assert!(matches!(outcome, Err(SyncError::Publish { .. })));
        assert_eq!(harness.articles().commit_count(), 1);
        assert_eq!(harness.tags().commit_count(), 1);
        assert_eq!(harness.published(), 0);
    }

    #[tokio::test]
    async fn orphaned_tags_are_collected_on_a_later_sync() {
        let article_id = ArticleId::new();
        let source = MemorySource::default();
        source.push(ArticleEvent::new(article_id).with_title("A").with_tags(["x", "y"]));
        let harness = Harness::new(source);

        harness.orchestrator.sync(article_id).await.unwrap();
        assert!(harness.tags().contains_key(&tag_key("x")));

        harness
            .orchestrator
            .source()
            .push(ArticleEvent::new(article_id).with_detach(["x"]));
        harness.orchestrator.sync(article_id).await.unwrap();

        let tags = harness.tags();
        assert!(!tags.contains_key(&tag_key("x")));
        assert!(!tags.contains_key(&tag_articles_key("x")));
        assert!(tags.contains_key(&tag_key("y")));
        assert_eq!(harness.published(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_sync_times_out() {
        let article_id = ArticleId::new();
        let source = history_for(article_id);
        let source = MemorySource {
            stall: true,
            ..source
        };
        let harness = Harness::new(source);
        let orchestrator = SyncOrchestrator {
            timeout: Duration::from_millis(200),
            ..harness.orchestrator
        };

        let outcome = orchestrator.sync(article_id).await;

        assert!(matches!(outcome, Err(SyncError::Timeout { .. })));
        assert_eq!(orchestrator.publisher.published.load(Ordering::SeqCst), 0);
    }

    /// Fails while building its statements, after `delay`.
    struct SlowFailure {
        name: &'static str,
        delay: Duration,
        manager: RelationalManager<MemoryKv>,
    }

    impl SlowFailure {
        fn new(name: &'static str, delay_ms: u64) -> Self {
            Self {
                name,
                delay: Duration::from_millis(delay_ms),
                manager: RelationalManager::new(Arc::new(ConnectionRegistry::with_connection(
                    MemoryKv::new(),
                ))),
            }
        }
    }

    impl Projection for SlowFailure {
        type Manager = RelationalManager<MemoryKv>;

        fn name(&self) -> &'static str {
            self.name
        }

        fn manager(&self) -> &Self::Manager {
            &self.manager
        }

        async fn statements(&self, _: &Article) -> Result<Vec<BoxedStatement<KvBatch>>, DbError> {
            tokio::time::sleep(self.delay).await;
            Err(DbError::KeyNotFound(self.name.to_owned()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn earlier_failure_wins_when_both_stores_fail() {
        let article_id = ArticleId::new();
        for (a_ms, b_ms, expected) in [(50, 10, "b"), (10, 50, "a")] {
            let orchestrator = SyncOrchestrator::new(
                history_for(article_id),
                SlowFailure::new("a", a_ms),
                SlowFailure::new("b", b_ms),
                RecordingPublisher::default(),
            );

            let outcome = orchestrator.sync(article_id).await;

            assert!(
                matches!(outcome, Err(SyncError::Projection { store, .. }) if store == expected),
                "expected store {expected} to be reported"
            );
            assert_eq!(orchestrator.publisher.published.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn first_failure_prefers_the_lower_rank() {
        let failed = |store| Err(SyncError::projection(store, DbError::TransactionClosed));

        assert!(first_failure((0, Ok(())), (1, Ok(()))).is_ok());
        assert!(matches!(
            first_failure((1, failed("a")), (0, failed("b"))),
            Err(SyncError::Projection { store: "b", .. })
        ));
        assert!(matches!(
            first_failure((0, failed("a")), (1, failed("b"))),
            Err(SyncError::Projection { store: "a", .. })
        ));
        assert!(matches!(
            first_failure((0, Ok(())), (1, failed("b"))),
            Err(SyncError::Projection { store: "b", .. })
        ));
    }
}
