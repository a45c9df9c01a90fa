//! The folded article aggregate.
//!
//! [`Article`] is never stored as-is. It is rebuilt from the event history
//! on every sync and then projected into the article-keyed and tag-keyed
//! read stores.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::event::ArticleEvent;
use crate::ids::ArticleId;

/// Current state of one article, produced by folding its history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Article {
    /// Aggregate identifier.
    pub id: ArticleId,
    /// Latest title (empty until an event sets one).
    pub title: String,
    /// Latest body content.
    pub body: String,
    /// Latest thumbnail URL.
    pub thumbnail: String,
    /// Tags currently attached to the article.
    pub tags: BTreeSet<String>,
    /// Whether the article is publicly visible.
    pub is_visible: bool,
}

impl Article {
    /// An article with no fields set yet.
    pub const fn empty(id: ArticleId) -> Self {
        Self {
            id,
            title: String::new(),
            body: String::new(),
            thumbnail: String::new(),
            tags: BTreeSet::new(),
            is_visible: false,
        }
    }

    /// Fold an ascending event history into the article's current state.
    ///
    /// Events belonging to another aggregate are skipped.
    pub fn fold<'a, I>(id: ArticleId, events: I) -> Self
    where
        I: IntoIterator<Item = &'a ArticleEvent>,
    {
        events
            .into_iter()
            .filter(|event| event.article_id == id)
            .fold(Self::empty(id), |mut article, event| {
                article.apply(event);
                article
            })
    }

    /// Apply one event on top of the current state.
    ///
    /// Present scalar fields overwrite, absent ones never do. The tag set
    /// becomes `(current ∪ tags ∪ attach) \ detach` for this event alone.
    pub fn apply(&mut self, event: &ArticleEvent) {
        if let Some(title) = &event.title {
            self.title.clone_from(title);
        }
        if let Some(body) = &event.body {
            self.body.clone_from(body);
        }
        if let Some(thumbnail) = &event.thumbnail {
            self.thumbnail.clone_from(thumbnail);
        }
        if let Some(visible) = event.is_visible {
            self.is_visible = visible;
        }

        self.tags
            .extend(event.tags.iter().chain(&event.attach_tags).cloned());
        for tag in &event.detach_tags {
            self.tags.remove(tag);
        }
    }
}
