//! Change records for the article aggregate.
//!
//! Every mutation of an article on the write side produces exactly one
//! [`ArticleEvent`]. The full, ordered sequence of events for one article is
//! its history; folding that history yields the current [`Article`].
//!
//! [`Article`]: crate::article::Article

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::ids::{ArticleId, EventId};

/// One change-data-capture record describing a single article mutation.
///
/// Scalar fields are optional: `None` means "this event did not touch the
/// field", never "clear the field".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ArticleEvent {
    /// Event identifier. UUID v7, so ascending order is history order.
    pub id: EventId,
    /// The article this event belongs to.
    pub article_id: ArticleId,
    /// New title, if the event changed it.
    #[serde(default)]
    pub title: Option<String>,
    /// New body content, if the event changed it.
    #[serde(default)]
    pub body: Option<String>,
    /// New thumbnail URL, if the event changed it.
    #[serde(default)]
    pub thumbnail: Option<String>,
    /// Tags carried by a creation record.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Tags attached by this event.
    #[serde(default)]
    pub attach_tags: Vec<String>,
    /// Tags detached by this event. Wins over `tags` and `attach_tags` of
    /// the same event.
    #[serde(default)]
    pub detach_tags: Vec<String>,
    /// New visibility, if the event changed it.
    #[serde(default)]
    pub is_visible: Option<bool>,
    /// Wall-clock time the event was recorded.
    pub created_at: DateTime<Utc>,
}

impl ArticleEvent {
    /// Create an empty event for `article_id` with a fresh time-ordered id.
    ///
    /// Use the `with_*` builders to fill in the fields the mutation touched.
    pub fn new(article_id: ArticleId) -> Self {
        Self {
            id: EventId::new(),
            article_id,
            title: None,
            body: None,
            thumbnail: None,
            tags: Vec::new(),
            attach_tags: Vec::new(),
            detach_tags: Vec::new(),
            is_visible: None,
            created_at: Utc::now(),
        }
    }

    /// Set the title carried by this event.
    #[must_use]
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the body carried by this event.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the thumbnail carried by this event.
    #[must_use]
    pub fn with_thumbnail(mut self, thumbnail: impl Into<String>) -> Self {
        self.thumbnail = Some(thumbnail.into());
        self
    }

    /// Set the creation tag list.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tags attached by this event.
    #[must_use]
    pub fn with_attach<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attach_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tags detached by this event.
    #[must_use]
    pub fn with_detach<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.detach_tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the visibility carried by this event.
    #[must_use]
    pub const fn with_visibility(mut self, visible: bool) -> Self {
        self.is_visible = Some(visible);
        self
    }
}
