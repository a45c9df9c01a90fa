//! Cursor pagination descriptor for read-model listings.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// Default page size when a caller does not specify one.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;

/// Upper bound on page size.
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Which way a page is read relative to its cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
#[serde(rename_all = "snake_case")]
pub enum PageDirection {
    /// Items after the cursor.
    Next,
    /// Items before the cursor.
    Previous,
}

/// A page request: cursor token, limit and exactly one paging direction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Pagination {
    /// Opaque cursor token. `None` starts from the edge of the listing.
    pub cursor: Option<String>,
    /// Maximum number of items in the page.
    pub limit: u32,
    /// Paging direction.
    pub direction: PageDirection,
}

impl Pagination {
    /// Forward paging from the start of the listing.
    pub fn next(limit: u32) -> Self {
        Self {
            cursor: None,
            limit: clamp_limit(limit),
            direction: PageDirection::Next,
        }
    }

    /// Backward paging from the end of the listing.
    pub fn previous(limit: u32) -> Self {
        Self {
            cursor: None,
            limit: clamp_limit(limit),
            direction: PageDirection::Previous,
        }
    }

    /// Continue from `cursor`.
    #[must_use]
    pub fn with_cursor(mut self, cursor: impl Into<String>) -> Self {
        self.cursor = Some(cursor.into());
        self
    }

    /// `true` when paging forward.
    pub fn is_next(&self) -> bool {
        self.direction == PageDirection::Next
    }

    /// `true` when paging backward.
    pub fn is_previous(&self) -> bool {
        self.direction == PageDirection::Previous
    }

    /// Number of rows to fetch: one more than the limit, so the extra row
    /// tells whether another page exists.
    pub const fn fetch_limit(&self) -> u32 {
        self.limit.saturating_add(1)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::next(DEFAULT_PAGE_LIMIT)
    }
}

/// Page boundaries returned alongside a listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct PageInfo {
    /// Another page exists after this one.
    pub has_next_page: bool,
    /// Another page exists before this one.
    pub has_previous_page: bool,
    /// Cursor of the first item in the page.
    pub start_cursor: Option<String>,
    /// Cursor of the last item in the page.
    pub end_cursor: Option<String>,
}

const fn clamp_limit(limit: u32) -> u32 {
    if limit == 0 {
        DEFAULT_PAGE_LIMIT
    } else if limit > MAX_PAGE_LIMIT {
        MAX_PAGE_LIMIT
    } else {
        limit
    }
}
