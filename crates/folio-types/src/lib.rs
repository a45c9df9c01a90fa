//! Shared type definitions for the Folio article read-model.
//!
//! Types defined here are shared by the data layer and the sync service,
//! and flow downstream to `TypeScript` via `ts-rs` for read-side clients.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for article and event identifiers
//! - [`event`] -- Change records produced by article mutations
//! - [`article`] -- The folded article aggregate
//! - [`pagination`] -- Cursor pagination descriptor and page info

pub mod article;
pub mod event;
pub mod ids;
pub mod pagination;

// Re-export all public types at crate root for convenience.
pub use article::Article;
pub use event::ArticleEvent;
pub use ids::{ArticleId, EventId};
pub use pagination::{PageDirection, PageInfo, Pagination};
