//! Error types for the sync service.
//!
//! [`SyncError`] is what one `sync` call fails with. [`AppError`] is the
//! top-level error of the `folio-sync` binary, wrapping every failure mode
//! of startup.

use std::time::Duration;

use folio_db::DbError;
use folio_types::ArticleId;

use crate::config::ConfigError;

/// Failure of one sync of one article.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Loading the history or starting a transaction failed.
    #[error("data layer error: {0}")]
    Db(#[from] DbError),

    /// The article has no change records.
    #[error("no change records for article {article_id}")]
    EmptyHistory {
        /// The article that was asked for.
        article_id: ArticleId,
    },

    /// Projecting into one of the stores failed. Other stores may have
    /// committed.
    #[error("projection into {store} failed: {source}")]
    Projection {
        /// Name of the failing projection.
        store: &'static str,
        /// The underlying failure.
        #[source]
        source: DbError,
    },

    /// Both stores committed but the change notification was not sent.
    #[error("publish failed: {message}")]
    Publish {
        /// Description of the messaging failure.
        message: String,
    },

    /// The sync did not finish within its time budget.
    #[error("sync of article {article_id} timed out after {after:?}")]
    Timeout {
        /// The article being synced.
        article_id: ArticleId,
        /// The configured budget.
        after: Duration,
    },
}

impl SyncError {
    /// Attribute `source` to the projection named `store`.
    pub const fn projection(store: &'static str, source: DbError) -> Self {
        Self::Projection { store, source }
    }
}

/// Top-level error for the `folio-sync` binary.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: ConfigError,
    },

    /// Connecting to or migrating a store failed.
    #[error("database error: {source}")]
    Db {
        /// The underlying data layer error.
        #[from]
        source: DbError,
    },

    /// NATS connection or subscription failed.
    #[error("NATS error: {message}")]
    Nats {
        /// Description of the NATS failure.
        message: String,
    },
}
