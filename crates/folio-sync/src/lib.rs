//! Sync service for the Folio article read-model.
//!
//! Article mutations arrive as change records. For each one the service
//! rebuilds the article from its full history and projects it into two
//! read stores: the article-keyed store in `PostgreSQL` and the tag-keyed
//! store in `Dragonfly`. A change notification goes out once both have
//! committed.
//!
//! # Modules
//!
//! - [`orchestrator`] -- The Sync Orchestrator
//! - [`projection`] -- Store A and Store B projections
//! - [`source`] -- Where change records are read from
//! - [`publish`] -- Change notification over NATS
//! - [`config`] -- `folio-config.yaml` loading
//! - [`error`] -- Sync and application error types

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod projection;
pub mod publish;
pub mod source;

pub use config::{ConfigError, LogFormat, SyncConfig};
pub use error::{AppError, SyncError};
pub use orchestrator::SyncOrchestrator;
pub use projection::{ArticleProjection, Projection, TagProjection, project};
pub use publish::{NatsPublisher, Publisher};
pub use source::{EventSource, PgEventSource};
