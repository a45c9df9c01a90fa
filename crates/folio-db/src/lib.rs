//! Transactional statement execution for the Folio read-model
//! (`PostgreSQL` + `Dragonfly`).
//!
//! A [`Statement`] is a single-use unit of work bound to a result container.
//! It either runs on its own, opening and committing its own transaction,
//! or is handed to a transaction actor that owns one backend handle and
//! serializes every statement, commit and rollback sent to it.
//!
//! # Architecture
//!
//! ```text
//! Statement --execute------------------------> Backend (own transaction)
//!     |
//!     +--Transaction::execute_statement--> actor --> Backend handle
//!                                            |-- RelationalManager (PostgreSQL)
//!                                            +-- BatchManager      (Dragonfly MULTI/EXEC)
//! ```
//!
//! # Modules
//!
//! - [`result`] -- `SingleResult` / `MultipleResult` containers
//! - [`statement`] -- Single-use statements and their execution options
//! - [`backend`] -- The backend seam (`begin` / `commit` / `rollback`)
//! - [`registry`] -- Lazily initialized connection registry
//! - [`transaction`] -- Relational and batch transaction actors
//! - [`postgres`] -- `PostgreSQL` connection pool and backend
//! - [`dragonfly`] -- `Dragonfly` connection and batch backend
//! - [`kv`] -- Key-value write batches and reads
//! - [`event_store`] -- Append-only article change records
//! - [`article_store`] -- Store A: articles and their tag associations
//! - [`tag_store`] -- Store B: tag rows and tag-to-article indexes
//! - [`error`] -- Shared error types

pub mod article_store;
pub mod backend;
pub mod dragonfly;
pub mod error;
pub mod event_store;
pub mod kv;
#[cfg(any(test, feature = "test-util"))]
pub mod memory;
pub mod postgres;
pub mod registry;
pub mod result;
pub mod statement;
pub mod tag_store;
pub mod transaction;

// Re-export primary types for convenience.
pub use article_store::{ArticlePage, ArticleRow, ArticleStore, assemble_page};
pub use backend::Backend;
pub use dragonfly::DragonflyPool;
pub use error::DbError;
pub use event_store::{EventRow, EventStore};
pub use kv::{KvBatch, KvRead, KvWrite};
#[cfg(any(test, feature = "test-util"))]
pub use memory::MemoryKv;
pub use postgres::{PgTx, PostgresConfig, PostgresPool};
pub use registry::ConnectionRegistry;
pub use result::{MultipleResult, SingleResult};
pub use statement::{BoxedStatement, Executable, ExecuteOptions, Statement};
pub use tag_store::{TagPlan, TagRow, TagStore};
pub use transaction::{
    BatchManager, Outcome, RelationalManager, Subscription, Transaction, TransactionManager,
};
