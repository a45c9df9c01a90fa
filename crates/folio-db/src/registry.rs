//! Connection registry.
//!
//! One registry per store is built at process start and shared by
//! reference (usually behind an [`Arc`]) with every component that needs the
//! connection. Tests build their own registries instead of touching any
//! process-wide state.

use std::sync::{Arc, PoisonError, RwLock};

use crate::error::DbError;

/// Lock-guarded slot holding the live connection for one store.
#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    slot: RwLock<Option<Arc<C>>>,
}

impl<C> ConnectionRegistry<C> {
    /// An empty registry. [`ConnectionRegistry::get`] fails until
    /// [`ConnectionRegistry::initialize`] is called.
    pub const fn new() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }

    /// A registry that already holds `connection`.
    pub fn with_connection(connection: C) -> Self {
        Self {
            slot: RwLock::new(Some(Arc::new(connection))),
        }
    }

    /// The live connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::ConnectionNotInitialized`] when the registry is
    /// empty.
    pub fn get(&self) -> Result<Arc<C>, DbError> {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(Arc::clone)
            .ok_or(DbError::ConnectionNotInitialized)
    }

    /// Install `connection` unless one is already installed.
    ///
    /// Returns `false` (and leaves the existing connection in place) when
    /// the registry was already initialized.
    pub fn initialize(&self, connection: C) -> bool {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            tracing::warn!("connection registry already initialized, keeping existing connection");
            return false;
        }
        *slot = Some(Arc::new(connection));
        tracing::debug!("connection registry initialized");
        true
    }

    /// Drop the installed connection so the registry can be initialized
    /// again.
    pub fn invalidate(&self) {
        let mut slot = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        if slot.take().is_some() {
            tracing::debug!("connection registry invalidated");
        }
    }

    /// Whether a connection is installed.
    pub fn is_initialized(&self) -> bool {
        self.slot
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}
