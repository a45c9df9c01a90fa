//! Key-value write batches.
//!
//! The key-value store has no multi-statement transactions. Statements
//! against it only stage writes into a [`KvBatch`]; the backend submits the
//! whole batch in one all-or-nothing call on commit.

use std::collections::BTreeSet;
use std::future::Future;

use serde::Serialize;

use crate::error::DbError;

/// One staged key-value write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    /// Store `value` at `key`, replacing any previous value.
    Set {
        /// Target key.
        key: String,
        /// Serialized value.
        value: String,
    },
    /// Remove `key` whatever its type.
    Delete {
        /// Target key.
        key: String,
    },
    /// Add `member` to the set at `key`.
    SetAdd {
        /// Target set key.
        key: String,
        /// Member to add.
        member: String,
    },
    /// Remove `member` from the set at `key`.
    SetRemove {
        /// Target set key.
        key: String,
        /// Member to remove.
        member: String,
    },
}

/// Ordered writes waiting for a single batch submission.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KvBatch {
    writes: Vec<KvWrite>,
}

impl KvBatch {
    /// Stage `value` serialized as JSON at `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Serialization`] if serialization fails.
    pub fn set_json<T: Serialize>(&mut self, key: &str, value: &T) -> Result<(), DbError> {
        let value = serde_json::to_string(value)?;
        self.set_raw(key, value);
        Ok(())
    }

    /// Stage a raw string value at `key`.
    pub fn set_raw(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.writes.push(KvWrite::Set {
            key: key.into(),
            value: value.into(),
        });
    }

    /// Stage deletion of `key`.
    pub fn delete(&mut self, key: impl Into<String>) {
        self.writes.push(KvWrite::Delete { key: key.into() });
    }

    /// Stage adding `member` to the set at `key`.
    pub fn set_add(&mut self, key: impl Into<String>, member: impl Into<String>) {
        self.writes.push(KvWrite::SetAdd {
            key: key.into(),
            member: member.into(),
        });
    }

    /// Stage removing `member` from the set at `key`.
    pub fn set_remove(&mut self, key: impl Into<String>, member: impl Into<String>) {
        self.writes.push(KvWrite::SetRemove {
            key: key.into(),
            member: member.into(),
        });
    }

    /// Staged writes in submission order.
    pub fn writes(&self) -> &[KvWrite] {
        &self.writes
    }

    /// Number of staged writes.
    pub fn len(&self) -> usize {
        self.writes.len()
    }

    /// Whether nothing has been staged.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    /// Consume the batch, yielding its writes in order.
    pub fn into_writes(self) -> Vec<KvWrite> {
        self.writes
    }
}

/// Reads against the key-value store, made outside any batch.
pub trait KvRead: Send + Sync {
    /// Members of the set at `key`; empty when the key does not exist.
    fn set_members(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<BTreeSet<String>, DbError>> + Send;

    /// The raw value at `key`, if any.
    fn get_raw(&self, key: &str) -> impl Future<Output = Result<Option<String>, DbError>> + Send;
}
