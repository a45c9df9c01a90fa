//! In-memory key-value backend.
//!
//! Applies a [`KvBatch`] atomically under one lock and counts submissions,
//! so tests can assert how many all-or-nothing calls reached the store.
//! Available to other crates through the `test-util` feature.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::backend::Backend;
use crate::error::DbError;
use crate::kv::{KvBatch, KvRead, KvWrite};

/// Key-value store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryKv {
    state: Mutex<MemoryState>,
    commits: AtomicUsize,
    fail_next_commit: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryState {
    strings: BTreeMap<String, String>,
    sets: BTreeMap<String, BTreeSet<String>>,
}

impl MemoryState {
    fn apply(&mut self, write: KvWrite) {
        match write {
            KvWrite::Set { key, value } => {
                self.sets.remove(&key);
                self.strings.insert(key, value);
            }
            KvWrite::Delete { key } => {
                self.strings.remove(&key);
                self.sets.remove(&key);
            }
            KvWrite::SetAdd { key, member } => {
                self.strings.remove(&key);
                self.sets.entry(key).or_default().insert(member);
            }
            KvWrite::SetRemove { key, member } => {
                if let Some(set) = self.sets.get_mut(&key) {
                    set.remove(&member);
                    if set.is_empty() {
                        self.sets.remove(&key);
                    }
                }
            }
        }
    }
}

impl MemoryKv {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// String value at `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .strings
            .get(key)
            .cloned()
    }

    /// Members of the set at `key`.
    pub fn members(&self, key: &str) -> BTreeSet<String> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .sets
            .get(key)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `key` holds any value.
    pub fn contains_key(&self, key: &str) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.strings.contains_key(key) || state.sets.contains_key(key)
    }

    /// Number of batches successfully submitted.
    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Make the next batch submission fail without applying anything.
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }
}

impl Backend for MemoryKv {
    type Handle = KvBatch;

    async fn begin(&self) -> Result<KvBatch, DbError> {
        Ok(KvBatch::default())
    }

    async fn commit(&self, batch: KvBatch) -> Result<(), DbError> {
        if self.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(DbError::Config("injected batch submission failure".to_owned()));
        }
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        for write in batch.into_writes() {
            state.apply(write);
        }
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self, _batch: KvBatch) -> Result<(), DbError> {
        Ok(())
    }
}

impl KvRead for MemoryKv {
    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, DbError> {
        Ok(self.members(key))
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, DbError> {
        Ok(self.get(key))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_applies_the_whole_batch_once() {
        let kv = MemoryKv::new();
        let mut batch = kv.begin().await.unwrap();
        batch.set_raw("tag:rust", "{}");
        batch.set_add("tag:rust:articles", "a1");
        batch.set_add("tag:rust:articles", "a2");
        batch.set_remove("tag:rust:articles", "a1");

        kv.commit(batch).await.unwrap();

        assert_eq!(kv.commit_count(), 1);
        assert_eq!(kv.get("tag:rust").as_deref(), Some("{}"));
        assert_eq!(kv.members("tag:rust:articles"), BTreeSet::from(["a2".to_owned()]));
    }

    #[tokio::test]
    async fn injected_failure_applies_nothing() {
        let kv = MemoryKv::new();
        let mut batch = KvBatch::default();
        batch.set_raw("k", "v");
        kv.fail_next_commit();

        assert!(kv.commit(batch).await.is_err());
        assert_eq!(kv.commit_count(), 0);
        assert!(!kv.contains_key("k"));
    }
}
