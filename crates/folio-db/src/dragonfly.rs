//! `Dragonfly` (Redis-compatible) key-value backend.
//!
//! `Dragonfly` holds Store B, the tag index. It has no multi-statement
//! transactions: statements stage writes into a [`KvBatch`] and commit
//! submits the whole batch as one `MULTI`/`EXEC`.
//!
//! # Key Patterns
//!
//! | Pattern | Type | Description |
//! |---------|------|-------------|
//! | `tag:row:{name}` | JSON | Tag row |
//! | `tag:articles:{name}` | Set | Ids of articles carrying the tag |
//! | `article:{id}:tags` | Set | Tag names on an article (reverse index) |

use std::collections::BTreeSet;

use fred::prelude::*;
use serde::de::DeserializeOwned;

use crate::backend::Backend;
use crate::error::DbError;
use crate::kv::{KvBatch, KvRead, KvWrite};

/// Connection handle to a `Dragonfly` (Redis-compatible) instance.
#[derive(Clone)]
pub struct DragonflyPool {
    client: Client,
}

impl std::fmt::Debug for DragonflyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DragonflyPool").finish_non_exhaustive()
    }
}

impl DragonflyPool {
    /// Connect to `Dragonfly` at the given URL.
    ///
    /// The URL should follow the Redis URL scheme:
    /// `redis://host:port` or `redis://host:port/db`
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL cannot be parsed.
    /// Returns [`DbError::Dragonfly`] if the connection fails.
    pub async fn connect(url: &str) -> Result<Self, DbError> {
        let config = Config::from_url(url)
            .map_err(|e| DbError::Config(format!("Invalid Dragonfly URL: {e}")))?;

        let client = Builder::from_config(config).build()?;
        client.init().await?;

        tracing::info!("Connected to Dragonfly");
        Ok(Self { client })
    }

    /// Read the value at `key` and deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::KeyNotFound`] if the key does not exist.
    /// Returns [`DbError::Serialization`] if deserialization fails.
    /// Returns [`DbError::Dragonfly`] if the read fails.
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T, DbError> {
        let value: Option<String> = self.client.get(key).await?;
        value.map_or_else(
            || Err(DbError::KeyNotFound(key.to_owned())),
            |s| Ok(serde_json::from_str(&s)?),
        )
    }

    /// Flush all keys from the `Dragonfly` instance.
    ///
    /// **WARNING:** This deletes all data. Only use for testing.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Dragonfly`] if the flush fails.
    pub async fn flush_all(&self) -> Result<(), DbError> {
        let _: () = self.client.flushall(false).await?;
        Ok(())
    }
}

impl Backend for DragonflyPool {
    type Handle = KvBatch;

    async fn begin(&self) -> Result<KvBatch, DbError> {
        Ok(KvBatch::default())
    }

    async fn commit(&self, batch: KvBatch) -> Result<(), DbError> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        let trx = self.client.multi();
        for write in batch.into_writes() {
            let _: Value = match write {
                KvWrite::Set { key, value } => {
                    trx.set(key, value, None, None, false).await?
                }
                KvWrite::Delete { key } => trx.del(key).await?,
                KvWrite::SetAdd { key, member } => trx.sadd(key, member).await?,
                KvWrite::SetRemove { key, member } => trx.srem(key, member).await?,
            };
        }
        let _: Value = trx.exec(true).await?;
        tracing::debug!(writes = count, "Submitted Dragonfly batch");
        Ok(())
    }

    async fn rollback(&self, batch: KvBatch) -> Result<(), DbError> {
        tracing::debug!(writes = batch.len(), "Discarded Dragonfly batch");
        Ok(())
    }
}

impl KvRead for DragonflyPool {
    async fn set_members(&self, key: &str) -> Result<BTreeSet<String>, DbError> {
        let members: Vec<String> = self.client.smembers(key).await?;
        Ok(members.into_iter().collect())
    }

    async fn get_raw(&self, key: &str) -> Result<Option<String>, DbError> {
        Ok(self.client.get(key).await?)
    }
}
