#![warn(clippy::unwrap_used)]

//! Key/value + set + list store used by the targeting and experiment engines.
//!
//! The engines only ever see `Arc<dyn KvStore>`; the concrete backend is
//! chosen once at startup by [`connect`].

pub mod codec;
pub mod memory;
pub mod redis_store;

use async_trait::async_trait;
use flagline_core::config::{StoreBackend, StoreConfig};
use flagline_core::FlagResult;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

pub use crate::memory::MemoryStore;
pub use crate::redis_store::RedisStore;

/// Redis-shaped storage surface. Single-key operations are expected to be
/// atomic; nothing here spans keys.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// All fields of a hash, `None` when the key does not exist.
    async fn get_hash(&self, key: &str) -> FlagResult<Option<HashMap<String, String>>>;

    /// Merge `fields` into the hash at `key` (HSET semantics).
    async fn set_hash(&self, key: &str, fields: &HashMap<String, String>) -> FlagResult<()>;

    /// Number of fields in a hash, zero when the key does not exist (HLEN).
    async fn hash_len(&self, key: &str) -> FlagResult<u64>;

    async fn delete(&self, key: &str) -> FlagResult<()>;

    async fn exists(&self, key: &str) -> FlagResult<bool>;

    async fn add_to_set(&self, key: &str, member: &str) -> FlagResult<()>;

    async fn remove_from_set(&self, key: &str, member: &str) -> FlagResult<()>;

    async fn members_of(&self, key: &str) -> FlagResult<HashSet<String>>;

    async fn get(&self, key: &str) -> FlagResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> FlagResult<()>;

    /// Append to the tail of a list.
    async fn list_push(&self, key: &str, value: &str) -> FlagResult<()>;

    /// Inclusive range with Redis index rules (`0, -1` is the whole list).
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> FlagResult<Vec<String>>;
}

/// Build the store selected by configuration.
pub async fn connect(config: &StoreConfig) -> FlagResult<Arc<dyn KvStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::with_prefix(&config.key_prefix))),
        StoreBackend::Redis => Ok(Arc::new(RedisStore::new(config).await?)),
    }
}
