//! Redis-backed store. One multiplexed connection manager is shared by all
//! callers; it reconnects on its own after a dropped connection.

use crate::KvStore;
use async_trait::async_trait;
use flagline_core::config::StoreConfig;
use flagline_core::{FlagError, FlagResult};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info};

fn store_err(err: redis::RedisError) -> FlagError {
    metrics::counter!("store.redis.error").increment(1);
    FlagError::Store(err.to_string())
}

pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

impl RedisStore {
    /// Connect to the first configured Redis URL and verify it answers PING.
    pub async fn new(config: &StoreConfig) -> FlagResult<Self> {
        let url = config
            .urls
            .first()
            .cloned()
            .unwrap_or_else(|| "redis://localhost:6379".to_string());

        info!(url = %url, "Connecting to Redis");

        let client = redis::Client::open(url.as_str()).map_err(store_err)?;
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        let mut conn = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| {
                FlagError::Store(format!(
                    "timed out connecting to {url} after {}ms",
                    config.connect_timeout_ms
                ))
            })?
            .map_err(store_err)?;

        let pong: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        info!(response = %pong, "Redis connection established");

        Ok(Self {
            conn,
            prefix: config.key_prefix.clone(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

#[async_trait]
impl KvStore for RedisStore {
    async fn get_hash(&self, key: &str) -> FlagResult<Option<HashMap<String, String>>> {
        let mut conn = self.conn.clone();
        let fields: HashMap<String, String> =
            conn.hgetall(self.key(key)).await.map_err(store_err)?;
        if fields.is_empty() {
            debug!(key = key, "Hash not found");
            return Ok(None);
        }
        Ok(Some(fields))
    }

    async fn set_hash(&self, key: &str, fields: &HashMap<String, String>) -> FlagResult<()> {
        // HSET with no field/value pairs is a protocol error.
        if fields.is_empty() {
            return Ok(());
        }
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut conn = self.conn.clone();
        conn.hset_multiple::<_, _, _, ()>(self.key(key), items.as_slice())
            .await
            .map_err(store_err)
    }

    async fn hash_len(&self, key: &str) -> FlagResult<u64> {
        let mut conn = self.conn.clone();
        conn.hlen(self.key(key)).await.map_err(store_err)
    }

    async fn delete(&self, key: &str) -> FlagResult<()> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(self.key(key)).await.map_err(store_err)
    }

    async fn exists(&self, key: &str) -> FlagResult<bool> {
        let mut conn = self.conn.clone();
        conn.exists(self.key(key)).await.map_err(store_err)
    }

    async fn add_to_set(&self, key: &str, member: &str) -> FlagResult<()> {
        let mut conn = self.conn.clone();
        conn.sadd::<_, _, ()>(self.key(key), member)
            .await
            .map_err(store_err)
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> FlagResult<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(self.key(key), member)
            .await
            .map_err(store_err)
    }

    async fn members_of(&self, key: &str) -> FlagResult<HashSet<String>> {
        let mut conn = self.conn.clone();
        conn.smembers(self.key(key)).await.map_err(store_err)
    }

    async fn get(&self, key: &str) -> FlagResult<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(self.key(key)).await.map_err(store_err)
    }

    async fn set(&self, key: &str, value: &str) -> FlagResult<()> {
        let mut conn = self.conn.clone();
        conn.set::<_, _, ()>(self.key(key), value)
            .await
            .map_err(store_err)
    }

    async fn list_push(&self, key: &str, value: &str) -> FlagResult<()> {
        let mut conn = self.conn.clone();
        conn.rpush::<_, _, ()>(self.key(key), value)
            .await
            .map_err(store_err)
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> FlagResult<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.lrange(self.key(key), start, stop)
            .await
            .map_err(store_err)
    }
}
