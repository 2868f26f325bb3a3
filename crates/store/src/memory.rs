//! In-process store backed by DashMap for lock-free concurrent access.
//! Mirrors Redis key semantics closely enough to stand in for it in
//! development and tests: one keyspace, typed values, WRONGTYPE on misuse.

use crate::KvStore;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use flagline_core::{FlagError, FlagResult};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Value {
    String(String),
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(Vec<String>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::String(_) => "string",
            Value::Hash(_) => "hash",
            Value::Set(_) => "set",
            Value::List(_) => "list",
        }
    }
}

fn wrong_type(key: &str, found: &Value, wanted: &str) -> FlagError {
    FlagError::Store(format!(
        "WRONGTYPE key '{key}' holds a {} value, expected {wanted}",
        found.kind()
    ))
}

/// Concurrent in-memory keyspace.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Value>>,
    prefix: String,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prefix(prefix: &str) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            prefix: prefix.to_string(),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }
}

/// Resolve Redis-style inclusive indices against a list of `len` items.
fn normalize_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get_hash(&self, key: &str) -> FlagResult<Option<HashMap<String, String>>> {
        let key = self.key(key);
        match self.entries.get(&key) {
            Some(entry) => match entry.value() {
                Value::Hash(fields) => Ok(Some(fields.clone())),
                other => Err(wrong_type(&key, other, "hash")),
            },
            None => Ok(None),
        }
    }

    async fn set_hash(&self, key: &str, fields: &HashMap<String, String>) -> FlagResult<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let key = self.key(key);
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Value::Hash(existing) => {
                    existing.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
                    Ok(())
                }
                other => Err(wrong_type(&key, other, "hash")),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Value::Hash(fields.clone()));
                Ok(())
            }
        }
    }

    async fn hash_len(&self, key: &str) -> FlagResult<u64> {
        let key = self.key(key);
        match self.entries.get(&key) {
            Some(entry) => match entry.value() {
                Value::Hash(fields) => Ok(fields.len() as u64),
                other => Err(wrong_type(&key, other, "hash")),
            },
            None => Ok(0),
        }
    }

    async fn delete(&self, key: &str) -> FlagResult<()> {
        self.entries.remove(&self.key(key));
        Ok(())
    }

    async fn exists(&self, key: &str) -> FlagResult<bool> {
        Ok(self.entries.contains_key(&self.key(key)))
    }

    async fn add_to_set(&self, key: &str, member: &str) -> FlagResult<()> {
        let key = self.key(key);
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Value::Set(members) => {
                    members.insert(member.to_string());
                    Ok(())
                }
                other => Err(wrong_type(&key, other, "set")),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Value::Set(HashSet::from([member.to_string()])));
                Ok(())
            }
        }
    }

    async fn remove_from_set(&self, key: &str, member: &str) -> FlagResult<()> {
        let key = self.key(key);
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => {
                let now_empty = match occupied.get_mut() {
                    Value::Set(members) => {
                        members.remove(member);
                        members.is_empty()
                    }
                    other => return Err(wrong_type(&key, other, "set")),
                };
                // Redis drops a set once its last member is gone.
                if now_empty {
                    occupied.remove();
                }
                Ok(())
            }
            Entry::Vacant(_) => Ok(()),
        }
    }

    async fn members_of(&self, key: &str) -> FlagResult<HashSet<String>> {
        let key = self.key(key);
        match self.entries.get(&key) {
            Some(entry) => match entry.value() {
                Value::Set(members) => Ok(members.clone()),
                other => Err(wrong_type(&key, other, "set")),
            },
            None => Ok(HashSet::new()),
        }
    }

    async fn get(&self, key: &str) -> FlagResult<Option<String>> {
        let key = self.key(key);
        match self.entries.get(&key) {
            Some(entry) => match entry.value() {
                Value::String(value) => Ok(Some(value.clone())),
                other => Err(wrong_type(&key, other, "string")),
            },
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> FlagResult<()> {
        self.entries
            .insert(self.key(key), Value::String(value.to_string()));
        Ok(())
    }

    async fn list_push(&self, key: &str, value: &str) -> FlagResult<()> {
        let key = self.key(key);
        match self.entries.entry(key.clone()) {
            Entry::Occupied(mut occupied) => match occupied.get_mut() {
                Value::List(items) => {
                    items.push(value.to_string());
                    Ok(())
                }
                other => Err(wrong_type(&key, other, "list")),
            },
            Entry::Vacant(vacant) => {
                vacant.insert(Value::List(vec![value.to_string()]));
                Ok(())
            }
        }
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> FlagResult<Vec<String>> {
        let key = self.key(key);
        match self.entries.get(&key) {
            Some(entry) => match entry.value() {
                Value::List(items) => Ok(normalize_range(items.len(), start, stop)
                    .map(|(lo, hi)| items[lo..=hi].to_vec())
                    .unwrap_or_default()),
                other => Err(wrong_type(&key, other, "list")),
            },
            None => Ok(Vec::new()),
        }
    }
}
