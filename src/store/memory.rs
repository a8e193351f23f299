//! In-memory store backend using `DashMap`.
//!
//! The default backend for tests and embedded use - data is lost on process
//! restart. Every key holds exactly one collection kind; commands against a
//! key of another kind fail with [`Error::WrongType`].

use super::Store;
use crate::{Error, Result};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

/// One keyed collection.
#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    List(Vec<String>),
    Counter(i64),
}

/// In-memory key-value store over a lock-free concurrent hashmap.
///
/// Thread-safe; single-field mutations run under the key's entry lock, so
/// concurrent increments never lose updates.
///
/// # Example
///
/// ```rust
/// use repartir::store::{MemoryStore, Store};
///
/// # async fn example() -> repartir::Result<()> {
/// let store = MemoryStore::new();
/// store.set_add("experiments", &["button_color".to_string()]).await?;
/// assert!(store.set_contains("experiments", "button_color").await?);
/// # Ok(())
/// # }
/// ```
pub struct MemoryStore {
    data: DashMap<String, Value>,
}

impl MemoryStore {
    /// Create a new in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
        }
    }

    /// Create with pre-allocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: DashMap::with_capacity(capacity),
        }
    }

    /// Number of live keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check whether the store holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Drop every key.
    pub fn clear(&self) {
        self.data.clear();
    }

    fn with_hash_mut<T>(
        &self,
        key: &str,
        f: impl FnOnce(&mut HashMap<String, String>) -> Result<T>,
    ) -> Result<T> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        match entry.value_mut() {
            Value::Hash(hash) => f(hash),
            _ => Err(Error::WrongType(key.to_string())),
        }
    }

    fn read_hash<T>(
        &self,
        key: &str,
        f: impl FnOnce(&HashMap<String, String>) -> T,
        absent: T,
    ) -> Result<T> {
        match self.data.get(key) {
            Some(entry) => match entry.value() {
                Value::Hash(hash) => Ok(f(hash)),
                _ => Err(Error::WrongType(key.to_string())),
            },
            None => Ok(absent),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.read_hash(key, |hash| hash.get(field).cloned(), None)
    }

    async fn hash_set(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.with_hash_mut(key, |hash| {
            hash.insert(field.to_string(), value.to_string());
            Ok(())
        })
    }

    async fn hash_set_nx(&self, key: &str, field: &str, value: &str) -> Result<bool> {
        self.with_hash_mut(key, |hash| {
            if hash.contains_key(field) {
                Ok(false)
            } else {
                hash.insert(field.to_string(), value.to_string());
                Ok(true)
            }
        })
    }

    async fn hash_incr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let key_owned = key.to_string();
        self.with_hash_mut(key, |hash| {
            let current = match hash.get(field) {
                Some(raw) => raw
                    .parse::<i64>()
                    .map_err(|_| Error::WrongType(key_owned.clone()))?,
                None => 0,
            };
            let next = current + delta;
            hash.insert(field.to_string(), next.to_string());
            Ok(next)
        })
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>> {
        self.read_hash(key, Clone::clone, HashMap::new())
    }

    async fn hash_del(&self, key: &str, field: &str) -> Result<()> {
        if self.data.contains_key(key) {
            self.with_hash_mut(key, |hash| {
                hash.remove(field);
                Ok(())
            })
        } else {
            Ok(())
        }
    }

    async fn set_add(&self, key: &str, members: &[String]) -> Result<()> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(HashSet::new()));
        match entry.value_mut() {
            Value::Set(set) => {
                set.extend(members.iter().cloned());
                Ok(())
            }
            _ => Err(Error::WrongType(key.to_string())),
        }
    }

    async fn set_contains(&self, key: &str, member: &str) -> Result<bool> {
        match self.data.get(key) {
            Some(entry) => match entry.value() {
                Value::Set(set) => Ok(set.contains(member)),
                _ => Err(Error::WrongType(key.to_string())),
            },
            None => Ok(false),
        }
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<()> {
        if let Some(mut entry) = self.data.get_mut(key) {
            match entry.value_mut() {
                Value::Set(set) => {
                    set.remove(member);
                }
                _ => return Err(Error::WrongType(key.to_string())),
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>> {
        match self.data.get(key) {
            Some(entry) => match entry.value() {
                Value::Set(set) => Ok(set.iter().cloned().collect()),
                _ => Err(Error::WrongType(key.to_string())),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn list_push(&self, key: &str, value: &str) -> Result<()> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::List(Vec::new()));
        match entry.value_mut() {
            Value::List(list) => {
                list.push(value.to_string());
                Ok(())
            }
            _ => Err(Error::WrongType(key.to_string())),
        }
    }

    async fn list_range(&self, key: &str) -> Result<Vec<String>> {
        match self.data.get(key) {
            Some(entry) => match entry.value() {
                Value::List(list) => Ok(list.clone()),
                _ => Err(Error::WrongType(key.to_string())),
            },
            None => Ok(Vec::new()),
        }
    }

    async fn counter_incr(&self, key: &str) -> Result<i64> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Counter(0));
        match entry.value_mut() {
            Value::Counter(n) => {
                *n += 1;
                Ok(*n)
            }
            _ => Err(Error::WrongType(key.to_string())),
        }
    }

    async fn counter_get(&self, key: &str) -> Result<Option<i64>> {
        match self.data.get(key) {
            Some(entry) => match entry.value() {
                Value::Counter(n) => Ok(Some(*n)),
                _ => Err(Error::WrongType(key.to_string())),
            },
            None => Ok(None),
        }
    }

    async fn rename(&self, from: &str, to: &str) -> Result<bool> {
        match self.data.remove(from) {
            Some((_, value)) => {
                self.data.insert(to.to_string(), value);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.data.contains_key(key))
    }
}
