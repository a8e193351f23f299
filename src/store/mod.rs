//! Persistent store abstraction for experiment bookkeeping.
//!
//! Provides the key-value command surface the experiment engine is built on:
//! hash fields with atomic single-field increments, sets with multi-member
//! add, ordered lists, integer counters, atomic rename, and a pipelined
//! batch of set-membership probes.
//!
//! Counter mutations are atomic at the single-field level. No cross-key
//! transaction is offered or assumed; see the crate docs for the consistency
//! consequences.
//!
//! # Example
//!
//! ```rust
//! use repartir::store::{MemoryStore, Store};
//!
//! # async fn example() -> repartir::Result<()> {
//! let store = MemoryStore::new();
//!
//! store.hash_incr_by("button_color:red", "participant_count", 1).await?;
//! let count = store.hash_get("button_color:red", "participant_count").await?;
//! assert_eq!(count.as_deref(), Some("1"));
//! # Ok(())
//! # }
//! ```

mod memory;

pub use memory::MemoryStore;

use crate::Result;
use std::collections::HashMap;
use std::future::Future;

/// Backend command contract consumed by the experiment engine.
///
/// Implementations must make every single-field mutation (`hash_incr_by`,
/// `counter_incr`, `hash_set_nx`) atomic; callers never perform
/// read-modify-write on counters themselves.
pub trait Store: Send + Sync {
    /// Read one hash field. `None` if the key or field is absent.
    fn hash_get(
        &self,
        key: &str,
        field: &str,
    ) -> impl Future<Output = Result<Option<String>>> + Send;

    /// Write one hash field, overwriting any existing value.
    fn hash_set(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Write one hash field only if it is absent. Returns `true` if written.
    fn hash_set_nx(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Atomically add `delta` to an integer hash field (absent fields start
    /// at 0) and return the post-increment value.
    fn hash_incr_by(
        &self,
        key: &str,
        field: &str,
        delta: i64,
    ) -> impl Future<Output = Result<i64>> + Send;

    /// Read every field of a hash. Empty map if the key is absent.
    fn hash_get_all(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<HashMap<String, String>>> + Send;

    /// Remove one hash field. No-op if absent.
    fn hash_del(&self, key: &str, field: &str) -> impl Future<Output = Result<()>> + Send;

    /// Add members to a set, creating it if absent.
    fn set_add(&self, key: &str, members: &[String]) -> impl Future<Output = Result<()>> + Send;

    /// Set-membership probe. `false` if the key is absent.
    fn set_contains(
        &self,
        key: &str,
        member: &str,
    ) -> impl Future<Output = Result<bool>> + Send;

    /// Remove one member from a set. No-op if absent.
    fn set_remove(&self, key: &str, member: &str) -> impl Future<Output = Result<()>> + Send;

    /// Read every member of a set. Empty if the key is absent.
    fn set_members(&self, key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Append a value to the tail of a list, creating it if absent.
    fn list_push(&self, key: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Read a whole list in insertion order. Empty if the key is absent.
    fn list_range(&self, key: &str) -> impl Future<Output = Result<Vec<String>>> + Send;

    /// Atomically increment a bare integer counter key and return the new
    /// value. Absent counters start at 0.
    fn counter_incr(&self, key: &str) -> impl Future<Output = Result<i64>> + Send;

    /// Read a bare integer counter. `None` if the key is absent.
    fn counter_get(&self, key: &str) -> impl Future<Output = Result<Option<i64>>> + Send;

    /// Atomically move a whole keyed collection to a new name, replacing any
    /// value at the destination. Returns `false` (without touching the
    /// destination) if the source key is absent.
    fn rename(&self, from: &str, to: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Remove a whole key of any kind. No-op if absent.
    fn delete(&self, key: &str) -> impl Future<Output = Result<()>> + Send;

    /// Check whether a key exists.
    fn exists(&self, key: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Run many set-membership probes as one pipelined round trip.
    ///
    /// Results come back in probe order. The default implementation loops
    /// over [`Store::set_contains`]; backends with a real pipeline should
    /// override it.
    fn set_contains_batch(
        &self,
        probes: &[(String, String)],
    ) -> impl Future<Output = Result<Vec<bool>>> + Send {
        async move {
            let mut results = Vec::with_capacity(probes.len());
            for (key, member) in probes {
                results.push(self.set_contains(key, member).await?);
            }
            Ok(results)
        }
    }
}
