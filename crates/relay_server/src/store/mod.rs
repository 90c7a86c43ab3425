//! Backing stores for room state.
//!
//! The relay keeps no room state of its own; everything lives in a key-value store with
//! hash and list support. [`RoomStore`] is the narrow command set the registry needs,
//! implemented by Redis for deployments and by an in-process map for development and
//! tests.

use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;

pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

/// Hash and list commands over string keys and JSON string values.
///
/// Implementations must be cheap to share (`Arc<dyn RoomStore>`) and must map every
/// connectivity problem to [`StoreError::Unavailable`].
#[async_trait]
pub trait RoomStore: Send + Sync + Debug {
    /// Sets `field` in the hash at `key`, creating the hash when needed.
    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), StoreError>;

    /// Removes `field` from the hash at `key`. Missing fields are not an error.
    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError>;

    /// Returns every field of the hash at `key` (empty when absent).
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    /// Pushes `value` to the front of the list at `key` and trims it to `capacity`.
    ///
    /// Push and trim are two commands; concurrent writers may interleave between them.
    async fn list_push_capped(
        &self,
        key: &str,
        value: String,
        capacity: usize,
    ) -> Result<(), StoreError>;

    /// Returns up to `limit` entries from the front of the list at `key`.
    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError>;

    /// Round-trips to the store to check connectivity.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Short backend name for status reporting.
    fn backend_name(&self) -> &'static str;

    /// Where the store lives, for status reporting.
    fn endpoint(&self) -> String;
}
