//! In-process store used for development and tests.

use super::RoomStore;
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};

/// A [`RoomStore`] kept in concurrent maps.
///
/// It can be switched unavailable to exercise outage handling.
#[derive(Debug)]
pub struct MemoryStore {
    hashes: DashMap<String, HashMap<String, String>>,
    lists: DashMap<String, VecDeque<String>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            hashes: DashMap::new(),
            lists: DashMap::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates the store going away (`false`) or coming back (`true`).
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoomStore for MemoryStore {
    async fn hash_set(&self, key: &str, field: &str, value: String) -> Result<(), StoreError> {
        self.check()?;
        self.hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    async fn hash_delete(&self, key: &str, field: &str) -> Result<(), StoreError> {
        self.check()?;
        if let Some(mut hash) = self.hashes.get_mut(key) {
            hash.remove(field);
        }
        // Redis drops a hash once its last field is gone
        self.hashes.remove_if(key, |_, hash| hash.is_empty());
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        self.check()?;
        Ok(self
            .hashes
            .get(key)
            .map(|hash| hash.value().clone())
            .unwrap_or_default())
    }

    async fn list_push_capped(
        &self,
        key: &str,
        value: String,
        capacity: usize,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut list = self.lists.entry(key.to_string()).or_default();
        list.push_front(value);
        list.truncate(capacity);
        Ok(())
    }

    async fn list_range(&self, key: &str, limit: usize) -> Result<Vec<String>, StoreError> {
        self.check()?;
        Ok(self
            .lists
            .get(key)
            .map(|list| list.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn endpoint(&self) -> String {
        "in-process".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_hash_round_trip() {
        let store = MemoryStore::new();
        store.hash_set("h", "a", "1".into()).await.unwrap();
        store.hash_set("h", "b", "2".into()).await.unwrap();
        store.hash_set("h", "a", "3".into()).await.unwrap();

        let all = store.hash_get_all("h").await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], "3");

        store.hash_delete("h", "a").await.unwrap();
        store.hash_delete("h", "missing").await.unwrap();
        assert_eq!(store.hash_get_all("h").await.unwrap().len(), 1);
        assert!(store.hash_get_all("nothing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_is_capped_most_recent_first() {
        let store = MemoryStore::new();
        for i in 0..10 {
            store.list_push_capped("l", i.to_string(), 3).await.unwrap();
        }
        assert_eq!(store.list_range("l", 10).await.unwrap(), vec!["9", "8", "7"]);
        assert_eq!(store.list_range("l", 1).await.unwrap(), vec!["9"]);
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_every_command() {
        let store = MemoryStore::new();
        store.set_available(false);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.hash_set("h", "a", "1".into()).await.is_err());
        assert!(store.list_range("l", 1).await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
