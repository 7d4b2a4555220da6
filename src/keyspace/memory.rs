//! Map-backed keyspace store for single-process mode and tests

use crate::error::{ConductorError, ConductorResult};
use crate::keyspace::KeyValueStore;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;

type Keyspace = HashMap<String, Value>;

/// In-memory [`KeyValueStore`]. All operations, including compare-and-swap
/// and the counter updates, run under one mutex, so the decrement-to-zero
/// race is won exactly once even under concurrent callbacks.
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    spaces: Mutex<HashMap<String, Keyspace>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Keyspace>> {
        self.spaces.lock().expect("keyspace mutex poisoned")
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn create_keyspace(&self, space: &str) -> ConductorResult<()> {
        let mut spaces = self.lock();
        if spaces.contains_key(space) {
            return Err(ConductorError::keyspace(format!(
                "keyspace `{space}` already exists"
            )));
        }
        spaces.insert(space.to_string(), Keyspace::new());
        Ok(())
    }

    async fn destroy_keyspace(&self, space: &str) -> ConductorResult<()> {
        self.lock().remove(space);
        Ok(())
    }

    async fn set(&self, space: &str, key: &str, value: Value) -> ConductorResult<()> {
        let mut spaces = self.lock();
        let keyspace = spaces
            .get_mut(space)
            .ok_or_else(|| ConductorError::keyspace(format!("no such keyspace `{space}`")))?;
        keyspace.insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, space: &str, key: &str) -> ConductorResult<Option<Value>> {
        Ok(self
            .lock()
            .get(space)
            .and_then(|keyspace| keyspace.get(key))
            .cloned())
    }

    async fn increment(&self, space: &str, key: &str, delta: i64) -> ConductorResult<i64> {
        let mut spaces = self.lock();
        let keyspace = spaces
            .get_mut(space)
            .ok_or_else(|| ConductorError::keyspace(format!("no such keyspace `{space}`")))?;
        let current = match keyspace.get(key) {
            None => 0,
            Some(value) => value.as_i64().ok_or_else(|| {
                ConductorError::keyspace(format!("key `{key}` in `{space}` is not an integer"))
            })?,
        };
        let next = current + delta;
        keyspace.insert(key.to_string(), Value::from(next));
        Ok(next)
    }

    async fn push(&self, space: &str, key: &str, value: Value) -> ConductorResult<()> {
        let mut spaces = self.lock();
        let keyspace = spaces
            .get_mut(space)
            .ok_or_else(|| ConductorError::keyspace(format!("no such keyspace `{space}`")))?;
        match keyspace
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()))
        {
            Value::Array(items) => {
                items.push(value);
                Ok(())
            }
            _ => Err(ConductorError::keyspace(format!(
                "key `{key}` in `{space}` is not a list"
            ))),
        }
    }

    async fn exists(&self, space: &str, key: &str) -> ConductorResult<bool> {
        Ok(self
            .lock()
            .get(space)
            .map(|keyspace| keyspace.contains_key(key))
            .unwrap_or(false))
    }

    async fn remove(&self, space: &str, key: &str) -> ConductorResult<()> {
        if let Some(keyspace) = self.lock().get_mut(space) {
            keyspace.remove(key);
        }
        Ok(())
    }

    async fn compare_and_swap(
        &self,
        space: &str,
        key: &str,
        expected: Value,
        new: Value,
    ) -> ConductorResult<bool> {
        let mut spaces = self.lock();
        let Some(keyspace) = spaces.get_mut(space) else {
            return Ok(false);
        };
        match keyspace.get(key) {
            Some(current) if *current == expected => {
                keyspace.insert(key.to_string(), new);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn counters_start_at_zero_and_accumulate() {
        let store = MemoryKeyValueStore::new();
        store.create_keyspace("s").await.unwrap();
        assert_eq!(store.increment("s", "active", 5).await.unwrap(), 5);
        assert_eq!(store.increment("s", "active", 2).await.unwrap(), 7);
        assert_eq!(store.decrement("s", "active", 3).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn cas_swaps_only_on_match() {
        let store = MemoryKeyValueStore::new();
        store.create_keyspace("s").await.unwrap();
        store.set("s", "flag", json!(false)).await.unwrap();

        assert!(store
            .compare_and_swap("s", "flag", json!(false), json!(true))
            .await
            .unwrap());
        // Second swap must lose: the flag is already true.
        assert!(!store
            .compare_and_swap("s", "flag", json!(false), json!(true))
            .await
            .unwrap());
        assert_eq!(store.get("s", "flag").await.unwrap(), Some(json!(true)));
    }

    #[tokio::test]
    async fn cas_on_missing_key_never_matches() {
        let store = MemoryKeyValueStore::new();
        store.create_keyspace("s").await.unwrap();
        assert!(!store
            .compare_and_swap("s", "absent", json!(false), json!(true))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn push_preserves_order() {
        let store = MemoryKeyValueStore::new();
        store.create_keyspace("s").await.unwrap();
        store.set("s", "data", json!([])).await.unwrap();
        store.push("s", "data", json!("a")).await.unwrap();
        store.push("s", "data", json!("b")).await.unwrap();
        assert_eq!(
            store.get("s", "data").await.unwrap(),
            Some(json!(["a", "b"]))
        );
    }

    #[tokio::test]
    async fn reads_of_unknown_keyspace_are_absence() {
        let store = MemoryKeyValueStore::new();
        assert_eq!(store.get("nope", "k").await.unwrap(), None);
        assert!(!store.exists("nope", "k").await.unwrap());
        assert!(store.set("nope", "k", json!(1)).await.is_err());
    }

    #[tokio::test]
    async fn destroy_drops_the_whole_namespace() {
        let store = MemoryKeyValueStore::new();
        store.create_keyspace("s").await.unwrap();
        store.set("s", "k", json!(1)).await.unwrap();
        store.destroy_keyspace("s").await.unwrap();
        assert_eq!(store.get("s", "k").await.unwrap(), None);
        // The name can be reused afterwards.
        store.create_keyspace("s").await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let store = MemoryKeyValueStore::new();
        store.create_keyspace("s").await.unwrap();
        assert!(store.create_keyspace("s").await.is_err());
    }
}
