//! Extension-local persistent storage.
//!
//! The store is the single source of truth for the cached identity. The
//! controller and the offscreen host both read and write it; every write
//! replaces the whole value under a key.

use async_trait::async_trait;
use identity_relay_core::Profile;
use identity_relay_protocol::StorageUnavailableError;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

/// Default key holding the cached profile.
pub const DEFAULT_PROFILE_KEY: &str = "currentUser";

/// A persistent key/value store of JSON values.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Reads a key.
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageUnavailableError>;

    /// Replaces the value under a key.
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageUnavailableError>;

    /// Removes a key. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), StorageUnavailableError>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageUnavailableError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageUnavailableError> {
        (**self).set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageUnavailableError> {
        (**self).remove(key).await
    }
}

/// In-memory store.
///
/// Can be switched into an unavailable mode where every call fails, the way
/// storage behaves in a context that has no access to it.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent call fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StorageUnavailableError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StorageUnavailableError::new("storage is not accessible"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageUnavailableError> {
        self.check()?;
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageUnavailableError> {
        self.check()?;
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StorageUnavailableError> {
        self.check()?;
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Store backed by a single JSON object file.
///
/// Every write rewrites the whole file through a temporary sibling and a
/// rename, so readers never see a partial file.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl JsonFileStore {
    /// Creates a store at `path`. The file is created on first write.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StorageUnavailableError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Map::new()),
            Err(e) => return Err(StorageUnavailableError::new(e.to_string())),
        };
        if bytes.is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_slice(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(StorageUnavailableError::new(format!(
                "{} does not hold a JSON object",
                self.path.display()
            ))),
            Err(e) => Err(StorageUnavailableError::new(e.to_string())),
        }
    }

    async fn write_all(&self, map: Map<String, Value>) -> Result<(), StorageUnavailableError> {
        let bytes = serde_json::to_vec_pretty(&Value::Object(map))
            .map_err(|e| StorageUnavailableError::new(e.to_string()))?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| StorageUnavailableError::new(e.to_string()))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StorageUnavailableError::new(e.to_string()))
    }
}

#[async_trait]
impl KeyValueStore for JsonFileStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageUnavailableError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_all().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StorageUnavailableError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        map.insert(key.to_string(), value);
        self.write_all(map).await
    }

    async fn remove(&self, key: &str) -> Result<(), StorageUnavailableError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_all().await?;
        if map.remove(key).is_none() {
            return Ok(());
        }
        self.write_all(map).await
    }
}

/// Typed view of the cached profile in a [`KeyValueStore`].
#[derive(Debug, Clone)]
pub struct ProfileCache<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> ProfileCache<S> {
    /// Creates a cache over `store` using the default key.
    #[must_use]
    pub fn new(store: S) -> Self {
        Self::with_key(store, DEFAULT_PROFILE_KEY)
    }

    /// Creates a cache over `store` using a custom key.
    #[must_use]
    pub fn with_key(store: S, key: impl Into<String>) -> Self {
        Self {
            store,
            key: key.into(),
        }
    }

    /// Returns the storage key.
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Loads the cached profile.
    ///
    /// A stored value that is not a valid profile is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailableError` if the store cannot be read.
    pub async fn load(&self) -> Result<Option<Profile>, StorageUnavailableError> {
        let Some(value) = self.store.get(&self.key).await? else {
            return Ok(None);
        };
        if value.is_null() {
            return Ok(None);
        }
        match serde_json::from_value(value) {
            Ok(profile) => Ok(Some(profile)),
            Err(e) => {
                warn!(key = %self.key, error = %e, "ignoring unreadable cached profile");
                Ok(None)
            }
        }
    }

    /// Replaces the cached profile.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailableError` if the store cannot be written.
    pub async fn save(&self, profile: &Profile) -> Result<(), StorageUnavailableError> {
        let value = serde_json::to_value(profile)
            .map_err(|e| StorageUnavailableError::new(e.to_string()))?;
        self.store.set(&self.key, value).await?;
        debug!(key = %self.key, uid = %profile.id, "cached profile saved");
        Ok(())
    }

    /// Clears the cached profile.
    ///
    /// # Errors
    ///
    /// Returns `StorageUnavailableError` if the store cannot be written.
    pub async fn clear(&self) -> Result<(), StorageUnavailableError> {
        self.store.remove(&self.key).await?;
        debug!(key = %self.key, "cached profile cleared");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alice() -> Profile {
        Profile::new("u1")
            .with_email(Some("alice@example.com".to_string()))
            .with_display_name(Some("Alice".to_string()))
    }

    #[tokio::test]
    async fn memory_store_basic_operations() {
        let store = MemoryStore::new();
        assert_eq!(store.get("k").await.expect("get"), None);

        store.set("k", json!(1)).await.expect("set");
        store.set("k", json!(2)).await.expect("set");
        assert_eq!(store.get("k").await.expect("get"), Some(json!(2)));

        store.remove("k").await.expect("remove");
        store.remove("k").await.expect("remove twice");
        assert_eq!(store.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn memory_store_can_be_unavailable() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.get("k").await.unwrap_err();
        assert_eq!(err.reason, "storage is not accessible");

        store.set_unavailable(false);
        assert!(store.get("k").await.is_ok());
    }

    #[tokio::test]
    async fn file_store_persists_across_instances() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");

        let store = JsonFileStore::new(&path);
        assert_eq!(store.get("k").await.expect("get missing file"), None);
        store.set("a", json!({ "x": 1 })).await.expect("set");
        store.set("b", json!("two")).await.expect("set");
        store.remove("b").await.expect("remove");

        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get("a").await.expect("get"), Some(json!({ "x": 1 })));
        assert_eq!(reopened.get("b").await.expect("get"), None);
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("storage.json");
        tokio::fs::write(&path, b"[1, 2, 3]").await.expect("write");

        let store = JsonFileStore::new(&path);
        assert!(store.get("a").await.is_err());
    }

    #[tokio::test]
    async fn profile_cache_round_trip() {
        let cache = ProfileCache::new(Arc::new(MemoryStore::new()));
        assert_eq!(cache.key(), "currentUser");
        assert_eq!(cache.load().await.expect("load"), None);

        cache.save(&alice()).await.expect("save");
        assert_eq!(cache.load().await.expect("load"), Some(alice()));

        cache.clear().await.expect("clear");
        assert_eq!(cache.load().await.expect("load"), None);
    }

    #[tokio::test]
    async fn profile_cache_stores_only_profile_fields() {
        let store = Arc::new(MemoryStore::new());
        let cache = ProfileCache::new(Arc::clone(&store));
        cache.save(&alice()).await.expect("save");

        let stored = store.get("currentUser").await.expect("get").expect("value");
        let keys: Vec<&String> = stored.as_object().expect("object").keys().collect();
        assert_eq!(keys.len(), 4);
    }

    #[tokio::test]
    async fn profile_cache_tolerates_garbage() {
        let store = Arc::new(MemoryStore::new());
        store
            .set("currentUser", json!({ "no": "id" }))
            .await
            .expect("set");
        let cache = ProfileCache::new(store);
        assert_eq!(cache.load().await.expect("load"), None);
    }
}
