//! Cache storage backends

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tokio::{fs, sync::RwLock};
use tracing::debug;

use crate::{CacheError, Result};

/// A cached value with its creation time and optional expiry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    /// The cached data
    pub data: T,
    /// When the entry was written
    pub created_at: DateTime<Utc>,
    /// When the entry stops being fresh (never, if `None`)
    pub expires_at: Option<DateTime<Utc>>,
}

impl<T> CacheEntry<T> {
    /// Create a new cache entry
    pub fn new(data: T, ttl: Option<Duration>) -> Self {
        let created_at = Utc::now();
        let expires_at = ttl
            .and_then(|t| chrono::Duration::from_std(t).ok())
            .map(|t| created_at + t);

        Self {
            data,
            created_at,
            expires_at,
        }
    }

    /// Check if the entry has expired
    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|expires| Utc::now() >= expires)
            .unwrap_or(false)
    }

    /// Get remaining TTL
    pub fn ttl_remaining(&self) -> Option<Duration> {
        (self.expires_at? - Utc::now()).to_std().ok()
    }
}

/// Cache storage trait
#[async_trait]
pub trait CacheStorage: Send + Sync {
    /// Store a value
    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()>;

    /// Retrieve a value
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>>;

    /// Remove a value, returning whether it existed
    async fn remove(&self, key: &str) -> Result<bool>;

    /// Check if key exists
    async fn contains(&self, key: &str) -> Result<bool>;

    /// Clear all entries
    async fn clear(&self) -> Result<()>;

    /// Get all keys
    async fn keys(&self) -> Result<Vec<String>>;
}

/// Write `value` under `key` wrapped in a [`CacheEntry`].
pub async fn put<T: Serialize>(
    storage: &dyn CacheStorage,
    key: &str,
    value: T,
    ttl: Option<Duration>,
) -> Result<()> {
    let entry = CacheEntry::new(value, ttl);
    let json = serde_json::to_value(&entry).map_err(|e| CacheError::Serialization {
        message: e.to_string(),
    })?;
    storage.set(key, &json).await
}

/// Read the entry stored under `key`, returning `None` when it is absent or
/// expired. Expired entries are removed on the way out.
pub async fn get_fresh<T: DeserializeOwned>(
    storage: &dyn CacheStorage,
    key: &str,
) -> Result<Option<T>> {
    let Some(json) = storage.get(key).await? else {
        return Ok(None);
    };

    let entry: CacheEntry<T> =
        serde_json::from_value(json).map_err(|e| CacheError::Deserialization {
            message: e.to_string(),
        })?;

    if entry.is_expired() {
        debug!(key = %key, "Dropping expired cache entry");
        storage.remove(key).await?;
        return Ok(None);
    }

    Ok(Some(entry.data))
}

/// In-memory cache storage
#[derive(Clone, Default)]
pub struct MemoryStorage {
    data: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryStorage {
    /// Create new in-memory storage
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CacheStorage for MemoryStorage {
    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        let mut data = self.data.write().await;
        data.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(key).is_some())
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        let data = self.data.read().await;
        Ok(data.contains_key(key))
    }

    async fn clear(&self) -> Result<()> {
        self.data.write().await.clear();
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let data = self.data.read().await;
        Ok(data.keys().cloned().collect())
    }
}

const ENTRY_EXTENSION: &str = "cache";

/// Disk-based cache storage, one JSON file per key
pub struct DiskStorage {
    base_path: PathBuf,
}

impl DiskStorage {
    /// Create new disk storage with base path
    pub fn new<P: AsRef<Path>>(base_path: P) -> Self {
        Self {
            base_path: base_path.as_ref().to_path_buf(),
        }
    }

    /// Directory holding the cache files
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn key_path(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey {
                key: key.to_string(),
            });
        }

        let safe_key = key.replace(['/', '\\', ':', '*', '?', '"', '<', '>', '|'], "_");
        Ok(self
            .base_path
            .join(format!("{}.{}", safe_key, ENTRY_EXTENSION)))
    }

    async fn ensure_base_dir(&self) -> Result<()> {
        if !self.base_path.exists() {
            fs::create_dir_all(&self.base_path).await?;
        }
        Ok(())
    }

    fn is_entry_file(path: &Path) -> bool {
        path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
    }
}

#[async_trait]
impl CacheStorage for DiskStorage {
    async fn set(&self, key: &str, value: &serde_json::Value) -> Result<()> {
        self.ensure_base_dir().await?;

        let file_path = self.key_path(key)?;
        let json_data =
            serde_json::to_string_pretty(value).map_err(|e| CacheError::Serialization {
                message: e.to_string(),
            })?;

        // Readers never observe a half-written table.
        let tmp_path = file_path.with_extension("tmp");
        fs::write(&tmp_path, json_data).await?;
        fs::rename(&tmp_path, &file_path).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>> {
        let file_path = self.key_path(key)?;

        if !file_path.exists() {
            return Ok(None);
        }

        let json_data = fs::read_to_string(&file_path).await?;
        let value = serde_json::from_str(&json_data).map_err(|e| CacheError::Deserialization {
            message: e.to_string(),
        })?;

        Ok(Some(value))
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        let file_path = self.key_path(key)?;

        if file_path.exists() {
            fs::remove_file(&file_path).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn contains(&self, key: &str) -> Result<bool> {
        Ok(self.key_path(key)?.exists())
    }

    async fn clear(&self) -> Result<()> {
        if !self.base_path.exists() {
            return Ok(());
        }

        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if Self::is_entry_file(&path) {
                fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        if !self.base_path.exists() {
            return Ok(Vec::new());
        }

        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if !Self::is_entry_file(&path) {
                continue;
            }
            if let Some(name) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(name.to_string());
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[tokio::test]
    async fn test_memory_storage_basic_operations() {
        let storage = MemoryStorage::new();

        put(&storage, "tables", vec!["a", "b"], None).await.unwrap();
        let tables: Vec<String> = get_fresh(&storage, "tables").await.unwrap().unwrap();
        assert_eq!(tables, vec!["a", "b"]);

        assert!(storage.contains("tables").await.unwrap());
        assert!(!storage.contains("nonexistent").await.unwrap());

        assert!(storage.remove("tables").await.unwrap());
        assert!(!storage.contains("tables").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_storage_basic_operations() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(temp_dir.path().join("nested"));

        put(&storage, "events.tables.default", "payload", None)
            .await
            .unwrap();
        let value: String = get_fresh(&storage, "events.tables.default")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(value, "payload");

        assert_eq!(storage.keys().await.unwrap(), vec!["events.tables.default"]);

        storage.clear().await.unwrap();
        assert!(storage.keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_disk_storage_sanitizes_keys() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(temp_dir.path());

        put(&storage, "a/b:c", 1u32, None).await.unwrap();
        assert!(temp_dir.path().join("a_b_c.cache").exists());
        assert!(storage.contains("a/b:c").await.unwrap());
    }

    #[tokio::test]
    async fn test_disk_storage_rejects_empty_key() {
        let temp_dir = TempDir::new().unwrap();
        let storage = DiskStorage::new(temp_dir.path());

        let result = storage.get("").await;
        assert!(matches!(result, Err(CacheError::InvalidKey { .. })));
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let storage = MemoryStorage::new();
        put(&storage, "stamp", 42u64, Some(Duration::from_millis(1)))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let value: Option<u64> = get_fresh(&storage, "stamp").await.unwrap();
        assert!(value.is_none());
        assert!(!storage.contains("stamp").await.unwrap());
    }

    #[test]
    fn test_cache_entry_ttl_remaining() {
        let entry = CacheEntry::new("data", Some(Duration::from_secs(10)));
        let remaining = entry.ttl_remaining().unwrap();
        assert!(remaining.as_secs() <= 10);
        assert!(remaining.as_secs() > 5);
        assert!(!entry.is_expired());
    }

    #[test]
    fn test_cache_entry_without_ttl_never_expires() {
        let entry = CacheEntry::new("data", None);
        assert!(entry.ttl_remaining().is_none());
        assert!(!entry.is_expired());
    }
}
