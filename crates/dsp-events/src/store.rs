//! Persistent event store
//!
//! A dispatcher's listener, script and observer tables are saved as one JSON
//! value under `events.tables.<dispatcher_id>`. The store also keeps the
//! timestamp of each dispatcher's last script scan under
//! `platform.scripts_last_check.<dispatcher_id>`, which expires after the
//! scan TTL.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dsp_cache::{get_fresh, put, CacheStorage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EventsError, Result};
use crate::registry::ListenerTable;
use crate::scripts::ScriptTable;

/// Key prefix of the per-dispatcher last-scan stamp
pub const SCRIPTS_LAST_CHECK_KEY: &str = "platform.scripts_last_check";

const TABLES_PREFIX: &str = "events.tables.";

/// The three tables persisted for a dispatcher
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventTables {
    #[serde(default)]
    pub listeners: ListenerTable,
    #[serde(default)]
    pub scripts: ScriptTable,
    /// Observer ids, informational only
    #[serde(default)]
    pub observers: Vec<String>,
}

impl EventTables {
    /// Whether all three tables are empty
    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty() && self.scripts.is_empty() && self.observers.is_empty()
    }
}

/// Load/save adapter over a cache backend
#[derive(Clone)]
pub struct EventStore {
    storage: Arc<dyn CacheStorage>,
}

impl EventStore {
    /// Store backed by `storage`
    pub fn new(storage: Arc<dyn CacheStorage>) -> Self {
        Self { storage }
    }

    /// In-memory store
    pub fn memory() -> Self {
        Self::new(Arc::new(dsp_cache::MemoryStorage::new()))
    }

    /// Disk store rooted at `path`
    pub fn disk(path: impl Into<PathBuf>) -> Self {
        Self::new(Arc::new(dsp_cache::DiskStorage::new(path.into())))
    }

    fn tables_key(dispatcher_id: &str) -> String {
        format!("{}{}", TABLES_PREFIX, dispatcher_id)
    }

    fn script_check_key(dispatcher_id: &str) -> String {
        format!("{}.{}", SCRIPTS_LAST_CHECK_KEY, dispatcher_id)
    }

    /// Load the tables for `dispatcher_id`; absent tables load as empty
    pub async fn load(&self, dispatcher_id: &str) -> Result<EventTables> {
        let key = Self::tables_key(dispatcher_id);
        match self.storage.get(&key).await? {
            Some(value) => serde_json::from_value(value).map_err(|e| {
                EventsError::StorageError(format!("Stored tables for '{}' are unreadable: {}", dispatcher_id, e))
            }),
            None => Ok(EventTables::default()),
        }
    }

    /// Save the tables for `dispatcher_id`
    pub async fn save(&self, dispatcher_id: &str, tables: &EventTables) -> Result<()> {
        let value = serde_json::to_value(tables)?;
        self.storage.set(&Self::tables_key(dispatcher_id), &value).await?;
        debug!(
            dispatcher_id,
            listeners = tables.listeners.len(),
            scripts = tables.scripts.len(),
            "Saved event tables"
        );
        Ok(())
    }

    /// Remove the tables for `dispatcher_id`
    pub async fn flush_all(&self, dispatcher_id: &str) -> Result<bool> {
        Ok(self.storage.remove(&Self::tables_key(dispatcher_id)).await?)
    }

    /// When `dispatcher_id` last scanned scripts, if the stamp is still fresh
    pub async fn last_script_check(&self, dispatcher_id: &str) -> Result<Option<DateTime<Utc>>> {
        let key = Self::script_check_key(dispatcher_id);
        Ok(get_fresh(self.storage.as_ref(), &key).await?)
    }

    /// Record a script scan by `dispatcher_id` now, fresh for `ttl`
    pub async fn touch_script_check(&self, dispatcher_id: &str, ttl: Duration) -> Result<()> {
        let key = Self::script_check_key(dispatcher_id);
        put(self.storage.as_ref(), &key, Utc::now(), Some(ttl)).await?;
        Ok(())
    }

    /// Forget the last scan so the next open of `dispatcher_id` re-scans
    pub async fn reset_script_check(&self, dispatcher_id: &str) -> Result<()> {
        self.storage
            .remove(&Self::script_check_key(dispatcher_id))
            .await?;
        Ok(())
    }
}

impl std::fmt::Debug for EventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStore").finish_non_exhaustive()
    }
}
