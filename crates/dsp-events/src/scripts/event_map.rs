//! Route/method/script map consumed by the script resolver
//!
//! The map is nested as API name, then route, then HTTP method. Each method
//! carries metadata that may list the script files handling its events.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{EventsError, Result};

/// Metadata attached to one route method
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MethodInfo {
    /// Event raised by this method, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,

    /// Script file names relative to the script directory
    #[serde(default)]
    pub scripts: Vec<String>,

    /// Anything else the map carries
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// API → route → method → metadata
pub type EventMap = BTreeMap<String, BTreeMap<String, BTreeMap<String, MethodInfo>>>;

/// Source of the event map
#[async_trait]
pub trait EventMapSource: Send + Sync {
    /// Current map
    async fn event_map(&self) -> Result<EventMap>;
}

/// A fixed, in-memory map
#[derive(Debug, Clone, Default)]
pub struct StaticEventMap {
    map: EventMap,
}

impl StaticEventMap {
    /// Wrap `map`
    pub fn new(map: EventMap) -> Self {
        Self { map }
    }

    /// Add a single route method
    pub fn with_route(
        mut self,
        api: impl Into<String>,
        route: impl Into<String>,
        method: impl Into<String>,
        info: MethodInfo,
    ) -> Self {
        self.map
            .entry(api.into())
            .or_default()
            .entry(route.into())
            .or_default()
            .insert(method.into(), info);
        self
    }
}

#[async_trait]
impl EventMapSource for StaticEventMap {
    async fn event_map(&self) -> Result<EventMap> {
        Ok(self.map.clone())
    }
}

/// Map read from a JSON file on every call
#[derive(Debug, Clone)]
pub struct FileEventMap {
    path: PathBuf,
}

impl FileEventMap {
    /// Map stored at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventMapSource for FileEventMap {
    async fn event_map(&self) -> Result<EventMap> {
        if !self.path.exists() {
            debug!(path = %self.path.display(), "Event map not found, using empty map");
            return Ok(EventMap::new());
        }

        let content = fs::read_to_string(&self.path).map_err(|e| {
            EventsError::InvalidConfiguration(format!(
                "Failed to read event map {}: {}",
                self.path.display(),
                e
            ))
        })?;

        Ok(serde_json::from_str(&content)?)
    }
}
