//! Core data types for the event system
//!
//! This module defines the event record that flows through a dispatch, the
//! request context a dispatcher is opened for, and the outcome reported by a
//! dispatch call.
//!
//! # Examples
//!
//! ```ignore
//! use dsp_events::Event;
//! use serde_json::json;
//!
//! let mut event = Event::with_data("user.created", json!({"record": [{"id": 1}]}));
//! event.stop_propagation();
//!
//! let array = event.to_array();
//! assert_eq!(array["stop_propagation"], json!(true));
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;
use url::Url;
use uuid::Uuid;

/// Keys used by [`Event::to_array`] and [`Event::from_array`]
pub mod keys {
    /// Immutable event identifier
    pub const EVENT_ID: &str = "event_id";
    /// Dot-namespaced event name
    pub const EVENT_NAME: &str = "event_name";
    /// RFC 3339 creation timestamp
    pub const TIMESTAMP: &str = "timestamp";
    /// Payload map
    pub const DATA: &str = "data";
    /// Propagation stopper
    pub const STOP_PROPAGATION: &str = "stop_propagation";
    /// Default-prevention flag
    pub const DEFAULT_PREVENTED: &str = "default_prevented";
    /// Record list used for payload normalization
    pub const RECORD: &str = "record";
}

/// A named event with a mutable payload
///
/// Modeled after a DOM/jQuery event: any stage may call
/// [`stop_propagation`](Event::stop_propagation), after which no further
/// observer, script or listener sees the event. `prevent_default` is purely
/// advisory and is left for services to honor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    id: String,
    name: String,
    data: Map<String, Value>,
    timestamp: DateTime<Utc>,
    propagation_stopped: bool,
    default_prevented: bool,
    dirty: bool,
    /// Keys set through `from_array` that are not event fields
    extra: Map<String, Value>,
}

impl Event {
    /// Create an event with an empty payload
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            data: Map::new(),
            timestamp: Utc::now(),
            propagation_stopped: false,
            default_prevented: false,
            dirty: false,
            extra: Map::new(),
        }
    }

    /// Create an event carrying `data`
    ///
    /// Non-object data is normalized the same way `from_array` does it.
    pub fn with_data(name: impl Into<String>, data: Value) -> Self {
        let mut event = Self::new(name);
        event.data = normalize_data(data).unwrap_or_default();
        event
    }

    /// Unique, immutable event id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Event name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// When the event was created
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Event payload
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Mutable access to the payload; marks the event dirty
    pub fn data_mut(&mut self) -> &mut Map<String, Value> {
        self.dirty = true;
        &mut self.data
    }

    /// Replace the payload, marking the event dirty if it changed
    pub fn set_data(&mut self, data: Map<String, Value>) {
        if self.data != data {
            self.data = data;
            self.dirty = true;
        }
    }

    /// Extra properties carried over from `from_array`
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Stop all further stages from seeing this event
    pub fn stop_propagation(&mut self) {
        self.propagation_stopped = true;
    }

    /// Whether propagation has been stopped
    pub fn is_propagation_stopped(&self) -> bool {
        self.propagation_stopped
    }

    /// Ask services not to perform their default action
    pub fn prevent_default(&mut self) {
        self.default_prevented = true;
    }

    /// Whether the default action was prevented
    pub fn is_default_prevented(&self) -> bool {
        self.default_prevented
    }

    /// Whether any stage changed the payload
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Flatten the event into a map suitable for scripts and webhooks
    pub fn to_array(&self) -> Map<String, Value> {
        let mut array = Map::new();
        array.insert(keys::EVENT_ID.to_string(), Value::String(self.id.clone()));
        array.insert(keys::EVENT_NAME.to_string(), Value::String(self.name.clone()));
        array.insert(
            keys::TIMESTAMP.to_string(),
            Value::String(self.timestamp.to_rfc3339()),
        );
        array.insert(keys::DATA.to_string(), Value::Object(self.data.clone()));
        array.insert(
            keys::STOP_PROPAGATION.to_string(),
            Value::Bool(self.propagation_stopped),
        );
        array.insert(
            keys::DEFAULT_PREVENTED.to_string(),
            Value::Bool(self.default_prevented),
        );

        for (key, value) in &self.extra {
            array.entry(key.clone()).or_insert_with(|| value.clone());
        }

        array
    }

    /// Apply a flattened map back onto the event
    ///
    /// `event_id` is never overwritten. A truthy `stop_propagation` stops
    /// propagation; a false one never restarts it.
    pub fn from_array(&mut self, array: &Map<String, Value>) -> &mut Self {
        for (key, value) in array {
            match key.as_str() {
                keys::EVENT_ID | keys::STOP_PROPAGATION | keys::DEFAULT_PREVENTED => {}
                keys::EVENT_NAME => {
                    if let Some(name) = value.as_str() {
                        self.name = name.to_string();
                    }
                }
                keys::TIMESTAMP => {
                    if let Some(ts) = value
                        .as_str()
                        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    {
                        self.timestamp = ts.with_timezone(&Utc);
                    }
                }
                keys::DATA => match normalize_data(value.clone()) {
                    Some(data) => self.set_data(data),
                    None => debug!(event_name = %self.name, "Ignoring non-structured event data"),
                },
                _ => {
                    self.extra.insert(key.clone(), value.clone());
                }
            }
        }

        if is_truthy(array.get(keys::STOP_PROPAGATION)) {
            self.stop_propagation();
        }

        if is_truthy(array.get(keys::DEFAULT_PREVENTED)) {
            self.prevent_default();
        }

        self
    }
}

/// Turn arbitrary JSON into an event payload map.
///
/// Objects are taken as-is, arrays become a record list, `null` becomes an
/// empty payload and scalars are rejected.
pub(crate) fn normalize_data(value: Value) -> Option<Map<String, Value>> {
    match value {
        Value::Object(map) => Some(map),
        Value::Array(records) => {
            let mut map = Map::new();
            map.insert(keys::RECORD.to_string(), Value::Array(records));
            Some(map)
        }
        Value::Null => Some(Map::new()),
        _ => None,
    }
}

fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty() && s != "0" && s != "false",
        _ => false,
    }
}

/// What a dispatch call achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    /// Nothing handled the event, or every stage was disabled
    NotDispatched,
    /// An observer, script or listener stopped propagation
    Stopped,
    /// The event ran through every stage and was handled
    Dispatched,
}

impl DispatchOutcome {
    /// True when at least one stage handled the event without stopping it
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched)
    }
}

/// The inbound request a dispatcher serves
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Request path with the `/rest` prefix removed
    pub path_info: String,

    /// HTTP method, when the request came through the REST layer
    pub method: Option<String>,

    /// Scheme and host used to resolve host-relative webhook listeners
    pub base_url: Option<Url>,

    /// When the request was received
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    /// Context for `path`, stripping a leading `/rest`
    pub fn new(path: impl AsRef<str>) -> Self {
        let path = path.as_ref();
        let path_info = match path.strip_prefix("/rest") {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
            _ => path.to_string(),
        };

        Self {
            path_info,
            method: None,
            base_url: None,
            received_at: Utc::now(),
        }
    }

    /// Set the HTTP method
    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self
    }

    /// Set the scheme+host used for relative webhook URLs
    pub fn with_base_url(mut self, base_url: Url) -> Self {
        self.base_url = Some(base_url);
        self
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("/")
    }
}
