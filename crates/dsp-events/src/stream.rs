//! Server-sent event streams
//!
//! [`EventStreamHub`] keeps one broadcast channel per stream id. Messages are
//! emitted under the SSE event name `dsp.event`; their data is the caller's
//! payload stamped with the stream id, a timestamp and the event type.
//! [`StreamObserver`] forwards every dispatched event to a stream.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::sync::broadcast;
use tracing::debug;

use crate::dispatcher::EventDispatcher;
use crate::error::{EventsError, Result};
use crate::names;
use crate::observer::{EventObserver, ObserverState};
use crate::types::Event;

/// SSE event name of every stream message
pub const SSE_EVENT_NAME: &str = "dsp.event";

/// Response headers for an event-stream endpoint
pub const SSE_HEADERS: [(&str, &str); 3] = [
    ("Content-Type", "text/event-stream"),
    ("Cache-Control", "no-cache"),
    ("Connection", "keep-alive"),
];

const DEFAULT_CAPACITY: usize = 64;

/// A message sent on a stream
#[derive(Debug, Clone, PartialEq)]
pub struct StreamMessage {
    /// SSE event name
    pub event: String,
    /// Message data
    pub data: Value,
}

impl StreamMessage {
    /// Format as an SSE frame
    pub fn to_sse(&self) -> String {
        let data = serde_json::to_string_pretty(&self.data).unwrap_or_default();
        let mut frame = format!("event: {}\n", self.event);
        for line in data.lines() {
            frame.push_str("data: ");
            frame.push_str(line);
            frame.push('\n');
        }
        frame.push('\n');
        frame
    }
}

/// Registry of open event streams
#[derive(Debug)]
pub struct EventStreamHub {
    streams: RwLock<HashMap<String, broadcast::Sender<StreamMessage>>>,
    capacity: usize,
}

impl Default for EventStreamHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl EventStreamHub {
    /// Hub buffering up to `capacity` messages per subscriber
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Open stream `id`, or subscribe to it if it already exists
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::InvalidArgument`] if `id` is blank.
    pub fn create(&self, id: &str) -> Result<broadcast::Receiver<StreamMessage>> {
        if id.trim().is_empty() {
            return Err(EventsError::InvalidArgument(
                "A stream id is required".to_string(),
            ));
        }

        let mut streams = self.streams.write().map_err(|e| {
            EventsError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        if let Some(sender) = streams.get(id) {
            return Ok(sender.subscribe());
        }

        let (sender, receiver) = broadcast::channel(self.capacity);
        streams.insert(id.to_string(), sender);
        debug!(stream_id = id, "Event stream created");
        Ok(receiver)
    }

    /// Whether stream `id` is open
    pub fn is_valid_stream_id(&self, id: &str) -> bool {
        self.streams
            .read()
            .map(|streams| streams.contains_key(id))
            .unwrap_or(false)
    }

    /// Send `data` as `event_name` on stream `id`
    ///
    /// Returns `false` if the stream is unknown or nobody is listening.
    pub fn send(&self, id: &str, event_name: &str, data: Map<String, Value>) -> Result<bool> {
        let streams = self
            .streams
            .read()
            .map_err(|e| EventsError::StorageError(format!("Failed to acquire read lock: {}", e)))?;

        let Some(sender) = streams.get(id) else {
            return Ok(false);
        };

        let message = StreamMessage {
            event: SSE_EVENT_NAME.to_string(),
            data: Value::Object(stamp(id, event_name, data)),
        };

        match sender.send(message) {
            Ok(_) => Ok(true),
            Err(_) => {
                debug!(stream_id = id, event_name, "No subscribers on stream");
                Ok(false)
            }
        }
    }

    /// Close stream `id`, notifying subscribers first
    pub fn close(&self, id: &str) -> Result<bool> {
        self.send(id, names::stream::CLOSING, Map::new())?;

        let mut streams = self.streams.write().map_err(|e| {
            EventsError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;
        Ok(streams.remove(id).is_some())
    }
}

fn stamp(id: &str, event_name: &str, mut data: Map<String, Value>) -> Map<String, Value> {
    let timestamp = Utc::now().timestamp_micros() as f64 / 1_000_000.0;
    data.insert("stream_id".to_string(), Value::String(id.to_string()));
    data.insert("timestamp".to_string(), Value::from(timestamp));
    data.insert("type".to_string(), Value::String(event_name.to_string()));
    data
}

/// Observer that mirrors dispatched events onto a stream
#[derive(Debug)]
pub struct StreamObserver {
    id: String,
    stream_id: String,
    hub: Arc<EventStreamHub>,
    state: ObserverState,
}

impl StreamObserver {
    /// Forward events to `stream_id` on `hub`
    pub fn new(stream_id: impl Into<String>, hub: Arc<EventStreamHub>) -> Self {
        let stream_id = stream_id.into();
        Self {
            id: format!("stream:{}", stream_id),
            stream_id,
            hub,
            state: ObserverState::default(),
        }
    }

    /// Enable/disable flag
    pub fn state(&self) -> &ObserverState {
        &self.state
    }
}

impl EventObserver for StreamObserver {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.state.is_enabled()
    }

    fn handle_event(&self, event_name: &str, event: &mut Event, _: &EventDispatcher) -> bool {
        if let Err(e) = self.hub.send(&self.stream_id, event_name, event.to_array()) {
            debug!(stream_id = %self.stream_id, "Failed to forward event: {}", e);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_requires_id() {
        let hub = EventStreamHub::default();
        assert!(matches!(hub.create("  "), Err(EventsError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_send_stamps_message() {
        let hub = EventStreamHub::default();
        let mut rx = hub.create("s1").unwrap();

        let mut data = Map::new();
        data.insert("hello".to_string(), json!("world"));
        assert!(hub.send("s1", names::stream::PING, data).unwrap());

        let message = rx.recv().await.unwrap();
        assert_eq!(message.event, "dsp.event");
        assert_eq!(message.data["hello"], "world");
        assert_eq!(message.data["stream_id"], "s1");
        assert_eq!(message.data["type"], "event_stream.ping");
        assert!(message.data["timestamp"].as_f64().unwrap() > 0.0);
    }

    #[test]
    fn test_unknown_stream() {
        let hub = EventStreamHub::default();
        assert!(!hub.is_valid_stream_id("nope"));
        assert!(!hub.send("nope", "x", Map::new()).unwrap());
    }

    #[tokio::test]
    async fn test_create_existing_subscribes() {
        let hub = EventStreamHub::default();
        let _first = hub.create("s1").unwrap();
        let mut second = hub.create("s1").unwrap();

        hub.send("s1", "x", Map::new()).unwrap();
        assert_eq!(second.recv().await.unwrap().data["type"], "x");
    }

    #[tokio::test]
    async fn test_close_notifies() {
        let hub = EventStreamHub::default();
        let mut rx = hub.create("s1").unwrap();

        assert!(hub.close("s1").unwrap());
        assert!(!hub.is_valid_stream_id("s1"));
        assert_eq!(rx.recv().await.unwrap().data["type"], "event_stream.closing");
    }

    #[test]
    fn test_sse_frame() {
        let message = StreamMessage {
            event: SSE_EVENT_NAME.to_string(),
            data: json!({"a": 1}),
        };
        let frame = message.to_sse();
        assert!(frame.starts_with("event: dsp.event\ndata: {\n"));
        assert!(frame.ends_with("}\n\n"));
    }
}
