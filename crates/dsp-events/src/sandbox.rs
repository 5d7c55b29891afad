//! Sandbox envelope handed to scripts and webhooks
//!
//! The envelope has five sections:
//!
//! - `event`: id, name, trigger path, propagation flag and dispatcher id
//! - `request`: the flattened event plus `received_at`, path and method
//! - `platform`: an API stub and a configuration snapshot
//! - `details`: free-form context supplied by the caller
//! - `payload`: the event data, with single records wrapped in a list

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::config::EventConfig;
use crate::types::{keys, Event, RequestContext};

/// Event section of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopeEvent {
    pub id: String,
    pub name: String,
    pub trigger: String,
    pub stop_propagation: bool,
    pub dispatcher_id: String,
}

/// Platform section of the envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePlatform {
    /// Placeholder for the platform API surface exposed to scripts
    pub api: Map<String, Value>,
    pub config: Value,
}

/// The normalized structure scripts and webhooks receive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event: EnvelopeEvent,
    pub request: Map<String, Value>,
    pub platform: EnvelopePlatform,
    pub details: Map<String, Value>,
    pub payload: Value,
}

impl EventEnvelope {
    /// The payload section
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    /// Replace the payload after a script changed the event
    pub fn set_payload(&mut self, event: &Event) {
        self.payload = normalize_payload(event.data());
        self.event.stop_propagation = event.is_propagation_stopped();
    }

    /// Envelope as JSON
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Builds envelopes for one dispatcher
#[derive(Debug, Clone, Copy)]
pub struct SandboxBuilder<'a> {
    config: &'a EventConfig,
    request: &'a RequestContext,
}

impl<'a> SandboxBuilder<'a> {
    /// Builder for a dispatcher running `config` for `request`
    pub fn new(config: &'a EventConfig, request: &'a RequestContext) -> Self {
        Self { config, request }
    }

    /// Build the envelope for `event` dispatched as `event_name`
    pub fn build(&self, event_name: &str, event: &Event, details: Map<String, Value>) -> EventEnvelope {
        let mut request = event.to_array();
        request.insert(
            "received_at".to_string(),
            Value::String(self.request.received_at.to_rfc3339()),
        );
        request.insert("path".to_string(), Value::String(self.request.path_info.clone()));
        if let Some(method) = &self.request.method {
            request.insert("method".to_string(), Value::String(method.clone()));
        }

        EventEnvelope {
            event: EnvelopeEvent {
                id: event.id().to_string(),
                name: event_name.to_string(),
                trigger: self.request.path_info.clone(),
                stop_propagation: event.is_propagation_stopped(),
                dispatcher_id: self.config.dispatcher_id.clone(),
            },
            request,
            platform: EnvelopePlatform {
                api: Map::new(),
                config: self.config_snapshot(),
            },
            details,
            payload: normalize_payload(event.data()),
        }
    }

    fn config_snapshot(&self) -> Value {
        json!({
            "dispatcher_id": self.config.dispatcher_id,
            "log_events": self.config.log_events,
            "log_all_events": self.config.log_all_events,
            "enable_rest_events": self.config.enable_rest_events,
            "enable_platform_events": self.config.enable_platform_events,
            "enable_event_scripts": self.config.enable_event_scripts,
            "enable_event_observers": self.config.enable_event_observers,
            "script_extension": self.config.script_extension,
        })
    }
}

/// Wrap a single `record` object into a one-element list
pub fn normalize_payload(data: &Map<String, Value>) -> Value {
    let mut payload = data.clone();
    if let Some(record) = payload.get_mut(keys::RECORD) {
        if record.is_object() {
            *record = Value::Array(vec![record.take()]);
        }
    }
    Value::Object(payload)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record_wrapped() {
        let event = Event::with_data("user.created", json!({"record": {"id": 1}}));
        assert_eq!(
            normalize_payload(event.data()),
            json!({"record": [{"id": 1}]})
        );
    }

    #[test]
    fn test_record_list_untouched() {
        let event = Event::with_data("user.created", json!({"record": [{"id": 1}], "meta": 2}));
        assert_eq!(
            normalize_payload(event.data()),
            json!({"record": [{"id": 1}], "meta": 2})
        );
    }

    #[test]
    fn test_envelope_sections() {
        let config = EventConfig::default().with_dispatcher_id("tenant-a");
        let request = RequestContext::new("/rest/user").with_method("POST");
        let event = Event::with_data("user.created", json!({"record": {"id": 1}}));

        let mut details = Map::new();
        details.insert("source".to_string(), json!("test"));
        let envelope = SandboxBuilder::new(&config, &request).build("user.created", &event, details);
        let value = envelope.to_value();

        assert_eq!(value["event"]["name"], "user.created");
        assert_eq!(value["event"]["trigger"], "/user");
        assert_eq!(value["event"]["dispatcher_id"], "tenant-a");
        assert_eq!(value["event"]["id"], event.id());
        assert_eq!(value["request"]["path"], "/user");
        assert_eq!(value["request"]["method"], "POST");
        assert_eq!(value["request"]["event_name"], "user.created");
        assert_eq!(value["platform"]["config"]["enable_event_scripts"], true);
        assert_eq!(value["details"]["source"], "test");
        assert_eq!(value["payload"], json!({"record": [{"id": 1}]}));
    }

    #[test]
    fn test_request_keeps_both_timestamps() {
        let config = EventConfig::default();
        let request = RequestContext::new("/rest/user");
        let event = Event::new("user.created");

        let value = SandboxBuilder::new(&config, &request)
            .build("user.created", &event, Map::new())
            .to_value();

        assert_eq!(value["request"]["timestamp"], event.timestamp().to_rfc3339());
        assert_eq!(
            value["request"]["received_at"],
            request.received_at.to_rfc3339()
        );
    }
}
