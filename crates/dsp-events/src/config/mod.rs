//! Event system configuration
//!
//! [`EventConfig`] is read once at process start and shared between
//! dispatchers as an `Arc<EventConfig>`. Nothing mutates it afterwards; a
//! dispatcher that needs different toggles is opened with a different config.

mod loader;
mod validator;

use std::path::PathBuf;
use std::time::Duration;

use dsp_http::HttpConfig;
use serde::{Deserialize, Serialize};

pub use loader::ConfigLoader;
pub use validator::ConfigValidator;

/// Configuration for the event dispatcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventConfig {
    /// Stable identity used as the persistence key and in envelopes
    pub dispatcher_id: String,

    /// Log each handled listener
    pub log_events: bool,

    /// Log every dispatched event
    pub log_all_events: bool,

    /// Dispatch events raised by REST resource handlers
    pub enable_rest_events: bool,

    /// Dispatch events raised by internal platform code
    pub enable_platform_events: bool,

    /// Run scripts mapped to events
    pub enable_event_scripts: bool,

    /// Notify registered observers
    pub enable_event_observers: bool,

    /// Private script directory
    pub script_path: PathBuf,

    /// Script file extension, without the dot
    pub script_extension: String,

    /// Interpreter used by the process script runner
    pub script_interpreter: String,

    /// Extra interpreter arguments placed before the script path
    pub script_args: Vec<String>,

    /// Hard per-script timeout in milliseconds
    pub script_timeout_ms: u64,

    /// Minimum interval between automatic script re-scans, in seconds
    pub scan_ttl_secs: u64,

    /// Directory for the disk-backed event store
    pub cache_path: PathBuf,

    /// Optional JSON route/method/metadata map
    pub event_map_path: Option<PathBuf>,

    /// HTTP settings for webhook listeners
    pub webhook: HttpConfig,
}

impl Default for EventConfig {
    fn default() -> Self {
        Self {
            dispatcher_id: "default".to_string(),
            log_events: false,
            log_all_events: false,
            enable_rest_events: true,
            enable_platform_events: true,
            enable_event_scripts: true,
            enable_event_observers: true,
            script_path: PathBuf::from("storage/.private/scripts"),
            script_extension: "js".to_string(),
            script_interpreter: "node".to_string(),
            script_args: Vec::new(),
            script_timeout_ms: 30_000,
            scan_ttl_secs: 60,
            cache_path: PathBuf::from(".dsp/cache"),
            event_map_path: None,
            webhook: HttpConfig::webhook(),
        }
    }
}

impl EventConfig {
    /// Per-script timeout
    pub fn script_timeout(&self) -> Duration {
        Duration::from_millis(self.script_timeout_ms)
    }

    /// Interval between automatic re-scans
    pub fn scan_ttl(&self) -> Duration {
        Duration::from_secs(self.scan_ttl_secs)
    }

    /// True when every dispatch stage is switched off
    pub fn all_disabled(&self) -> bool {
        !self.enable_rest_events
            && !self.enable_platform_events
            && !self.enable_event_scripts
            && !self.enable_event_observers
    }

    /// Same config with a different dispatcher identity
    pub fn with_dispatcher_id(mut self, id: impl Into<String>) -> Self {
        self.dispatcher_id = id.into();
        self
    }

    /// Same config pointed at another script directory
    pub fn with_script_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.script_path = path.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EventConfig::default();
        assert_eq!(config.dispatcher_id, "default");
        assert!(config.enable_event_scripts);
        assert!(!config.log_events);
        assert_eq!(config.scan_ttl(), Duration::from_secs(60));
        assert_eq!(config.script_timeout(), Duration::from_secs(30));
        assert!(!config.all_disabled());
    }

    #[test]
    fn test_partial_yaml() {
        let yaml = r#"
dispatcher_id: tenant-a
enable_rest_events: false
webhook:
  timeout_ms: 2000
"#;
        let config: EventConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.dispatcher_id, "tenant-a");
        assert!(!config.enable_rest_events);
        assert!(config.enable_platform_events);
        assert_eq!(config.webhook.timeout_ms, 2000);
        assert_eq!(config.script_extension, "js");
    }

    #[test]
    fn test_all_disabled() {
        let config = EventConfig {
            enable_rest_events: false,
            enable_platform_events: false,
            enable_event_scripts: false,
            enable_event_observers: false,
            ..Default::default()
        };
        assert!(config.all_disabled());
    }
}
