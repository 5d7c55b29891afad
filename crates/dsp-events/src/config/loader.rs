//! Configuration loader for the event system
//!
//! Configuration is merged from, lowest precedence first:
//! 1. Built-in defaults
//! 2. User configuration (`~/.dsp/events.yaml`)
//! 3. Project configuration (`.dsp/events.yaml`)
//! 4. `DSP_*` environment variables

use std::fs;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use super::{ConfigValidator, EventConfig};
use crate::error::{EventsError, Result};

const CONFIG_DIR: &str = ".dsp";
const CONFIG_FILE: &str = "events.yaml";

/// Configuration loader for [`EventConfig`]
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load, merge and validate the configuration
    ///
    /// # Errors
    ///
    /// Returns an error if a configuration file exists but cannot be read or
    /// parsed, or if the merged result fails validation.
    pub fn load() -> Result<EventConfig> {
        let mut merged = Value::Mapping(Default::default());

        if let Some(user_path) = Self::user_config_path() {
            if let Some(user) = Self::read_yaml(&user_path)? {
                merge_yaml(&mut merged, user);
            }
        }

        if let Some(project) = Self::read_yaml(&Self::project_config_path())? {
            merge_yaml(&mut merged, project);
        }

        let mut config: EventConfig = serde_yaml::from_value(merged)?;
        Self::apply_overrides(&mut config, |key| std::env::var(key).ok());
        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Load a single configuration file without env overrides
    ///
    /// A missing file yields the defaults.
    pub fn load_from_path(path: &Path) -> Result<EventConfig> {
        let config = match Self::read_yaml(path)? {
            Some(value) => serde_yaml::from_value(value)?,
            None => EventConfig::default(),
        };
        ConfigValidator::validate(&config)?;
        Ok(config)
    }

    /// Apply `DSP_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(config: &mut EventConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let flags: [(&str, &mut bool); 6] = [
            ("DSP_LOG_EVENTS", &mut config.log_events),
            ("DSP_LOG_ALL_EVENTS", &mut config.log_all_events),
            ("DSP_ENABLE_REST_EVENTS", &mut config.enable_rest_events),
            ("DSP_ENABLE_PLATFORM_EVENTS", &mut config.enable_platform_events),
            ("DSP_ENABLE_EVENT_SCRIPTS", &mut config.enable_event_scripts),
            ("DSP_ENABLE_EVENT_OBSERVERS", &mut config.enable_event_observers),
        ];

        for (key, slot) in flags {
            if let Some(value) = lookup(key).as_deref().and_then(parse_flag) {
                debug!(key, value, "Config override from environment");
                *slot = value;
            }
        }

        if let Some(path) = lookup("DSP_SCRIPT_PATH").filter(|p| !p.is_empty()) {
            config.script_path = PathBuf::from(path);
        }
    }

    fn project_config_path() -> PathBuf {
        PathBuf::from(CONFIG_DIR).join(CONFIG_FILE)
    }

    fn user_config_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    fn read_yaml(path: &Path) -> Result<Option<Value>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path).map_err(|e| {
            EventsError::InvalidConfiguration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        debug!(path = %path.display(), "Loaded event configuration");

        match serde_yaml::from_str::<Value>(&content)? {
            Value::Null => Ok(None),
            value => Ok(Some(value)),
        }
    }
}

/// Deep-merge `overlay` into `base`; overlay mappings win key by key.
fn merge_yaml(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge_yaml(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ConfigLoader::load_from_path(&dir.path().join("nope.yaml")).unwrap();
        assert_eq!(config, EventConfig::default());
    }

    #[test]
    fn test_load_from_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.yaml");
        fs::write(&path, "script_extension: php\nscan_ttl_secs: 5\n").unwrap();

        let config = ConfigLoader::load_from_path(&path).unwrap();
        assert_eq!(config.script_extension, "php");
        assert_eq!(config.scan_ttl_secs, 5);
    }

    #[test]
    fn test_load_rejects_invalid_values() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.yaml");
        fs::write(&path, "script_timeout_ms: 0\n").unwrap();

        let result = ConfigLoader::load_from_path(&path);
        assert!(matches!(result, Err(EventsError::ValidationError(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DSP_ENABLE_EVENT_SCRIPTS", "false"),
            ("DSP_LOG_ALL_EVENTS", "1"),
            ("DSP_ENABLE_REST_EVENTS", "maybe"),
            ("DSP_SCRIPT_PATH", "/srv/scripts"),
        ]
        .into_iter()
        .collect();

        let mut config = EventConfig::default();
        ConfigLoader::apply_overrides(&mut config, |key| env.get(key).map(|v| v.to_string()));

        assert!(!config.enable_event_scripts);
        assert!(config.log_all_events);
        assert!(config.enable_rest_events);
        assert_eq!(config.script_path, PathBuf::from("/srv/scripts"));
    }

    #[test]
    fn test_merge_yaml_nested() {
        let mut base: Value =
            serde_yaml::from_str("webhook:\n  timeout_ms: 100\n  retry_count: 2\n").unwrap();
        let overlay: Value = serde_yaml::from_str("webhook:\n  timeout_ms: 500\n").unwrap();
        merge_yaml(&mut base, overlay);

        let config: EventConfig = serde_yaml::from_value(base).unwrap();
        assert_eq!(config.webhook.timeout_ms, 500);
        assert_eq!(config.webhook.retry_count, 2);
    }
}
