//! Configuration validation

use super::EventConfig;
use crate::error::{EventsError, Result};

/// Validates an [`EventConfig`] before a dispatcher is built from it
///
/// Checks that:
/// - The dispatcher id and script extension are non-empty
/// - Timeouts and the scan TTL are non-zero
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::ValidationError`] describing the first problem.
    pub fn validate(config: &EventConfig) -> Result<()> {
        if config.dispatcher_id.trim().is_empty() {
            return Err(EventsError::ValidationError(
                "dispatcher_id cannot be empty".to_string(),
            ));
        }

        let extension = config.script_extension.trim_start_matches('.');
        if extension.is_empty() {
            return Err(EventsError::ValidationError(
                "script_extension cannot be empty".to_string(),
            ));
        }

        if config.script_interpreter.trim().is_empty() {
            return Err(EventsError::ValidationError(
                "script_interpreter cannot be empty".to_string(),
            ));
        }

        if config.script_timeout_ms == 0 {
            return Err(EventsError::ValidationError(
                "script_timeout_ms must be greater than zero".to_string(),
            ));
        }

        if config.scan_ttl_secs == 0 {
            return Err(EventsError::ValidationError(
                "scan_ttl_secs must be greater than zero".to_string(),
            ));
        }

        if config.webhook.timeout_ms == 0 {
            return Err(EventsError::ValidationError(
                "webhook.timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}
