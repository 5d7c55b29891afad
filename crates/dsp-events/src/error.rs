//! Error types for the event system
//!
//! Errors fall into two groups. Conditions the dispatcher recovers from on its
//! own (a missing script mapping, an unknown listener shape, a failed webhook)
//! are logged and never reach the caller. Everything in [`EventsError`] is
//! surfaced:
//!
//! 1. **Configuration errors**: a listener that is neither callable nor a
//!    resolvable URL is rejected at registration time with
//!    [`EventsError::InvalidListener`].
//!
//! 2. **Script errors**: a failing, timed out or cancelled script aborts the
//!    whole dispatch.
//!
//! 3. **Listener errors**: errors returned by in-process and external-method
//!    listeners propagate to the caller of `dispatch`.
//!
//! 4. **Storage errors**: the persistent store could not be read or written.
//!
//! # Examples
//!
//! ```ignore
//! match dispatcher.dispatch("user.created", None).await {
//!     Ok(event) => println!("data: {:?}", event.data()),
//!     Err(EventsError::ScriptFailed { script, message }) => eprintln!("{script}: {message}"),
//!     Err(e) => eprintln!("Error: {}", e),
//! }
//! ```

use thiserror::Error;

/// Errors that can occur in the event system
#[derive(Debug, Error)]
pub enum EventsError {
    /// A listener handler could not be validated
    ///
    /// Raised synchronously by `add_listener` when a string handler is neither
    /// a `Class::method` reference nor an absolute or host-relative URL. This is
    /// the "bad request" of the REST layer and is never retried.
    #[error("Invalid listener: {0}")]
    InvalidListener(String),

    /// An event script failed
    ///
    /// The script exited unsuccessfully or produced output that could not be
    /// read. Aborts the dispatch.
    #[error("Script '{script}' failed: {message}")]
    ScriptFailed { script: String, message: String },

    /// A script or webhook batch ran past its deadline
    ///
    /// The u64 contains the timeout in milliseconds.
    #[error("Execution timed out after {0}ms")]
    Timeout(u64),

    /// The dispatcher's cancellation token fired while work was in flight
    #[error("Dispatch was cancelled")]
    Cancelled,

    /// An in-process listener returned an error
    #[error("Listener '{listener}' failed: {message}")]
    ListenerFailed { listener: String, message: String },

    /// An external method listener returned an error
    #[error("Error executing event method '{listener}': {message}")]
    MethodFailed { listener: String, message: String },

    /// Storage or registry error
    ///
    /// Common causes:
    /// - Lock poisoning (concurrent access issue)
    /// - Persisted tables that no longer deserialize
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Invalid configuration
    #[error("Invalid event configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration validation error
    #[error("Configuration validation error: {0}")]
    ValidationError(String),

    /// An argument was rejected (for example an empty stream id)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Cache backend error
    #[error("Cache error: {0}")]
    Cache(#[from] dsp_cache::CacheError),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] dsp_http::HttpError),

    /// YAML (de)serialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_yaml::Error),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl EventsError {
    /// Build a listener failure from any displayable error
    pub fn listener(listener: impl Into<String>, err: impl std::fmt::Display) -> Self {
        EventsError::ListenerFailed {
            listener: listener.into(),
            message: err.to_string(),
        }
    }
}

/// Result type for event operations
pub type Result<T> = std::result::Result<T, EventsError>;
