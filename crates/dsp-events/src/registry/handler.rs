//! Listener handler shapes
//!
//! A handler's shape is decided once, when it is registered, and carried as a
//! [`ListenerHandler`] variant from then on. Each variant has a content-derived
//! [`ListenerKey`] used for duplicate detection.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;
use url::Url;
use uuid::Uuid;

use crate::dispatcher::EventDispatcher;
use crate::error::{EventsError, Result};
use crate::types::Event;

/// Signature shared by in-process listeners and external methods
pub type ListenerFn = dyn Fn(&mut Event, &str, &EventDispatcher) -> Result<()> + Send + Sync;

static METHOD_PATTERN: OnceLock<Option<Regex>> = OnceLock::new();

fn method_pattern() -> Option<&'static Regex> {
    METHOD_PATTERN
        .get_or_init(|| {
            Regex::new(r"^([A-Za-z_\\][A-Za-z0-9_\\]*)::([A-Za-z_][A-Za-z0-9_]*)$").ok()
        })
        .as_ref()
}

/// An in-process callable listener
///
/// Two listeners are the same listener when they share an id. Cloning keeps
/// the id, so registering a clone twice is idempotent.
#[derive(Clone)]
pub struct InProcessListener {
    id: String,
    callback: Arc<ListenerFn>,
}

impl InProcessListener {
    /// Wrap `callback` under a fresh id
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&mut Event, &str, &EventDispatcher) -> Result<()> + Send + Sync + 'static,
    {
        Self::with_id(Uuid::new_v4().to_string(), callback)
    }

    /// Wrap `callback` under a caller-chosen id
    pub fn with_id<F>(id: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&mut Event, &str, &EventDispatcher) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            callback: Arc::new(callback),
        }
    }

    /// Listener id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Invoke the callback
    pub fn call(&self, event: &mut Event, name: &str, dispatcher: &EventDispatcher) -> Result<()> {
        (self.callback)(event, name, dispatcher)
    }
}

impl fmt::Debug for InProcessListener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InProcessListener")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

/// A validated listener
#[derive(Debug, Clone)]
pub enum ListenerHandler {
    /// Callable living in this process
    InProcess(InProcessListener),

    /// `Class::method` reference resolved through the method registry
    ExternalMethod { class: String, method: String },

    /// HTTP(S) endpoint notified with the sandbox envelope
    Webhook(Url),

    /// A persisted handler that no longer matches any known shape
    ///
    /// Only produced when restoring tables from the store. Dispatch logs it as
    /// undispatched.
    Unresolved(String),
}

/// Content-derived identity of a listener
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerKey(String);

impl ListenerKey {
    /// Key as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ListenerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl ListenerHandler {
    /// Validate a string handler
    ///
    /// Accepts `Class::method` references, absolute http(s) URLs, and
    /// host-relative paths when `base_url` is known.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::InvalidListener`] for anything else.
    pub fn parse(raw: &str, base_url: Option<&Url>) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(EventsError::InvalidListener(
                "Listener cannot be empty".to_string(),
            ));
        }

        if let Some(handler) = Self::parse_method(raw) {
            return Ok(handler);
        }

        match Url::parse(raw) {
            Ok(url) if is_web_url(&url) => Ok(ListenerHandler::Webhook(url)),
            Ok(url) => Err(EventsError::InvalidListener(format!(
                "Unsupported listener scheme '{}': {}",
                url.scheme(),
                raw
            ))),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = base_url.ok_or_else(|| {
                    EventsError::InvalidListener(format!(
                        "Relative listener '{}' needs a request host",
                        raw
                    ))
                })?;
                let joined = base.join(raw).map_err(|e| {
                    EventsError::InvalidListener(format!("{}: {}", raw, e))
                })?;
                if is_web_url(&joined) {
                    Ok(ListenerHandler::Webhook(joined))
                } else {
                    Err(EventsError::InvalidListener(raw.to_string()))
                }
            }
            Err(e) => Err(EventsError::InvalidListener(format!("{}: {}", raw, e))),
        }
    }

    /// Rebuild a handler from its persisted form without failing
    pub fn restore(raw: &str) -> Self {
        if let Some(handler) = Self::parse_method(raw) {
            return handler;
        }

        match Url::parse(raw) {
            Ok(url) if is_web_url(&url) => ListenerHandler::Webhook(url),
            _ => ListenerHandler::Unresolved(raw.to_string()),
        }
    }

    fn parse_method(raw: &str) -> Option<Self> {
        let captures = method_pattern()?.captures(raw)?;
        Some(ListenerHandler::ExternalMethod {
            class: captures.get(1)?.as_str().to_string(),
            method: captures.get(2)?.as_str().to_string(),
        })
    }

    /// Content-derived identity
    pub fn key(&self) -> ListenerKey {
        ListenerKey(match self {
            ListenerHandler::InProcess(listener) => format!("callback:{}", listener.id()),
            ListenerHandler::ExternalMethod { class, method } => {
                format!("method:{}::{}", class, method)
            }
            ListenerHandler::Webhook(url) => format!("webhook:{}", url),
            ListenerHandler::Unresolved(raw) => format!("unresolved:{}", raw),
        })
    }

    /// Form written to the persistent store
    ///
    /// In-process callables cannot outlive the process and return `None`.
    pub fn persisted(&self) -> Option<String> {
        match self {
            ListenerHandler::InProcess(_) => None,
            ListenerHandler::ExternalMethod { class, method } => {
                Some(format!("{}::{}", class, method))
            }
            ListenerHandler::Webhook(url) => Some(url.to_string()),
            ListenerHandler::Unresolved(raw) => Some(raw.clone()),
        }
    }

    /// Whether this is a webhook listener
    pub fn is_webhook(&self) -> bool {
        matches!(self, ListenerHandler::Webhook(_))
    }
}

impl fmt::Display for ListenerHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenerHandler::InProcess(listener) => write!(f, "callback({})", listener.id()),
            ListenerHandler::ExternalMethod { class, method } => write!(f, "{}::{}", class, method),
            ListenerHandler::Webhook(url) => write!(f, "{}", url),
            ListenerHandler::Unresolved(raw) => write!(f, "{}", raw),
        }
    }
}

fn is_web_url(url: &Url) -> bool {
    matches!(url.scheme(), "http" | "https") && url.has_host()
}

/// Anything `add_listener` accepts
#[derive(Debug, Clone)]
pub enum ListenerInput {
    /// An already validated handler
    Handler(ListenerHandler),
    /// A string still to be validated
    Raw(String),
}

impl ListenerInput {
    /// Validate into a handler
    pub fn resolve(self, base_url: Option<&Url>) -> Result<ListenerHandler> {
        match self {
            ListenerInput::Handler(handler) => Ok(handler),
            ListenerInput::Raw(raw) => ListenerHandler::parse(&raw, base_url),
        }
    }
}

impl From<ListenerHandler> for ListenerInput {
    fn from(handler: ListenerHandler) -> Self {
        ListenerInput::Handler(handler)
    }
}

impl From<InProcessListener> for ListenerInput {
    fn from(listener: InProcessListener) -> Self {
        ListenerInput::Handler(ListenerHandler::InProcess(listener))
    }
}

impl From<&str> for ListenerInput {
    fn from(raw: &str) -> Self {
        ListenerInput::Raw(raw.to_string())
    }
}

impl From<String> for ListenerInput {
    fn from(raw: String) -> Self {
        ListenerInput::Raw(raw)
    }
}
