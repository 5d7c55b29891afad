//! DSP Event System
//!
//! Request interception through observers, event scripts and listeners.
//!
//! # Overview
//!
//! REST resource handlers and platform code raise named events such as
//! `user.created`. The dispatcher passes each event through three stages:
//!
//! 1. **Observers** (`observer`): process-wide, may veto the event
//! 2. **Scripts** (`scripts`): external files mapped to the event name that
//!    receive the payload and may replace it or stop propagation
//! 3. **Listeners** (`registry`): in-process callbacks, `Class::method`
//!    references and webhook URLs, run by descending priority
//!
//! Listener and script tables are persisted per dispatcher identity in the
//! event store (`store`) and restored when the next dispatcher opens.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use dsp_events::{ConfigLoader, EventDispatcher, RequestContext};
//!
//! let config = Arc::new(ConfigLoader::load()?);
//! let mut dispatcher = EventDispatcher::builder(config)
//!     .request(RequestContext::new("/rest/user"))
//!     .open()
//!     .await?;
//!
//! dispatcher.add_listener("user.created", "https://example.test/hook", 0)?;
//! let event = dispatcher.dispatch("user.created", None).await?;
//! dispatcher.close().await?;
//! ```
//!
//! # Error Handling
//!
//! Script failures and listener errors abort the dispatch and are returned as
//! [`EventsError`]. Webhook failures, missing scripts and unknown listener
//! shapes are logged and never abort a dispatch.

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod methods;
pub mod names;
pub mod observer;
pub mod registry;
pub mod sandbox;
pub mod scripts;
pub mod store;
pub mod stream;
pub mod types;
pub mod webhook;

pub use config::{ConfigLoader, ConfigValidator, EventConfig};
pub use dispatcher::{EventDispatcher, EventDispatcherBuilder};
pub use error::{EventsError, Result};
pub use methods::MethodRegistry;
pub use observer::{EventObserver, ObserverRegistry, ObserverState};
pub use registry::{
    EventSubscriber, InProcessListener, ListenerHandler, ListenerInput, ListenerKey,
    ListenerRegistry, Subscription,
};
pub use sandbox::{EventEnvelope, SandboxBuilder};
pub use scripts::{
    EventMap, EventMapSource, FileEventMap, MethodInfo, ProcessScriptRunner, ScriptOutput,
    ScriptResolver, ScriptRunner, StaticEventMap,
};
pub use store::{EventStore, EventTables};
pub use stream::{EventStreamHub, StreamMessage, StreamObserver};
pub use types::{DispatchOutcome, Event, RequestContext};
pub use webhook::{WebhookBatchError, WebhookSender};
