//! Event dispatcher
//!
//! The dispatcher owns one request's listener and script tables. It is opened
//! through [`EventDispatcherBuilder::open`], which restores the tables from the
//! event store, and must be closed with [`EventDispatcher::close`] (or used
//! through [`EventDispatcher::scope`]) so the tables are written back.
//!
//! # Examples
//!
//! ```ignore
//! let config = Arc::new(ConfigLoader::load()?);
//! let dispatcher = EventDispatcher::builder(config)
//!     .request(RequestContext::new("/rest/user"))
//!     .open()
//!     .await?;
//!
//! let event = dispatcher
//!     .scope(|d| Box::pin(async move { d.dispatch("user.created", None).await }))
//!     .await?;
//! ```

mod dispatch;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use dsp_http::HttpClientTrait;
use futures::future::BoxFuture;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::EventConfig;
use crate::error::Result;
use crate::methods::MethodRegistry;
use crate::observer::{EventObserver, ObserverRegistry};
use crate::registry::{
    EventSubscriber, ListenerHandler, ListenerInput, ListenerRegistry,
};
use crate::sandbox::SandboxBuilder;
use crate::scripts::{
    EventMapSource, FileEventMap, ProcessScriptRunner, ScriptResolver, ScriptRunner, ScriptTable,
    StaticEventMap,
};
use crate::store::{EventStore, EventTables};
use crate::types::RequestContext;
use crate::webhook::WebhookSender;

/// Builder for [`EventDispatcher`]
///
/// Every collaborator has a default derived from the configuration, so
/// `EventDispatcher::builder(config).open()` is enough outside of tests.
pub struct EventDispatcherBuilder {
    config: Arc<EventConfig>,
    request: RequestContext,
    store: Option<EventStore>,
    event_map: Option<Arc<dyn EventMapSource>>,
    runner: Option<Arc<dyn ScriptRunner>>,
    http: Option<Arc<dyn HttpClientTrait>>,
    observers: Option<Arc<ObserverRegistry>>,
    methods: Option<Arc<MethodRegistry>>,
    cancel: Option<CancellationToken>,
}

impl EventDispatcherBuilder {
    fn new(config: Arc<EventConfig>) -> Self {
        Self {
            config,
            request: RequestContext::default(),
            store: None,
            event_map: None,
            runner: None,
            http: None,
            observers: None,
            methods: None,
            cancel: None,
        }
    }

    /// Request this dispatcher serves
    pub fn request(mut self, request: RequestContext) -> Self {
        self.request = request;
        self
    }

    /// Persistent store (default: disk store under `cache_path`)
    pub fn store(mut self, store: EventStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Route map source (default: `event_map_path`, or an empty map)
    pub fn event_map(mut self, source: Arc<dyn EventMapSource>) -> Self {
        self.event_map = Some(source);
        self
    }

    /// Script runner (default: the configured interpreter)
    pub fn script_runner(mut self, runner: Arc<dyn ScriptRunner>) -> Self {
        self.runner = Some(runner);
        self
    }

    /// HTTP client for webhooks (default: built from `webhook`)
    pub fn http_client(mut self, client: Arc<dyn HttpClientTrait>) -> Self {
        self.http = Some(client);
        self
    }

    /// Shared observer registry (default: a fresh, empty one)
    pub fn observers(mut self, observers: Arc<ObserverRegistry>) -> Self {
        self.observers = Some(observers);
        self
    }

    /// External methods reachable as `Class::method` listeners
    pub fn methods(mut self, methods: Arc<MethodRegistry>) -> Self {
        self.methods = Some(methods);
        self
    }

    /// Token that cancels in-flight scripts and webhook batches
    pub fn cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Build the dispatcher and restore its tables
    ///
    /// Failures while restoring are logged. If the stored tables cannot be
    /// read the dispatcher starts empty and never writes back over them; if
    /// only the script scan fails the restored tables are kept.
    ///
    /// # Errors
    ///
    /// Returns an error only if the default HTTP client cannot be built.
    pub async fn open(self) -> Result<EventDispatcher> {
        let config = self.config;

        let http = match self.http {
            Some(client) => client,
            None => dsp_http::shared_client(config.webhook.clone())?,
        };

        let store = self
            .store
            .unwrap_or_else(|| EventStore::disk(config.cache_path.clone()));

        let event_map = self.event_map.unwrap_or_else(|| match &config.event_map_path {
            Some(path) => Arc::new(FileEventMap::new(path.clone())) as Arc<dyn EventMapSource>,
            None => Arc::new(StaticEventMap::default()),
        });

        let runner = self.runner.unwrap_or_else(|| {
            Arc::new(ProcessScriptRunner::new(
                config.script_interpreter.clone(),
                config.script_args.clone(),
            ))
        });

        let mut dispatcher = EventDispatcher {
            scripts: ScriptResolver::new(config.script_path.clone(), config.script_extension.clone()),
            listeners: ListenerRegistry::new(),
            request: self.request,
            store,
            event_map,
            runner,
            webhooks: WebhookSender::new(http),
            observers: self.observers.unwrap_or_default(),
            methods: self.methods.unwrap_or_default(),
            cancel: self.cancel.unwrap_or_else(CancellationToken::new),
            degraded: false,
            config,
        };

        if let Err(e) = dispatcher.restore_tables().await {
            warn!(error = %e, "Event system unavailable at this time.");
            dispatcher.listeners.clear();
            dispatcher.scripts.clear();
            dispatcher.degraded = true;
        } else if let Err(e) = dispatcher.initialize_scripting().await {
            warn!(error = %e, "Event system unavailable at this time.");
        }

        Ok(dispatcher)
    }
}

/// Request-scoped event dispatcher
pub struct EventDispatcher {
    config: Arc<EventConfig>,
    request: RequestContext,
    store: EventStore,
    event_map: Arc<dyn EventMapSource>,
    runner: Arc<dyn ScriptRunner>,
    webhooks: WebhookSender,
    observers: Arc<ObserverRegistry>,
    methods: Arc<MethodRegistry>,
    cancel: CancellationToken,
    listeners: ListenerRegistry,
    scripts: ScriptResolver,
    /// Stored tables could not be read; saving would overwrite them
    degraded: bool,
}

impl EventDispatcher {
    /// Start building a dispatcher for `config`
    pub fn builder(config: Arc<EventConfig>) -> EventDispatcherBuilder {
        EventDispatcherBuilder::new(config)
    }

    async fn restore_tables(&mut self) -> Result<()> {
        let tables = self.store.load(&self.config.dispatcher_id).await?;

        self.listeners = ListenerRegistry::from_table(&tables.listeners);
        for (event_name, paths) in &tables.scripts {
            self.scripts.add_script(event_name, paths.iter().cloned(), true);
        }

        debug!(
            dispatcher_id = %self.config.dispatcher_id,
            listeners = self.listeners.len(),
            scripts = self.scripts.scripts().len(),
            stored_observers = tables.observers.len(),
            "Event tables restored"
        );

        Ok(())
    }

    /// Re-scan unless a scan happened within the TTL and scripts are known
    async fn initialize_scripting(&mut self) -> Result<()> {
        if !self.config.enable_event_scripts {
            return Ok(());
        }

        let last_check = self.store.last_script_check(&self.config.dispatcher_id).await?;
        if last_check.is_none() || self.scripts.is_empty() {
            self.check_mapped_scripts(true, false).await?;
            self.store
                .touch_script_check(&self.config.dispatcher_id, self.config.scan_ttl())
                .await?;
        }

        Ok(())
    }

    /// Persist the tables
    ///
    /// Does nothing when the stored tables could not be read at open time.
    pub async fn save(&self) -> Result<()> {
        if self.degraded {
            debug!(
                dispatcher_id = %self.config.dispatcher_id,
                "Stored tables were unreadable, not saving"
            );
            return Ok(());
        }

        let tables = EventTables {
            listeners: self.listeners.to_table(),
            scripts: self.scripts.scripts().clone(),
            observers: self.observers.ids()?,
        };
        self.store.save(&self.config.dispatcher_id, &tables).await
    }

    /// Persist the tables and release the dispatcher
    pub async fn close(self) -> Result<()> {
        self.save().await
    }

    /// Run `f` with this dispatcher, then save whatever `f` returned
    ///
    /// The tables are saved on success and on error. When both `f` and the
    /// save fail, the error from `f` wins.
    pub async fn scope<T, F>(mut self, f: F) -> Result<T>
    where
        F: for<'a> FnOnce(&'a mut EventDispatcher) -> BoxFuture<'a, Result<T>>,
    {
        let result = f(&mut self).await;
        let saved = self.save().await;

        match (result, saved) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(save_error)) => {
                warn!(error = %save_error, "Failed to save event tables");
                Err(e)
            }
        }
    }

    /// Verify mapped scripts, optionally picking up drop-ins
    ///
    /// With `flush` set, every table is cleared in memory and in the store
    /// instead and nothing is scanned.
    pub async fn check_mapped_scripts(
        &mut self,
        scan_for_new: bool,
        flush: bool,
    ) -> Result<Vec<PathBuf>> {
        if flush {
            self.flush().await?;
            return Ok(Vec::new());
        }

        let map = self.event_map.event_map().await?;
        let found = self.scripts.check_mapped_scripts(&map, scan_for_new);
        if !found.is_empty() {
            debug!(count = found.len(), "Mapped new event scripts");
        }
        Ok(found)
    }

    /// Clear the listener and script tables here and in the store
    pub async fn flush(&mut self) -> Result<()> {
        self.listeners.clear();
        self.scripts.clear();
        self.store.flush_all(&self.config.dispatcher_id).await?;
        self.store.reset_script_check(&self.config.dispatcher_id).await?;
        self.degraded = false;
        debug!(dispatcher_id = %self.config.dispatcher_id, "Event tables flushed");
        Ok(())
    }

    /// Drop the script table and rebuild it from the route map, ignoring the
    /// scan TTL. Returns the number of mapped events.
    pub async fn rebuild_scripts(&mut self) -> Result<usize> {
        self.scripts.clear();
        self.store.reset_script_check(&self.config.dispatcher_id).await?;

        self.check_mapped_scripts(true, false).await?;
        self.store
            .touch_script_check(&self.config.dispatcher_id, self.config.scan_ttl())
            .await?;

        Ok(self.scripts.scripts().len())
    }

    /// Register `listener` for `event_name`
    ///
    /// Returns `true` if the listener was new, `false` if it replaced an
    /// identical one.
    ///
    /// # Errors
    ///
    /// Returns [`EventsError::InvalidListener`](crate::EventsError::InvalidListener)
    /// for strings that are neither `Class::method` nor a resolvable URL.
    pub fn add_listener(
        &mut self,
        event_name: &str,
        listener: impl Into<ListenerInput>,
        priority: i32,
    ) -> Result<bool> {
        let handler = listener.into().resolve(self.request.base_url.as_ref())?;
        let added = self.listeners.add(event_name, handler, priority);

        if added {
            debug!(event_name, priority, "Adding listener");
        } else {
            debug!(event_name, "Replacing listener");
        }

        Ok(added)
    }

    /// Remove `listener` from `event_name`
    pub fn remove_listener(&mut self, event_name: &str, listener: impl Into<ListenerInput>) -> bool {
        let handler = match listener.into() {
            ListenerInput::Handler(handler) => handler,
            ListenerInput::Raw(raw) => ListenerHandler::parse(&raw, self.request.base_url.as_ref())
                .unwrap_or_else(|_| ListenerHandler::restore(&raw)),
        };
        self.listeners.remove(event_name, &handler)
    }

    /// Listeners for `event_name` in execution order
    pub fn get_listeners(&self, event_name: &str) -> &[ListenerHandler] {
        self.listeners.get(event_name)
    }

    /// Listeners for every event, in execution order
    pub fn all_listeners(&self) -> BTreeMap<String, Vec<ListenerHandler>> {
        self.listeners.all()
    }

    /// Whether `event_name` (or any event) has listeners
    pub fn has_listeners(&self, event_name: Option<&str>) -> bool {
        self.listeners.has(event_name)
    }

    /// Register every subscription of `subscriber`
    ///
    /// Returns how many listeners were new.
    pub fn add_subscriber(&mut self, subscriber: &dyn EventSubscriber) -> Result<usize> {
        let mut added = 0;
        for subscription in subscriber.subscribed_events() {
            if self.add_listener(
                &subscription.event_name,
                subscription.listener,
                subscription.priority,
            )? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Remove every subscription of `subscriber`
    pub fn remove_subscriber(&mut self, subscriber: &dyn EventSubscriber) -> usize {
        subscriber
            .subscribed_events()
            .into_iter()
            .filter(|s| self.remove_listener(&s.event_name, s.listener.clone()))
            .count()
    }

    /// Map extra script files to `event_name`
    pub fn add_script<I, P>(&mut self, event_name: &str, paths: I) -> usize
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.scripts.add_script(event_name, paths, false)
    }

    /// The script table
    pub fn scripts(&self) -> &ScriptTable {
        self.scripts.scripts()
    }

    /// Register `observer` in the shared registry
    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) -> Result<bool> {
        self.observers.add(observer)
    }

    /// The shared observer registry
    pub fn observers(&self) -> &Arc<ObserverRegistry> {
        &self.observers
    }

    /// Configuration
    pub fn config(&self) -> &EventConfig {
        &self.config
    }

    /// Request context
    pub fn request(&self) -> &RequestContext {
        &self.request
    }

    /// Whether the stored tables were unreadable when this dispatcher opened
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Dispatcher identity
    pub fn dispatcher_id(&self) -> &str {
        &self.config.dispatcher_id
    }

    /// Cancellation token for in-flight work
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    fn sandbox(&self) -> SandboxBuilder<'_> {
        SandboxBuilder::new(&self.config, &self.request)
    }
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("dispatcher_id", &self.config.dispatcher_id)
            .field("path_info", &self.request.path_info)
            .field("listeners", &self.listeners.len())
            .field("scripts", &self.scripts.scripts().len())
            .finish_non_exhaustive()
    }
}
