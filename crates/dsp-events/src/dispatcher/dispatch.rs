//! Dispatch pipeline: observers, then scripts, then listeners

use std::path::Path;
use std::time::Instant;

use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use super::EventDispatcher;
use crate::error::{EventsError, Result};
use crate::methods::MethodLookup;
use crate::names;
use crate::registry::ListenerHandler;
use crate::scripts::ScriptOutput;
use crate::types::{keys, DispatchOutcome, Event};
use crate::webhook::WebhookBatch;

/// How a stage ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Nothing ran
    Skipped,
    /// Something ran and propagation continues
    Handled,
    /// Propagation was stopped
    Stopped,
}

#[derive(Debug, Default)]
struct ListenerStage {
    handled: usize,
    undispatched: bool,
    stopped: bool,
}

impl EventDispatcher {
    /// Dispatch `event_name`, creating an event if none is given
    ///
    /// Returns the event after every stage had its turn.
    ///
    /// # Errors
    ///
    /// Script failures, listener errors and cancellation abort the dispatch.
    pub async fn dispatch(&mut self, event_name: &str, event: Option<Event>) -> Result<Event> {
        let mut event = event.unwrap_or_else(|| Event::new(event_name));
        self.dispatch_event(event_name, &mut event).await?;
        Ok(event)
    }

    /// Dispatch `event` as `event_name`, reporting what happened
    pub async fn dispatch_event(
        &mut self,
        event_name: &str,
        event: &mut Event,
    ) -> Result<DispatchOutcome> {
        if self.config.all_disabled() {
            return Ok(DispatchOutcome::NotDispatched);
        }

        if self.config.log_all_events {
            debug!(event_name, trigger = %self.request.path_info, "Triggered: \"{}\"", event_name);
        }

        let started = Instant::now();

        if !self.notify_observers(event_name, event)? {
            return Ok(DispatchOutcome::Stopped);
        }

        let scripts = self.run_event_scripts(event_name, event).await?;
        if scripts == Stage::Stopped {
            return Ok(DispatchOutcome::Stopped);
        }

        let rebuilt = if event_name == names::swagger::CACHE_REBUILT {
            let mapped = self.rebuild_scripts().await?;
            info!(mapped, "Script mappings rebuilt after documentation cache rebuild");
            true
        } else {
            false
        };

        let listeners = self.notify_listeners(event_name, event).await?;

        debug!(
            event_name,
            duration_ms = started.elapsed().as_millis() as u64,
            handled = listeners.handled,
            "Dispatch complete"
        );

        if listeners.stopped {
            return Ok(DispatchOutcome::Stopped);
        }

        if listeners.undispatched {
            return Ok(DispatchOutcome::NotDispatched);
        }

        if scripts == Stage::Handled || rebuilt || listeners.handled > 0 {
            Ok(DispatchOutcome::Dispatched)
        } else {
            Ok(DispatchOutcome::NotDispatched)
        }
    }

    /// Returns `false` if an observer vetoed the event
    fn notify_observers(&self, event_name: &str, event: &mut Event) -> Result<bool> {
        if !self.config.enable_event_observers {
            return Ok(true);
        }

        for observer in self.observers.snapshot()? {
            if !observer.is_enabled() {
                continue;
            }

            if !observer.handle_event(event_name, event, self) {
                info!(event_name, observer = observer.id(), "Propagation stopped by observer");
                return Ok(false);
            }
        }

        Ok(true)
    }

    async fn run_event_scripts(&self, event_name: &str, event: &mut Event) -> Result<Stage> {
        if !self.config.enable_event_scripts {
            return Ok(Stage::Skipped);
        }

        let mut scripts = self.scripts.scripts_for(event_name).to_vec();
        if scripts.is_empty() {
            scripts.extend(self.scripts.exists_for_event(event_name));
        }

        if scripts.is_empty() {
            return Ok(Stage::Skipped);
        }

        let mut envelope = self.sandbox().build(event_name, event, Map::new());
        let label = format!("{}.{}", event_name, self.config.script_extension);

        for script in &scripts {
            let started = Instant::now();
            let output = self
                .run_script(script, &label, envelope.payload())
                .await
                .map_err(|e| {
                    error!(
                        event_name,
                        script = %script.display(),
                        error = %e,
                        "Exception running event script"
                    );
                    e
                })?;

            if let Some(result) = output.result {
                let mut update = Map::new();
                update.insert(keys::DATA.to_string(), result);
                event.from_array(&update);
            }
            if output.stop_propagation {
                event.stop_propagation();
            }
            envelope.set_payload(event);

            if !output.output.trim().is_empty() {
                debug!(script = %label, output = %output.output.trim(), "Script output");
            }
            debug!(
                script = %script.display(),
                duration_ms = started.elapsed().as_millis() as u64,
                "Event script finished"
            );

            if event.is_propagation_stopped() {
                info!(event_name, "Propagation stopped by script.");
                return Ok(Stage::Stopped);
            }
        }

        Ok(Stage::Handled)
    }

    /// Run one script under the timeout and cancellation token
    async fn run_script(&self, script: &Path, label: &str, payload: &Value) -> Result<ScriptOutput> {
        let timeout = self.config.script_timeout();

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EventsError::Cancelled),
            result = tokio::time::timeout(timeout, self.runner.run_script(script, label, payload)) => {
                match result {
                    Ok(output) => output,
                    Err(_) => {
                        warn!(
                            script = %script.display(),
                            timeout_ms = self.config.script_timeout_ms,
                            "Event script exceeded timeout"
                        );
                        Err(EventsError::Timeout(self.config.script_timeout_ms))
                    }
                }
            }
        }
    }

    async fn notify_listeners(&self, event_name: &str, event: &mut Event) -> Result<ListenerStage> {
        let mut stage = ListenerStage::default();
        if !self.config.enable_rest_events && !self.config.enable_platform_events {
            return Ok(stage);
        }

        let listeners = self.listeners.get(event_name).to_vec();
        let mut batch = WebhookBatch::new();

        for listener in &listeners {
            if !listener.is_webhook() {
                self.send_webhooks(event_name, event, &mut batch).await?;
            }

            let handled = match listener {
                ListenerHandler::InProcess(callback) => {
                    callback.call(event, event_name, self)?;
                    true
                }
                ListenerHandler::ExternalMethod { class, method } => {
                    self.call_method(class, method, event_name, event)?
                }
                ListenerHandler::Webhook(url) => {
                    batch.push(url.clone());
                    true
                }
                ListenerHandler::Unresolved(raw) => {
                    warn!(event_name, listener = %raw, "Undispatched: unknown listener shape");
                    stage.undispatched = true;
                    false
                }
            };

            if handled {
                stage.handled += 1;
                if self.config.log_events && !self.config.log_all_events {
                    debug!(
                        listener = %listener,
                        "Dispatcher: event \"{}\" triggered by /{}",
                        event_name,
                        self.request.path_info.trim_start_matches('/')
                    );
                }
            }

            if event.is_propagation_stopped() {
                stage.stopped = true;
                break;
            }
        }

        self.send_webhooks(event_name, event, &mut batch).await?;
        Ok(stage)
    }

    /// Returns whether the method existed and ran
    fn call_method(&self, class: &str, method: &str, event_name: &str, event: &mut Event) -> Result<bool> {
        let callable = match self.methods.lookup(class, method) {
            MethodLookup::Found(callable) => callable,
            MethodLookup::MissingClass => {
                warn!("Class {} is not registered. Cannot call {} listener", class, event_name);
                return Ok(false);
            }
            MethodLookup::MissingMethod => {
                warn!(
                    "Method {}::{} is not callable. Cannot call {} listener",
                    class, method, event_name
                );
                return Ok(false);
            }
        };

        callable(event, event_name, self).map_err(|e| {
            let listener = format!("{}::{}", class, method);
            error!(event_name, listener = %listener, "Exception running event method");
            EventsError::MethodFailed {
                listener,
                message: e.to_string(),
            }
        })?;

        Ok(true)
    }

    /// Send and empty the pending webhook batch
    ///
    /// Delivery failures are logged, never returned.
    async fn send_webhooks(&self, event_name: &str, event: &Event, batch: &mut WebhookBatch) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let urls = batch.take();
        let body = self.sandbox().build(event_name, event, Map::new()).to_value();

        let result = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(EventsError::Cancelled),
            result = self.webhooks.send(&urls, &body) => result,
        };

        match result {
            Ok(delivered) => debug!(event_name, delivered = delivered.len(), "Webhooks delivered"),
            Err(e) => {
                e.log(event_name);
                warn!(event_name, "{}", e);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::config::EventConfig;
    use crate::methods::MethodRegistry;
    use crate::observer::{EventObserver, ObserverRegistry, ObserverState};
    use crate::registry::InProcessListener;
    use crate::scripts::ScriptRunner;
    use crate::store::EventStore;

    struct NoScripts;

    #[async_trait]
    impl ScriptRunner for NoScripts {
        async fn run_script(&self, _: &Path, _: &str, _: &Value) -> Result<ScriptOutput> {
            Ok(ScriptOutput::default())
        }
    }

    struct Veto;

    impl EventObserver for Veto {
        fn id(&self) -> &str {
            "veto"
        }

        fn handle_event(&self, _: &str, _: &mut Event, _: &EventDispatcher) -> bool {
            false
        }
    }

    struct SwitchableVeto {
        state: ObserverState,
    }

    impl EventObserver for SwitchableVeto {
        fn id(&self) -> &str {
            "switchable-veto"
        }

        fn is_enabled(&self) -> bool {
            self.state.is_enabled()
        }

        fn handle_event(&self, _: &str, _: &mut Event, _: &EventDispatcher) -> bool {
            false
        }
    }

    async fn dispatcher(config: EventConfig) -> EventDispatcher {
        EventDispatcher::builder(Arc::new(config.with_script_path("/nonexistent/scripts")))
            .store(EventStore::memory())
            .script_runner(Arc::new(NoScripts))
            .open()
            .await
            .unwrap()
    }

    fn recorder(log: &Arc<Mutex<Vec<String>>>, name: &str) -> InProcessListener {
        let log = Arc::clone(log);
        let name = name.to_string();
        InProcessListener::with_id(name.clone(), move |_, _, _| {
            log.lock().unwrap().push(name.clone());
            Ok(())
        })
    }

    #[tokio::test]
    async fn test_nothing_registered_is_not_dispatched() {
        let mut d = dispatcher(EventConfig::default()).await;
        let mut event = Event::with_data("user.created", json!({"a": 1}));

        let outcome = d.dispatch_event("user.created", &mut event).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::NotDispatched);
        assert_eq!(event.data()["a"], 1);
        assert!(!event.is_dirty());
    }

    #[tokio::test]
    async fn test_all_toggles_off() {
        let config = EventConfig {
            enable_rest_events: false,
            enable_platform_events: false,
            enable_event_scripts: false,
            enable_event_observers: false,
            ..Default::default()
        };
        let mut d = dispatcher(config).await;
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        d.add_listener(
            "user.created",
            InProcessListener::new(move |_, _, _| {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
            0,
        )
        .unwrap();

        let mut event = Event::new("user.created");
        let outcome = d.dispatch_event("user.created", &mut event).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::NotDispatched);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_listeners_run_by_priority() {
        let mut d = dispatcher(EventConfig::default()).await;
        let log = Arc::new(Mutex::new(Vec::new()));

        d.add_listener("user.created", recorder(&log, "low"), -1).unwrap();
        d.add_listener("user.created", recorder(&log, "high"), 10).unwrap();
        d.add_listener("user.created", recorder(&log, "mid"), 0).unwrap();

        let outcome = d
            .dispatch_event("user.created", &mut Event::new("user.created"))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Dispatched);
        assert_eq!(*log.lock().unwrap(), vec!["high", "mid", "low"]);
    }

    #[tokio::test]
    async fn test_listener_stops_propagation() {
        let mut d = dispatcher(EventConfig::default()).await;
        let log = Arc::new(Mutex::new(Vec::new()));

        d.add_listener(
            "user.created",
            InProcessListener::new(|event, _, _| {
                event.stop_propagation();
                Ok(())
            }),
            5,
        )
        .unwrap();
        d.add_listener("user.created", recorder(&log, "late"), 0).unwrap();

        let outcome = d
            .dispatch_event("user.created", &mut Event::new("user.created"))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Stopped);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_listener_error_propagates() {
        let mut d = dispatcher(EventConfig::default()).await;
        d.add_listener(
            "user.created",
            InProcessListener::new(|_, _, _| Err(EventsError::listener("audit", "disk full"))),
            0,
        )
        .unwrap();

        let result = d.dispatch("user.created", None).await;
        assert!(matches!(result, Err(EventsError::ListenerFailed { .. })));
    }

    #[tokio::test]
    async fn test_observer_veto() {
        let observers = Arc::new(ObserverRegistry::new());
        observers.add(Arc::new(Veto)).unwrap();

        let mut d = EventDispatcher::builder(Arc::new(EventConfig::default()))
            .store(EventStore::memory())
            .script_runner(Arc::new(NoScripts))
            .observers(observers)
            .open()
            .await
            .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        d.add_listener("user.created", recorder(&log, "never"), 0).unwrap();

        let outcome = d
            .dispatch_event("user.created", &mut Event::new("user.created"))
            .await
            .unwrap();

        assert_eq!(outcome, DispatchOutcome::Stopped);
        assert!(log.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_external_method_listeners() {
        let methods = MethodRegistry::new().with("Audit", "record", |event, _, _| {
            event.data_mut().insert("audited".to_string(), json!(true));
            Ok(())
        });

        let mut d = EventDispatcher::builder(Arc::new(EventConfig::default()))
            .store(EventStore::memory())
            .script_runner(Arc::new(NoScripts))
            .methods(Arc::new(methods))
            .open()
            .await
            .unwrap();

        d.add_listener("user.created", "Mailer::send", 1).unwrap();
        d.add_listener("user.created", "Audit::record", 0).unwrap();

        let mut event = Event::new("user.created");
        let outcome = d.dispatch_event("user.created", &mut event).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Dispatched);
        assert_eq!(event.data()["audited"], true);
    }

    #[tokio::test]
    async fn test_external_method_error_is_wrapped() {
        let methods =
            MethodRegistry::new().with("Audit", "record", |_, _, _| Err(EventsError::Cancelled));

        let mut d = EventDispatcher::builder(Arc::new(EventConfig::default()))
            .store(EventStore::memory())
            .script_runner(Arc::new(NoScripts))
            .methods(Arc::new(methods))
            .open()
            .await
            .unwrap();
        d.add_listener("user.created", "Audit::record", 0).unwrap();

        let result = d.dispatch("user.created", None).await;
        assert!(matches!(
            result,
            Err(EventsError::MethodFailed { ref listener, .. }) if listener == "Audit::record"
        ));
    }

    #[tokio::test]
    async fn test_missing_method_only_is_not_dispatched() {
        let mut d = dispatcher(EventConfig::default()).await;
        d.add_listener("user.created", "Mailer::send", 0).unwrap();

        let mut event = Event::new("user.created");
        let outcome = d.dispatch_event("user.created", &mut event).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::NotDispatched);
        assert!(!event.is_propagation_stopped());
    }

    #[tokio::test]
    async fn test_disabled_observer_is_skipped() {
        let veto = Arc::new(SwitchableVeto {
            state: ObserverState::new(false),
        });
        let observers = Arc::new(ObserverRegistry::new());
        observers.add(veto.clone()).unwrap();

        let mut d = EventDispatcher::builder(Arc::new(
            EventConfig::default().with_script_path("/nonexistent/scripts"),
        ))
        .store(EventStore::memory())
        .script_runner(Arc::new(NoScripts))
        .observers(observers)
        .open()
        .await
        .unwrap();

        let log = Arc::new(Mutex::new(Vec::new()));
        d.add_listener("user.created", recorder(&log, "audit"), 0).unwrap();

        let outcome = d
            .dispatch_event("user.created", &mut Event::new("user.created"))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Dispatched);
        assert_eq!(*log.lock().unwrap(), vec!["audit"]);

        veto.state.enable();
        let outcome = d
            .dispatch_event("user.created", &mut Event::new("user.created"))
            .await
            .unwrap();
        assert_eq!(outcome, DispatchOutcome::Stopped);
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
