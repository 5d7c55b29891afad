//! Event observers
//!
//! Observers see every event before scripts and listeners do, and can veto
//! it by returning `false` from [`EventObserver::handle_event`]. The list of
//! observers lives in an [`ObserverRegistry`] that callers share between
//! dispatchers explicitly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::dispatcher::EventDispatcher;
use crate::error::{EventsError, Result};
use crate::types::Event;

/// An observer notified before scripts and listeners
pub trait EventObserver: Send + Sync {
    /// Stable observer id, used for de-duplication
    fn id(&self) -> &str;

    /// Whether the observer currently wants events
    fn is_enabled(&self) -> bool {
        true
    }

    /// Handle `event`; return `false` to halt the dispatch
    fn handle_event(&self, event_name: &str, event: &mut Event, dispatcher: &EventDispatcher) -> bool;
}

/// Enable/disable flag for observer implementations
#[derive(Debug)]
pub struct ObserverState {
    enabled: AtomicBool,
}

impl ObserverState {
    /// New state, enabled or not
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
        }
    }

    /// Enable the observer
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
    }

    /// Disable the observer
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
    }

    /// Current state
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

impl Default for ObserverState {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Ordered, shared list of observers
#[derive(Default)]
pub struct ObserverRegistry {
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

impl ObserverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `observer` unless one with the same id is registered
    pub fn add(&self, observer: Arc<dyn EventObserver>) -> Result<bool> {
        let mut observers = self.observers.write().map_err(|e| {
            EventsError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        if observers.iter().any(|o| o.id() == observer.id()) {
            return Ok(false);
        }

        observers.push(observer);
        Ok(true)
    }

    /// Remove the observer with `id`
    pub fn remove(&self, id: &str) -> Result<bool> {
        let mut observers = self.observers.write().map_err(|e| {
            EventsError::StorageError(format!("Failed to acquire write lock: {}", e))
        })?;

        let before = observers.len();
        observers.retain(|o| o.id() != id);
        Ok(observers.len() != before)
    }

    /// Observers in registration order
    pub fn snapshot(&self) -> Result<Vec<Arc<dyn EventObserver>>> {
        let observers = self
            .observers
            .read()
            .map_err(|e| EventsError::StorageError(format!("Failed to acquire read lock: {}", e)))?;

        Ok(observers.clone())
    }

    /// Registered observer ids
    pub fn ids(&self) -> Result<Vec<String>> {
        Ok(self
            .snapshot()?
            .iter()
            .map(|o| o.id().to_string())
            .collect())
    }

    /// Whether no observers are registered
    pub fn is_empty(&self) -> bool {
        self.observers
            .read()
            .map(|observers| observers.is_empty())
            .unwrap_or(true)
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("observers", &self.ids().unwrap_or_default())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Named {
        id: String,
        state: ObserverState,
    }

    impl EventObserver for Named {
        fn id(&self) -> &str {
            &self.id
        }

        fn is_enabled(&self) -> bool {
            self.state.is_enabled()
        }

        fn handle_event(&self, _: &str, _: &mut Event, _: &EventDispatcher) -> bool {
            true
        }
    }

    fn named(id: &str) -> Arc<dyn EventObserver> {
        Arc::new(Named {
            id: id.to_string(),
            state: ObserverState::default(),
        })
    }

    #[test]
    fn test_dedup_by_id() {
        let registry = ObserverRegistry::new();
        assert!(registry.add(named("audit")).unwrap());
        assert!(!registry.add(named("audit")).unwrap());
        assert!(registry.add(named("stream")).unwrap());

        assert_eq!(registry.ids().unwrap(), vec!["audit", "stream"]);
    }

    #[test]
    fn test_remove() {
        let registry = ObserverRegistry::new();
        registry.add(named("audit")).unwrap();

        assert!(registry.remove("audit").unwrap());
        assert!(!registry.remove("audit").unwrap());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_state_toggle() {
        let state = ObserverState::default();
        assert!(state.is_enabled());
        state.disable();
        assert!(!state.is_enabled());
        state.enable();
        assert!(state.is_enabled());
    }
}
