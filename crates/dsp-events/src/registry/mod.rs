//! Listener registry
//!
//! Listeners are stored per event name in priority buckets. Higher priorities
//! run first; within a bucket, listeners keep their registration order.
//!
//! # Examples
//!
//! ```ignore
//! use dsp_events::registry::{ListenerHandler, ListenerRegistry};
//!
//! let mut registry = ListenerRegistry::new();
//! let hook = ListenerHandler::parse("https://example.test/hook", None)?;
//! registry.add("user.created", hook.clone(), 10);
//!
//! // Adding the same handler again keeps a single entry
//! assert!(!registry.add("user.created", hook, 0));
//! assert_eq!(registry.get("user.created").len(), 1);
//! # Ok::<(), dsp_events::EventsError>(())
//! ```

mod handler;

pub use handler::{InProcessListener, ListenerFn, ListenerHandler, ListenerInput, ListenerKey};

use std::collections::{BTreeMap, HashMap};

/// Persisted form of the listener table: event name, priority, handlers
pub type ListenerTable = BTreeMap<String, BTreeMap<i32, Vec<String>>>;

#[derive(Debug, Clone)]
struct ListenerEntry {
    key: ListenerKey,
    handler: ListenerHandler,
}

/// Priority-ordered listener storage
///
/// The sorted view for an event name is rebuilt whenever that name's
/// buckets change, so reads never sort.
#[derive(Debug, Clone, Default)]
pub struct ListenerRegistry {
    buckets: HashMap<String, BTreeMap<i32, Vec<ListenerEntry>>>,
    sorted: HashMap<String, Vec<ListenerHandler>>,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `event_name` at `priority`
    ///
    /// Returns `true` when the handler was new. A handler with the same key
    /// already registered at any priority is replaced in its existing slot
    /// and `false` is returned.
    pub fn add(&mut self, event_name: &str, handler: ListenerHandler, priority: i32) -> bool {
        let key = handler.key();
        let buckets = self.buckets.entry(event_name.to_string()).or_default();

        let existing = buckets
            .values_mut()
            .flat_map(|bucket| bucket.iter_mut())
            .find(|entry| entry.key == key);

        let added = match existing {
            Some(entry) => {
                entry.handler = handler;
                false
            }
            None => {
                buckets
                    .entry(priority)
                    .or_default()
                    .push(ListenerEntry { key, handler });
                true
            }
        };

        self.resort(event_name);
        added
    }

    /// Remove `handler` from every priority bucket of `event_name`
    ///
    /// Returns whether anything was removed.
    pub fn remove(&mut self, event_name: &str, handler: &ListenerHandler) -> bool {
        let key = handler.key();
        let Some(buckets) = self.buckets.get_mut(event_name) else {
            return false;
        };

        let mut removed = false;
        for bucket in buckets.values_mut() {
            if let Some(index) = bucket.iter().position(|entry| entry.key == key) {
                bucket.remove(index);
                removed = true;
            }
        }

        buckets.retain(|_, bucket| !bucket.is_empty());
        if buckets.is_empty() {
            self.buckets.remove(event_name);
        }

        self.resort(event_name);
        removed
    }

    /// Sorted listeners for `event_name`
    pub fn get(&self, event_name: &str) -> &[ListenerHandler] {
        self.sorted
            .get(event_name)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Sorted listeners for every event name, keyed by name
    pub fn all(&self) -> BTreeMap<String, Vec<ListenerHandler>> {
        self.sorted
            .iter()
            .map(|(name, listeners)| (name.clone(), listeners.clone()))
            .collect()
    }

    /// Whether `event_name` (or any event, for `None`) has listeners
    pub fn has(&self, event_name: Option<&str>) -> bool {
        match event_name {
            Some(name) => !self.get(name).is_empty(),
            None => self.sorted.values().any(|listeners| !listeners.is_empty()),
        }
    }

    /// Number of registered listeners across all events
    pub fn len(&self) -> usize {
        self.sorted.values().map(Vec::len).sum()
    }

    /// Whether the registry holds no listeners
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every listener
    pub fn clear(&mut self) {
        self.buckets.clear();
        self.sorted.clear();
    }

    /// Export the persistable part of the table
    pub fn to_table(&self) -> ListenerTable {
        let mut table = ListenerTable::new();

        for (name, buckets) in &self.buckets {
            let mut persisted = BTreeMap::new();
            for (priority, bucket) in buckets {
                let handlers: Vec<String> = bucket
                    .iter()
                    .filter_map(|entry| entry.handler.persisted())
                    .collect();
                if !handlers.is_empty() {
                    persisted.insert(*priority, handlers);
                }
            }
            if !persisted.is_empty() {
                table.insert(name.clone(), persisted);
            }
        }

        table
    }

    /// Rebuild a registry from its persisted form
    pub fn from_table(table: &ListenerTable) -> Self {
        let mut registry = Self::new();
        for (name, buckets) in table {
            for (priority, handlers) in buckets {
                for raw in handlers {
                    registry.add(name, ListenerHandler::restore(raw), *priority);
                }
            }
        }
        registry
    }

    fn resort(&mut self, event_name: &str) {
        let sorted: Vec<ListenerHandler> = self
            .buckets
            .get(event_name)
            .map(|buckets| {
                buckets
                    .values()
                    .rev()
                    .flat_map(|bucket| bucket.iter().map(|entry| entry.handler.clone()))
                    .collect()
            })
            .unwrap_or_default();

        if sorted.is_empty() {
            self.sorted.remove(event_name);
        } else {
            self.sorted.insert(event_name.to_string(), sorted);
        }
    }
}

/// One listener registration requested by a subscriber
#[derive(Debug, Clone)]
pub struct Subscription {
    /// Event name
    pub event_name: String,
    /// Listener to register
    pub listener: ListenerInput,
    /// Priority (higher runs first)
    pub priority: i32,
}

impl Subscription {
    /// Subscription at priority 0
    pub fn new(event_name: impl Into<String>, listener: impl Into<ListenerInput>) -> Self {
        Self {
            event_name: event_name.into(),
            listener: listener.into(),
            priority: 0,
        }
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

/// A component that knows which events it wants to listen to
pub trait EventSubscriber: Send + Sync {
    /// Listeners this subscriber registers
    fn subscribed_events(&self) -> Vec<Subscription>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hook(url: &str) -> ListenerHandler {
        ListenerHandler::parse(url, None).unwrap()
    }

    fn order(registry: &ListenerRegistry, name: &str) -> Vec<String> {
        registry.get(name).iter().map(|h| h.to_string()).collect()
    }

    #[test]
    fn test_priority_order() {
        let mut registry = ListenerRegistry::new();
        registry.add("user.created", hook("http://a.test/"), 0);
        registry.add("user.created", hook("http://b.test/"), 10);
        registry.add("user.created", hook("http://c.test/"), 0);
        registry.add("user.created", hook("http://d.test/"), -5);

        assert_eq!(
            order(&registry, "user.created"),
            vec!["http://b.test/", "http://a.test/", "http://c.test/", "http://d.test/"]
        );
    }

    #[test]
    fn test_duplicate_replaced_in_slot() {
        let mut registry = ListenerRegistry::new();
        assert!(registry.add("user.created", hook("http://a.test/"), 5));
        registry.add("user.created", hook("http://b.test/"), 0);
        assert!(!registry.add("user.created", hook("http://a.test/"), 0));

        assert_eq!(registry.len(), 2);
        assert_eq!(
            order(&registry, "user.created"),
            vec!["http://a.test/", "http://b.test/"]
        );
    }

    #[test]
    fn test_remove_from_all_buckets() {
        let mut registry = ListenerRegistry::new();
        registry.add("user.created", hook("http://a.test/"), 1);
        registry.add("user.created", hook("http://b.test/"), 2);

        assert!(registry.remove("user.created", &hook("http://a.test/")));
        assert!(!registry.remove("user.created", &hook("http://a.test/")));
        assert_eq!(order(&registry, "user.created"), vec!["http://b.test/"]);

        registry.remove("user.created", &hook("http://b.test/"));
        assert!(!registry.has(Some("user.created")));
        assert!(!registry.has(None));
    }

    #[test]
    fn test_table_skips_in_process() {
        let mut registry = ListenerRegistry::new();
        registry.add(
            "user.created",
            ListenerHandler::InProcess(InProcessListener::new(|_, _, _| Ok(()))),
            0,
        );
        registry.add("user.created", hook("http://a.test/"), 3);

        let table = registry.to_table();
        assert_eq!(table["user.created"][&3], vec!["http://a.test/".to_string()]);
        assert!(!table["user.created"].contains_key(&0));

        let restored = ListenerRegistry::from_table(&table);
        assert_eq!(order(&restored, "user.created"), vec!["http://a.test/"]);
    }
}
