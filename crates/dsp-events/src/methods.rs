//! Registry of external methods addressable as `Class::method`

use std::collections::HashMap;
use std::sync::Arc;

use crate::dispatcher::EventDispatcher;
use crate::error::Result;
use crate::registry::ListenerFn;
use crate::types::Event;

/// Lookup result for a `Class::method` listener
pub enum MethodLookup<'a> {
    /// The method exists
    Found(&'a Arc<ListenerFn>),
    /// No class with that name is registered
    MissingClass,
    /// The class exists but has no such method
    MissingMethod,
}

/// Maps class names to their callable methods
#[derive(Clone, Default)]
pub struct MethodRegistry {
    classes: HashMap<String, HashMap<String, Arc<ListenerFn>>>,
}

impl MethodRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `class::method`
    pub fn register<F>(&mut self, class: impl Into<String>, method: impl Into<String>, callable: F)
    where
        F: Fn(&mut Event, &str, &EventDispatcher) -> Result<()> + Send + Sync + 'static,
    {
        self.classes
            .entry(class.into())
            .or_default()
            .insert(method.into(), Arc::new(callable));
    }

    /// Builder form of [`register`](Self::register)
    pub fn with<F>(mut self, class: impl Into<String>, method: impl Into<String>, callable: F) -> Self
    where
        F: Fn(&mut Event, &str, &EventDispatcher) -> Result<()> + Send + Sync + 'static,
    {
        self.register(class, method, callable);
        self
    }

    /// Look up `class::method`
    pub fn lookup(&self, class: &str, method: &str) -> MethodLookup<'_> {
        match self.classes.get(class) {
            None => MethodLookup::MissingClass,
            Some(methods) => match methods.get(method) {
                Some(callable) => MethodLookup::Found(callable),
                None => MethodLookup::MissingMethod,
            },
        }
    }

    /// Whether `class` is registered
    pub fn has_class(&self, class: &str) -> bool {
        self.classes.contains_key(class)
    }
}

impl std::fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<String> = self
            .classes
            .iter()
            .flat_map(|(class, methods)| methods.keys().map(move |m| format!("{}::{}", class, m)))
            .collect();
        names.sort();
        f.debug_struct("MethodRegistry").field("methods", &names).finish()
    }
}
