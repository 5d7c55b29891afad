//! CLI commands for event management
//!
//! Each command runs against one dispatcher, which is saved when the command
//! finishes whether it succeeded or not.

pub mod commands;
pub mod formatter;

pub use commands::{dispatch_event, list_event_listeners, list_listeners, list_scripts, EventCommand};
pub use formatter::{
    format_dispatch_result, format_listeners_json, format_listeners_table, format_scripts_json,
    format_scripts_table,
};

use std::collections::BTreeMap;

use serde_json::Value;

use crate::dispatcher::EventDispatcher;
use crate::error::{EventsError, Result};
use crate::types::Event;

/// Event management CLI interface
pub struct EventCli {
    dispatcher: EventDispatcher,
}

impl EventCli {
    /// CLI operating on `dispatcher`
    pub fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher }
    }

    /// Execute `command`, returning the text to print
    pub async fn execute(self, command: EventCommand) -> Result<String> {
        self.dispatcher
            .scope(move |dispatcher| Box::pin(async move { run(dispatcher, command).await }))
            .await
    }
}

async fn run(dispatcher: &mut EventDispatcher, command: EventCommand) -> Result<String> {
    match command {
        EventCommand::Listeners { event, format } => {
            let listeners = match event {
                Some(name) => BTreeMap::from([(
                    name.clone(),
                    dispatcher.get_listeners(&name).to_vec(),
                )]),
                None => dispatcher.all_listeners(),
            };
            match format.as_deref() {
                Some("json") => format_listeners_json(&listeners),
                _ => Ok(format_listeners_table(&listeners)),
            }
        }
        EventCommand::Scripts { format } => match format.as_deref() {
            Some("json") => format_scripts_json(dispatcher.scripts()),
            _ => Ok(format_scripts_table(dispatcher.scripts())),
        },
        EventCommand::Rescan => {
            let mapped = dispatcher.rebuild_scripts().await?;
            Ok(format!("Mapped scripts for {} event(s)", mapped))
        }
        EventCommand::Flush => {
            dispatcher.flush().await?;
            Ok(format!(
                "Event tables flushed for dispatcher '{}'",
                dispatcher.dispatcher_id()
            ))
        }
        EventCommand::Dispatch { event, data } => {
            let data = match data {
                Some(raw) => serde_json::from_str::<Value>(&raw).map_err(|e| {
                    EventsError::InvalidArgument(format!("Event data is not valid JSON: {}", e))
                })?,
                None => Value::Null,
            };
            let mut record = Event::with_data(&event, data);
            let outcome = dispatcher.dispatch_event(&event, &mut record).await?;
            format_dispatch_result(&record, outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventConfig;
    use crate::store::EventStore;
    use std::sync::Arc;

    async fn cli(store: EventStore) -> EventCli {
        let config = EventConfig::default().with_script_path("/nonexistent/scripts");
        let dispatcher = EventDispatcher::builder(Arc::new(config))
            .store(store)
            .open()
            .await
            .unwrap();
        EventCli::new(dispatcher)
    }

    #[tokio::test]
    async fn test_listeners_empty() {
        let output = cli(EventStore::memory()).await.execute(list_listeners()).await.unwrap();
        assert_eq!(output, "No listeners found");
    }

    #[tokio::test]
    async fn test_dispatch_rejects_bad_json() {
        let result = cli(EventStore::memory())
            .await
            .execute(dispatch_event("user.created", Some("{nope".to_string())))
            .await;
        assert!(matches!(result, Err(EventsError::InvalidArgument(_))));
    }

    #[tokio::test]
    async fn test_dispatch_reports_outcome() {
        let output = cli(EventStore::memory())
            .await
            .execute(dispatch_event("user.created", Some(r#"{"a": 1}"#.to_string())))
            .await
            .unwrap();
        let json: Value = serde_json::from_str(&output).unwrap();
        assert_eq!(json["outcome"], "not_dispatched");
        assert_eq!(json["event"]["data"]["a"], 1);
    }

    #[tokio::test]
    async fn test_flush_clears_store() {
        let store = EventStore::memory();
        let mut dispatcher = EventDispatcher::builder(Arc::new(
            EventConfig::default().with_script_path("/nonexistent/scripts"),
        ))
        .store(store.clone())
        .open()
        .await
        .unwrap();
        dispatcher
            .add_listener("user.created", "https://example.test/hook", 0)
            .unwrap();
        dispatcher.close().await.unwrap();
        assert!(!store.load("default").await.unwrap().listeners.is_empty());

        cli(store.clone()).await.execute(EventCommand::Flush).await.unwrap();
        assert!(store.load("default").await.unwrap().listeners.is_empty());
    }
}
