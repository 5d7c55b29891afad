//! Output formatting for event commands

use std::collections::BTreeMap;

use serde_json::{json, Value};

use crate::error::Result;
use crate::registry::ListenerHandler;
use crate::scripts::ScriptTable;
use crate::types::{DispatchOutcome, Event};

fn kind(handler: &ListenerHandler) -> &'static str {
    match handler {
        ListenerHandler::InProcess(_) => "callback",
        ListenerHandler::ExternalMethod { .. } => "method",
        ListenerHandler::Webhook(_) => "webhook",
        ListenerHandler::Unresolved(_) => "unresolved",
    }
}

/// Format listeners as a table, in execution order per event
pub fn format_listeners_table(listeners: &BTreeMap<String, Vec<ListenerHandler>>) -> String {
    if listeners.values().all(Vec::is_empty) {
        return "No listeners found".to_string();
    }

    let mut output = String::new();
    output.push_str("Event                          | #  | Kind       | Listener\n");
    output.push_str("-------------------------------|----|------------|---------------------------\n");

    for (event, handlers) in listeners {
        let event = if event.chars().count() > 30 {
            format!("{}...", event.chars().take(27).collect::<String>())
        } else {
            event.clone()
        };

        for (index, handler) in handlers.iter().enumerate() {
            output.push_str(&format!(
                "{:<30} | {:<2} | {:<10} | {}\n",
                event,
                index + 1,
                kind(handler),
                handler
            ));
        }
    }

    output
}

/// Format listeners as JSON
pub fn format_listeners_json(listeners: &BTreeMap<String, Vec<ListenerHandler>>) -> Result<String> {
    let value: BTreeMap<&str, Vec<Value>> = listeners
        .iter()
        .map(|(event, handlers)| {
            let handlers = handlers
                .iter()
                .map(|h| json!({"kind": kind(h), "listener": h.to_string()}))
                .collect();
            (event.as_str(), handlers)
        })
        .collect();

    Ok(serde_json::to_string_pretty(&value)?)
}

/// Format the script table
pub fn format_scripts_table(scripts: &ScriptTable) -> String {
    if scripts.is_empty() {
        return "No scripts mapped".to_string();
    }

    let mut output = String::new();
    for (event, paths) in scripts {
        output.push_str(&format!("{}\n", event));
        for path in paths {
            output.push_str(&format!("  - {}\n", path.display()));
        }
    }
    output
}

/// Format the script table as JSON
pub fn format_scripts_json(scripts: &ScriptTable) -> Result<String> {
    Ok(serde_json::to_string_pretty(scripts)?)
}

/// Format a dispatched event and its outcome
pub fn format_dispatch_result(event: &Event, outcome: DispatchOutcome) -> Result<String> {
    Ok(serde_json::to_string_pretty(&json!({
        "outcome": outcome,
        "event": event.to_array(),
    }))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn listeners() -> BTreeMap<String, Vec<ListenerHandler>> {
        BTreeMap::from([(
            "user.created".to_string(),
            vec![
                ListenerHandler::parse("https://example.test/hook", None).unwrap(),
                ListenerHandler::parse("Audit::record", None).unwrap(),
            ],
        )])
    }

    #[test]
    fn test_listeners_table() {
        let table = format_listeners_table(&listeners());
        assert!(table.contains("webhook"));
        assert!(table.contains("Audit::record"));
        assert_eq!(format_listeners_table(&BTreeMap::new()), "No listeners found");
    }

    #[test]
    fn test_listeners_json() {
        let json: Value = serde_json::from_str(&format_listeners_json(&listeners()).unwrap()).unwrap();
        assert_eq!(json["user.created"][1]["kind"], "method");
        assert_eq!(json["user.created"][0]["listener"], "https://example.test/hook");
    }

    #[test]
    fn test_scripts_table() {
        let scripts = ScriptTable::from([(
            "user.created".to_string(),
            vec![PathBuf::from("/scripts/user.created.js")],
        )]);
        assert!(format_scripts_table(&scripts).contains("  - /scripts/user.created.js"));
        assert_eq!(format_scripts_table(&ScriptTable::new()), "No scripts mapped");
    }

    #[test]
    fn test_dispatch_result() {
        let event = Event::new("user.created");
        let json: Value =
            serde_json::from_str(&format_dispatch_result(&event, DispatchOutcome::NotDispatched).unwrap())
                .unwrap();
        assert_eq!(json["outcome"], "not_dispatched");
        assert_eq!(json["event"]["event_name"], "user.created");
    }
}
