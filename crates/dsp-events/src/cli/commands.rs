//! Event management commands

/// Event management commands
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventCommand {
    /// List listeners, for one event or all of them
    Listeners {
        /// Restrict to this event name
        event: Option<String>,

        /// Output format (table or json)
        format: Option<String>,
    },

    /// List mapped scripts
    Scripts {
        /// Output format (table or json)
        format: Option<String>,
    },

    /// Rebuild script mappings, ignoring the scan TTL
    Rescan,

    /// Clear all stored listener and script tables
    Flush,

    /// Dispatch an event
    Dispatch {
        /// Event name
        event: String,

        /// Event data as a JSON document
        data: Option<String>,
    },
}

/// List all listeners
pub fn list_listeners() -> EventCommand {
    EventCommand::Listeners {
        event: None,
        format: None,
    }
}

/// List listeners of one event
pub fn list_event_listeners(event: impl Into<String>) -> EventCommand {
    EventCommand::Listeners {
        event: Some(event.into()),
        format: None,
    }
}

/// List mapped scripts
pub fn list_scripts() -> EventCommand {
    EventCommand::Scripts { format: None }
}

/// Dispatch `event` with optional JSON `data`
pub fn dispatch_event(event: impl Into<String>, data: Option<String>) -> EventCommand {
    EventCommand::Dispatch {
        event: event.into(),
        data,
    }
}
