//! Well-known event names

/// Events raised by the API documentation layer
pub mod swagger {
    /// The documentation cache was cleared
    pub const CACHE_CLEARED: &str = "swagger.cache_cleared";

    /// The documentation cache was rebuilt; forces a script re-scan
    pub const CACHE_REBUILT: &str = "swagger.cache_rebuilt";
}

/// Events raised on server-sent event streams
pub mod stream {
    /// A stream was opened
    pub const CREATED: &str = "event_stream.created";
    /// A stream is about to close
    pub const CLOSING: &str = "event_stream.closing";
    /// Keep-alive ping
    pub const PING: &str = "event_stream.ping";
    /// Keep-alive reply
    pub const PONG: &str = "event_stream.pong";
}

/// Whether `name` is a stream lifecycle event
pub fn is_stream_event(name: &str) -> bool {
    matches!(
        name,
        stream::CREATED | stream::CLOSING | stream::PING | stream::PONG
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_events() {
        assert!(is_stream_event("event_stream.ping"));
        assert!(!is_stream_event(swagger::CACHE_REBUILT));
    }
}
