//! Inbound event callback tables.

use super::frame::{Frame, Message};
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{trace, warn};

/// Callback invoked with an inbound event's arguments.
pub type EventCallback = Arc<dyn Fn(&[Value]) + Send + Sync>;

/// Event name to callbacks, shared between the public handle and whoever
/// owns the physical connection.
#[derive(Clone, Default)]
pub struct EventHandlers {
    callbacks: Arc<RwLock<HashMap<String, Vec<EventCallback>>>>,
}

impl EventHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for an event name.
    pub fn on<F>(&self, event: impl Into<String>, callback: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.callbacks
            .write()
            .entry(event.into())
            .or_default()
            .push(Arc::new(callback));
    }

    /// Invoke every callback registered for `message.event`. Returns how many
    /// ran.
    pub fn dispatch(&self, message: &Message) -> usize {
        // Clone the list out so callbacks may register more handlers.
        let callbacks: Vec<EventCallback> = self
            .callbacks
            .read()
            .get(&message.event)
            .cloned()
            .unwrap_or_default();

        trace!(event = %message.event, handlers = callbacks.len(), "dispatching event");
        for callback in &callbacks {
            callback(&message.args);
        }
        callbacks.len()
    }

    /// Decode a raw frame and dispatch it. Malformed frames are dropped.
    pub fn dispatch_raw(&self, text: &str) -> Option<usize> {
        match Frame::decode(text).and_then(Frame::into_message) {
            Ok(message) => Some(self.dispatch(&message)),
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dispatch_by_name() {
        let handlers = EventHandlers::new();
        let hits = Arc::new(AtomicUsize::new(0));
        {
            let hits = Arc::clone(&hits);
            handlers.on("ping", move |args| {
                assert_eq!(args, &[json!(1)]);
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }

        assert_eq!(handlers.dispatch(&Message::new("ping", vec![json!(1)])), 1);
        assert_eq!(handlers.dispatch(&Message::new("pong", vec![])), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dispatch_raw_drops_garbage() {
        let handlers = EventHandlers::new();
        handlers.on("ping", |_| {});

        assert_eq!(handlers.dispatch_raw("{oops"), None);
        assert_eq!(
            handlers.dispatch_raw(r#"{"type":"message","payload":["ping"]}"#),
            Some(1)
        );
    }
}
