//! Self-cleaning registry of listening contexts.

use super::context::Context;
use crate::types::ContextId;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

/// Contexts waiting to hear that some value changed.
///
/// An entry disappears as soon as its context is invalidated, whoever
/// invalidates it, so the registry never holds dead listeners.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    listeners: Arc<Mutex<BTreeMap<ContextId, Context>>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a context. Returns false if it was already registered.
    pub fn register(&self, context: &Context) -> bool {
        let id = context.id();
        {
            let mut listeners = self.listeners.lock();
            if listeners.contains_key(&id) {
                return false;
            }
            listeners.insert(id, context.clone());
        }

        let weak: Weak<Mutex<BTreeMap<ContextId, Context>>> = Arc::downgrade(&self.listeners);
        context.on_invalidate(move || {
            if let Some(listeners) = weak.upgrade() {
                listeners.lock().remove(&id);
            }
        });
        true
    }

    /// Register whatever context is current on this thread.
    pub fn register_current(&self) {
        if let Some(context) = Context::current() {
            self.register(&context);
        }
    }

    /// Invalidate every registered context.
    pub fn invalidate_all(&self) {
        // Snapshot first: invalidation callbacks re-enter the registry.
        let contexts: Vec<Context> = self.listeners.lock().values().cloned().collect();
        for context in contexts {
            context.invalidate();
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_once_per_context() {
        let registry = ListenerRegistry::new();
        let ctx = Context::new();

        assert!(registry.register(&ctx));
        assert!(!registry.register(&ctx));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_entry_removed_when_context_invalidated() {
        let registry = ListenerRegistry::new();
        let ctx = Context::new();
        registry.register(&ctx);

        // Invalidated by someone other than the registry.
        ctx.invalidate();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_invalidate_all_empties_registry() {
        let registry = ListenerRegistry::new();
        let contexts: Vec<Context> = (0..4).map(|_| Context::new()).collect();
        for ctx in &contexts {
            registry.register(ctx);
        }

        registry.invalidate_all();
        assert!(registry.is_empty());
        assert!(contexts.iter().all(Context::is_invalidated));
    }

    #[test]
    fn test_register_invalidated_context_leaves_no_entry() {
        let registry = ListenerRegistry::new();
        let ctx = Context::new();
        ctx.invalidate();

        registry.register(&ctx);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_register_current() {
        let registry = ListenerRegistry::new();
        registry.register_current();
        assert!(registry.is_empty());

        let ctx = Context::new();
        ctx.run(|| registry.register_current());
        assert_eq!(registry.len(), 1);
    }
}
