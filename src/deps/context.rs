//! Invalidation contexts.

use crate::types::ContextId;
use parking_lot::Mutex;
use std::cell::RefCell;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

type Callback = Box<dyn FnOnce() + Send>;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    /// Contexts currently running on this thread, innermost last.
    static CURRENT: RefCell<Vec<Context>> = const { RefCell::new(Vec::new()) };
}

struct ContextState {
    invalidated: bool,
    callbacks: Vec<Callback>,
}

struct ContextInner {
    id: ContextId,
    state: Mutex<ContextState>,
}

/// A unit of reactive computation that can be invalidated once.
///
/// Cloning yields another handle to the same context.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a fresh, valid context.
    pub fn new() -> Self {
        let id = ContextId(NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed));
        Self {
            inner: Arc::new(ContextInner {
                id,
                state: Mutex::new(ContextState {
                    invalidated: false,
                    callbacks: Vec::new(),
                }),
            }),
        }
    }

    pub fn id(&self) -> ContextId {
        self.inner.id
    }

    pub fn is_invalidated(&self) -> bool {
        self.inner.state.lock().invalidated
    }

    /// Invalidate the context.
    ///
    /// The first call fires every registered callback once, in registration
    /// order. Later calls do nothing.
    pub fn invalidate(&self) {
        let callbacks = {
            let mut state = self.inner.state.lock();
            if state.invalidated {
                return;
            }
            state.invalidated = true;
            std::mem::take(&mut state.callbacks)
        };

        for callback in callbacks {
            callback();
        }
    }

    /// Register a callback for invalidation.
    ///
    /// If the context is already invalidated the callback runs right here,
    /// synchronously.
    pub fn on_invalidate<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.inner.state.lock();
        if state.invalidated {
            drop(state);
            callback();
        } else {
            state.callbacks.push(Box::new(callback));
        }
    }

    /// The innermost context running on this thread, if any.
    pub fn current() -> Option<Context> {
        CURRENT.with(|stack| stack.borrow().last().cloned())
    }

    /// Run `f` with this context as the current one.
    pub fn run<R>(&self, f: impl FnOnce() -> R) -> R {
        CURRENT.with(|stack| stack.borrow_mut().push(self.clone()));
        let _guard = PopGuard;
        f()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.inner.id)
            .field("invalidated", &self.is_invalidated())
            .finish()
    }
}

/// Pops the current-context stack even if the computation panics.
struct PopGuard;

impl Drop for PopGuard {
    fn drop(&mut self) {
        CURRENT.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}
