//! Reactive values and self-rerunning computations.

use super::context::Context;
use super::registry::ListenerRegistry;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// A value whose readers are re-run when it changes.
///
/// Reading through [`ReactiveCell::get`] inside a running context registers
/// that context; every write invalidates all registered contexts.
pub struct ReactiveCell<T> {
    value: Arc<RwLock<T>>,
    listeners: ListenerRegistry,
}

impl<T> Clone for ReactiveCell<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            listeners: self.listeners.clone(),
        }
    }
}

impl<T: Clone> ReactiveCell<T> {
    pub fn new(value: T) -> Self {
        Self {
            value: Arc::new(RwLock::new(value)),
            listeners: ListenerRegistry::new(),
        }
    }

    /// Read the value, registering the current context.
    pub fn get(&self) -> T {
        self.listeners.register_current();
        self.value.read().clone()
    }

    /// Read the value without registering.
    pub fn peek(&self) -> T {
        self.value.read().clone()
    }

    /// Read through a closure, registering the current context.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.listeners.register_current();
        f(&self.value.read())
    }

    /// Replace the value and invalidate readers.
    pub fn set(&self, value: T) {
        *self.value.write() = value;
        self.listeners.invalidate_all();
    }

    /// Mutate the value in place and invalidate readers.
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let result = f(&mut self.value.write());
        self.listeners.invalidate_all();
        result
    }

    /// Number of contexts currently listening.
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

struct ComputationInner {
    func: Mutex<Box<dyn FnMut() + Send>>,
    current: Mutex<Option<Context>>,
    stopped: AtomicBool,
    runs: AtomicU64,
}

/// Handle to a computation started with [`autorun`].
///
/// The computation keeps re-running until [`Computation::stop`] is called;
/// dropping the handle does not stop it.
#[derive(Clone)]
pub struct Computation {
    inner: Arc<ComputationInner>,
}

/// Run `f` now and again every time something it read is invalidated.
pub fn autorun<F>(f: F) -> Computation
where
    F: FnMut() + Send + 'static,
{
    let inner = Arc::new(ComputationInner {
        func: Mutex::new(Box::new(f)),
        current: Mutex::new(None),
        stopped: AtomicBool::new(false),
        runs: AtomicU64::new(0),
    });
    rerun(&inner);
    Computation { inner }
}

fn rerun(inner: &Arc<ComputationInner>) {
    if inner.stopped.load(Ordering::SeqCst) {
        return;
    }

    let context = Context::new();
    *inner.current.lock() = Some(context.clone());
    {
        let mut func = inner.func.lock();
        let body: &mut (dyn FnMut() + Send) = &mut **func;
        context.run(body);
    }
    inner.runs.fetch_add(1, Ordering::SeqCst);

    // Registered after the run so a self-invalidating body re-runs here
    // instead of re-entering the body lock.
    let again = Arc::clone(inner);
    context.on_invalidate(move || rerun(&again));
}

impl Computation {
    /// Stop re-running. The current context is invalidated so registries
    /// drop it.
    pub fn stop(&self) {
        self.inner.stopped.store(true, Ordering::SeqCst);
        let current = self.inner.current.lock().take();
        if let Some(context) = current {
            context.invalidate();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.stopped.load(Ordering::SeqCst)
    }

    /// How many times the body has run.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(Ordering::SeqCst)
    }
}
