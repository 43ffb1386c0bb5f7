//! Suspend-only-the-caller facade over a callback-based driver.

use super::driver::{Connector, Driver, Reply};
use super::types::{
    FindOptions, Found, Selector, UpdateOptions, WriteEvent, WriteFlags, WriteKind,
};
use crate::config::StoreConfig;
use crate::error::{LiveError, Result};
use crate::types::Document;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An operation waiting for the driver to exist.
type DeferredOp = Box<dyn FnOnce(std::result::Result<Arc<dyn Driver>, LiveError>) + Send>;

/// Called for every write the store confirmed, in confirmation order.
pub type WriteObserver = Arc<dyn Fn(&WriteEvent) + Send + Sync>;

/// Handle for removing a write observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

enum Connection {
    /// Store connection not up yet; operations wait here in arrival order.
    Pending(VecDeque<DeferredOp>),
    Ready(Arc<dyn Driver>),
    Failed(LiveError),
}

struct FacadeInner {
    connection: Mutex<Connection>,
    observers: RwLock<Vec<(ObserverId, WriteObserver)>>,
    next_observer: AtomicU64,
}

/// Store operations that read like blocking calls.
///
/// Each call suspends only the task that issued it, on its own reply slot,
/// while the runtime keeps driving every other task. Writes return once the
/// store has confirmed them, so a later read in the same task sees them.
///
/// # Update semantics
///
/// `update` with default options modifies **every** matching document.
/// Pass [`UpdateOptions::single`] or an identity selector to touch one.
#[derive(Clone)]
pub struct StoreFacade {
    inner: Arc<FacadeInner>,
}

impl StoreFacade {
    /// Start connecting through `connector`. Operations issued before the
    /// connection is up are queued and issued, in arrival order, once it is.
    ///
    /// Must be called inside a tokio runtime.
    pub fn connect(connector: &dyn Connector, config: &StoreConfig) -> Self {
        let facade = Self::new(Connection::Pending(VecDeque::new()));

        let (reply, pending) = Reply::channel();
        connector.connect(&config.url, reply);

        let waiting = facade.clone();
        tokio::spawn(async move {
            let result = pending.wait().await;
            waiting.connection_settled(result);
        });

        facade
    }

    /// A facade over a driver that is already connected.
    pub fn with_driver(driver: Arc<dyn Driver>) -> Self {
        Self::new(Connection::Ready(driver))
    }

    fn new(connection: Connection) -> Self {
        Self {
            inner: Arc::new(FacadeInner {
                connection: Mutex::new(connection),
                observers: RwLock::new(Vec::new()),
                next_observer: AtomicU64::new(1),
            }),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(*self.inner.connection.lock(), Connection::Ready(_))
    }

    /// Operations waiting for the store connection.
    pub fn pending_startup_ops(&self) -> usize {
        match &*self.inner.connection.lock() {
            Connection::Pending(queue) => queue.len(),
            _ => 0,
        }
    }

    /// Observe confirmed writes.
    pub fn observe_writes<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&WriteEvent) + Send + Sync + 'static,
    {
        let id = ObserverId(self.inner.next_observer.fetch_add(1, Ordering::Relaxed));
        self.inner.observers.write().push((id, Arc::new(observer)));
        id
    }

    pub fn unobserve_writes(&self, id: ObserverId) {
        self.inner.observers.write().retain(|(other, _)| *other != id);
    }

    /// Write observers currently registered.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    // --- Operations ---

    /// Read documents. An identity selector yields [`Found::One`], a filter
    /// yields [`Found::Many`] honoring sort, skip and limit.
    pub async fn find(
        &self,
        collection: &str,
        selector: impl Into<Selector>,
        options: FindOptions,
    ) -> Result<Found> {
        let selector = selector.into();
        let single = selector.is_identity();
        let filter = selector.to_filter();
        let collection = collection.to_string();

        let (reply, pending) = Reply::channel();
        self.dispatch(Box::new(move |driver| match driver {
            Ok(driver) => driver.find(&collection, filter, options, reply),
            Err(e) => reply.resolve(Err(e)),
        }));

        let docs = pending.wait().await?;
        Ok(if single {
            Found::One(docs.into_iter().next())
        } else {
            Found::Many(docs)
        })
    }

    /// Insert a document, assigning a string `_id` if it has none. Returns
    /// the id once the store has persisted the document.
    pub async fn insert(&self, collection: &str, mut document: Document) -> Result<String> {
        let Some(fields) = document.as_object_mut() else {
            return Err(LiveError::Store("can only insert objects".to_string()));
        };
        let id = match fields.get("_id") {
            Some(Value::String(id)) => id.clone(),
            Some(other) => other.to_string(),
            None => {
                let id = uuid::Uuid::new_v4().to_string();
                fields.insert("_id".to_string(), Value::String(id.clone()));
                id
            }
        };

        let (reply, pending) = Reply::channel();
        let reply = self.observed(reply, collection, WriteKind::Insert);
        let collection = collection.to_string();
        self.dispatch(Box::new(move |driver| match driver {
            Ok(driver) => driver.insert(&collection, document, reply),
            Err(e) => reply.resolve(Err(e)),
        }));

        pending.wait().await?;
        Ok(id)
    }

    /// Apply `modifier` to matching documents. Returns how many changed.
    ///
    /// Defaults to multi: see the type-level docs.
    pub async fn update(
        &self,
        collection: &str,
        selector: impl Into<Selector>,
        modifier: Document,
        options: UpdateOptions,
    ) -> Result<u64> {
        let filter = selector.into().to_filter();
        let flags = WriteFlags::from(&options);

        let (reply, pending) = Reply::channel();
        let reply = self.observed(reply, collection, WriteKind::Update);
        let collection = collection.to_string();
        self.dispatch(Box::new(move |driver| match driver {
            Ok(driver) => driver.update(&collection, filter, modifier, flags, reply),
            Err(e) => reply.resolve(Err(e)),
        }));

        pending.wait().await
    }

    /// Remove matching documents. Returns how many went.
    pub async fn remove(&self, collection: &str, selector: impl Into<Selector>) -> Result<u64> {
        let filter = selector.into().to_filter();

        let (reply, pending) = Reply::channel();
        let reply = self.observed(reply, collection, WriteKind::Remove);
        let collection = collection.to_string();
        self.dispatch(Box::new(move |driver| match driver {
            Ok(driver) => driver.remove(&collection, filter, reply),
            Err(e) => reply.resolve(Err(e)),
        }));

        pending.wait().await
    }

    // --- Plumbing ---

    /// Run `op` against the driver now, or queue it until the store
    /// connection settles.
    fn dispatch(&self, op: DeferredOp) {
        let mut connection = self.inner.connection.lock();
        match &mut *connection {
            Connection::Ready(driver) => {
                let driver = Arc::clone(driver);
                drop(connection);
                op(Ok(driver));
            }
            Connection::Failed(e) => {
                let e = e.clone();
                drop(connection);
                op(Err(e));
            }
            Connection::Pending(queue) => {
                queue.push_back(op);
                debug!(queued = queue.len(), "store not connected, deferring operation");
            }
        }
    }

    fn connection_settled(&self, result: Result<Arc<dyn Driver>>) {
        let result = result.map_err(|e| match e {
            LiveError::StoreUnavailable(_) => e,
            other => LiveError::StoreUnavailable(other.to_string()),
        });
        match &result {
            Ok(_) => info!("store connected"),
            Err(e) => warn!(error = %e, "store connection failed"),
        }

        // Drain in batches outside the lock. Anything that arrives mid-drain
        // lands behind what is already queued, so arrival order holds.
        let mut drained = 0usize;
        loop {
            let batch = {
                let mut connection = self.inner.connection.lock();
                match &mut *connection {
                    Connection::Pending(queue) if !queue.is_empty() => std::mem::take(queue),
                    _ => {
                        *connection = match &result {
                            Ok(driver) => Connection::Ready(Arc::clone(driver)),
                            Err(e) => Connection::Failed(e.clone()),
                        };
                        break;
                    }
                }
            };

            drained += batch.len();
            for op in batch {
                op(result.clone());
            }
        }

        debug!(drained, "startup queue drained");
    }

    fn observed<T>(&self, reply: Reply<T>, collection: &str, kind: WriteKind) -> Reply<T> {
        let inner = Arc::clone(&self.inner);
        let event = WriteEvent {
            collection: collection.to_string(),
            kind,
        };
        reply.with_hook(move |ok| {
            if !ok {
                return;
            }
            let observers: Vec<WriteObserver> = inner
                .observers
                .read()
                .iter()
                .map(|(_, observer)| Arc::clone(observer))
                .collect();
            for observer in &observers {
                observer(&event);
            }
        })
    }
}
