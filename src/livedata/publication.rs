//! Server-side publications and per-connection sessions.

use super::messages::{LiveMessage, LIVEDATA_EVENT};
use crate::error::{LiveError, Result};
use crate::store::{FindOptions, ObserverId, Selector, StoreFacade};
use crate::stream::{ServerSocket, StreamServer};
use crate::types::Document;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

/// "This result set is collection X filtered by P."
#[derive(Clone, Debug, PartialEq)]
pub struct QuerySpec {
    pub collection: String,
    pub selector: Selector,
    pub options: FindOptions,
}

impl QuerySpec {
    pub fn new(collection: impl Into<String>, selector: impl Into<Selector>) -> Self {
        Self {
            collection: collection.into(),
            selector: selector.into(),
            options: FindOptions::default(),
        }
    }

    pub fn with_options(mut self, options: FindOptions) -> Self {
        self.options = options;
        self
    }
}

type PublishHandler = Arc<dyn Fn(&Value) -> Result<QuerySpec> + Send + Sync>;

/// Named publications a client may subscribe to.
#[derive(Clone, Default)]
pub struct Publications {
    handlers: Arc<RwLock<HashMap<String, PublishHandler>>>,
}

impl Publications {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a publication. `handler` maps subscription params to the query
    /// that defines the result set. Re-publishing a name replaces it.
    pub fn publish<F>(&self, name: impl Into<String>, handler: F)
    where
        F: Fn(&Value) -> Result<QuerySpec> + Send + Sync + 'static,
    {
        self.handlers.write().insert(name.into(), Arc::new(handler));
    }

    pub fn resolve(&self, name: &str, params: &Value) -> Result<QuerySpec> {
        let handler = self
            .handlers
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LiveError::UnknownPublication(name.to_string()))?;
        handler(params)
    }
}

/// Where a session's outbound messages go.
pub trait LiveSink: Send + Sync + 'static {
    fn send(&self, message: &LiveMessage) -> Result<()>;
}

impl LiveSink for ServerSocket {
    fn send(&self, message: &LiveMessage) -> Result<()> {
        self.emit(LIVEDATA_EVENT, message.to_args()?)
    }
}

enum SessionWork {
    Subscribe {
        id: String,
        name: String,
        params: Value,
    },
    Unsubscribe {
        id: String,
    },
    Rerun {
        collection: String,
    },
    Flush(oneshot::Sender<()>),
    Stop,
}

struct SessionInner {
    work: mpsc::UnboundedSender<SessionWork>,
    store: StoreFacade,
    observer: RwLock<Option<ObserverId>>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(id) = self.observer.write().take() {
            self.store.unobserve_writes(id);
        }
    }
}

/// One client connection's live queries.
///
/// All work for a session runs through one ordered queue, so the client
/// sees changes in the order the store confirmed the writes behind them.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Start a session that answers through `sink`. Must be called inside a
    /// tokio runtime.
    pub fn start(store: StoreFacade, publications: Publications, sink: Arc<dyn LiveSink>) -> Self {
        let (work, work_rx) = mpsc::unbounded_channel();
        let inner = Arc::new(SessionInner {
            work,
            store: store.clone(),
            observer: RwLock::new(None),
        });

        let weak = Arc::downgrade(&inner);
        let observer = store.observe_writes(move |event| {
            if let Some(inner) = weak.upgrade() {
                let _ = inner.work.send(SessionWork::Rerun {
                    collection: event.collection.clone(),
                });
            }
        });
        *inner.observer.write() = Some(observer);

        let worker = SessionWorker {
            store,
            publications,
            sink,
            subs: BTreeMap::new(),
            closed: false,
        };
        tokio::spawn(worker.run(work_rx));

        Self { inner }
    }

    /// Serve live queries on every socket of `server`.
    pub fn serve(server: &StreamServer, store: StoreFacade, publications: Publications) {
        server.register(move |socket| {
            let session = Session::start(
                store.clone(),
                publications.clone(),
                Arc::new(socket.clone()),
            );
            {
                let session = session.clone();
                socket.on_close(move || session.stop());
            }
            socket.on(LIVEDATA_EVENT, move |args| match LiveMessage::from_args(args) {
                Ok(message) => session.handle(message),
                Err(e) => warn!(error = %e, "dropping undecodable livedata message"),
            });
        });
    }

    /// Route a message from the client.
    pub fn handle(&self, message: LiveMessage) {
        match message {
            LiveMessage::Sub { id, name, params } => self.subscribe(id, name, params),
            LiveMessage::Unsub { id } => self.unsubscribe(id),
            other => debug!(?other, "ignoring server-bound message"),
        }
    }

    pub fn subscribe(&self, id: impl Into<String>, name: impl Into<String>, params: Value) {
        self.push(SessionWork::Subscribe {
            id: id.into(),
            name: name.into(),
            params,
        });
    }

    pub fn unsubscribe(&self, id: impl Into<String>) {
        self.push(SessionWork::Unsubscribe { id: id.into() });
    }

    /// Re-evaluate subscriptions on `collection`.
    pub fn on_write(&self, collection: impl Into<String>) {
        self.push(SessionWork::Rerun {
            collection: collection.into(),
        });
    }

    /// Wait until everything queued so far has been processed.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.push(SessionWork::Flush(tx));
        let _ = rx.await;
    }

    /// End the session: stop following store writes and let the worker
    /// finish. Work queued earlier is still processed.
    pub fn stop(&self) {
        if let Some(id) = self.inner.observer.write().take() {
            self.inner.store.unobserve_writes(id);
        }
        self.push(SessionWork::Stop);
    }

    fn push(&self, work: SessionWork) {
        // Dropped once the worker has stopped.
        let _ = self.inner.work.send(work);
    }
}

struct Subscription {
    query: QuerySpec,
    /// Current result set by document id.
    docs: BTreeMap<String, Document>,
}

struct SessionWorker {
    store: StoreFacade,
    publications: Publications,
    sink: Arc<dyn LiveSink>,
    subs: BTreeMap<String, Subscription>,
    closed: bool,
}

impl SessionWorker {
    async fn run(mut self, mut work: mpsc::UnboundedReceiver<SessionWork>) {
        while let Some(item) = work.recv().await {
            match item {
                SessionWork::Subscribe { id, name, params } => {
                    self.subscribe(id, &name, &params).await
                }
                SessionWork::Unsubscribe { id } => self.unsubscribe(&id),
                SessionWork::Rerun { collection } => self.rerun(&collection).await,
                SessionWork::Flush(done) => {
                    let _ = done.send(());
                }
                SessionWork::Stop => break,
            }
            // The client is gone; stop holding its socket.
            if self.closed {
                break;
            }
        }
        debug!("session ended");
    }

    fn send(&mut self, message: LiveMessage) {
        if self.closed {
            return;
        }
        match self.sink.send(&message) {
            Ok(()) => {}
            Err(LiveError::StreamClosed) => {
                debug!("session sink closed");
                self.closed = true;
            }
            Err(e) => warn!(error = %e, "failed to send livedata message"),
        }
    }

    async fn subscribe(&mut self, id: String, name: &str, params: &Value) {
        // A resubscribe racing a reconnect can repeat an id.
        if self.subs.contains_key(&id) {
            self.send(LiveMessage::Ready { subs: vec![id] });
            return;
        }

        let query = match self.publications.resolve(name, params) {
            Ok(query) => query,
            Err(e) => {
                self.send(LiveMessage::NoSub {
                    id,
                    error: e.to_string(),
                });
                return;
            }
        };

        let docs = match self.run_query(&query).await {
            Ok(docs) => docs,
            Err(e) => {
                self.send(LiveMessage::NoSub {
                    id,
                    error: e.to_string(),
                });
                return;
            }
        };

        for message in diff(&query.collection, &BTreeMap::new(), &docs) {
            self.send(message);
        }
        self.subs.insert(id.clone(), Subscription { query, docs });
        self.send(LiveMessage::Ready { subs: vec![id] });
    }

    fn unsubscribe(&mut self, id: &str) {
        let Some(sub) = self.subs.remove(id) else {
            return;
        };
        for message in diff(&sub.query.collection, &sub.docs, &BTreeMap::new()) {
            self.send(message);
        }
    }

    async fn rerun(&mut self, collection: &str) {
        let ids: Vec<String> = self
            .subs
            .iter()
            .filter(|(_, sub)| sub.query.collection == collection)
            .map(|(id, _)| id.clone())
            .collect();

        for id in ids {
            let Some(query) = self.subs.get(&id).map(|sub| sub.query.clone()) else {
                continue;
            };
            let fresh = match self.run_query(&query).await {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(sub = %id, error = %e, "live query rerun failed");
                    continue;
                }
            };
            let Some(sub) = self.subs.get_mut(&id) else {
                continue;
            };
            let messages = diff(&sub.query.collection, &sub.docs, &fresh);
            sub.docs = fresh;
            for message in messages {
                self.send(message);
            }
        }
    }

    async fn run_query(&self, query: &QuerySpec) -> Result<BTreeMap<String, Document>> {
        let found = self
            .store
            .find(&query.collection, query.selector.clone(), query.options.clone())
            .await?;
        Ok(found
            .into_vec()
            .into_iter()
            .filter_map(|doc| document_id(&doc).map(|id| (id, doc)))
            .collect())
    }
}

fn document_id(doc: &Document) -> Option<String> {
    match doc.get("_id")? {
        Value::String(id) => Some(id.clone()),
        other => Some(other.to_string()),
    }
}

/// Added/changed/removed messages turning `old` into `new`, keyed by id.
fn diff(
    collection: &str,
    old: &BTreeMap<String, Document>,
    new: &BTreeMap<String, Document>,
) -> Vec<LiveMessage> {
    let mut messages = Vec::new();
    for (id, doc) in new {
        match old.get(id) {
            None => messages.push(LiveMessage::Added {
                collection: collection.to_string(),
                id: id.clone(),
                fields: doc.clone(),
            }),
            Some(previous) if previous != doc => messages.push(LiveMessage::Changed {
                collection: collection.to_string(),
                id: id.clone(),
                fields: doc.clone(),
            }),
            Some(_) => {}
        }
    }
    for id in old.keys() {
        if !new.contains_key(id) {
            messages.push(LiveMessage::Removed {
                collection: collection.to_string(),
                id: id.clone(),
            });
        }
    }
    messages
}
