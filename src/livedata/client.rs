//! Client-side live query cache.

use super::messages::{LiveMessage, LIVEDATA_EVENT};
use crate::deps::ReactiveCell;
use crate::error::Result;
use crate::store::{matches, Selector};
use crate::stream::{Message, ReconnectingStream};
use crate::types::Document;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Local copy of one server collection, fed by subscriptions.
///
/// Reads register the current invalidation context.
#[derive(Clone)]
pub struct LiveCollection {
    name: String,
    docs: ReactiveCell<BTreeMap<String, Document>>,
    /// How many subscriptions currently hold each document.
    holders: Arc<Mutex<HashMap<String, usize>>>,
}

impl LiveCollection {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            docs: ReactiveCell::new(BTreeMap::new()),
            holders: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cached documents matching `selector`, ordered by id.
    pub fn find(&self, selector: impl Into<Selector>) -> Result<Vec<Document>> {
        let filter = selector.into().to_filter();
        self.docs.with(|docs| {
            let mut found = Vec::new();
            for doc in docs.values() {
                if matches(doc, &filter)? {
                    found.push(doc.clone());
                }
            }
            Ok(found)
        })
    }

    pub fn find_one(&self, id: &str) -> Option<Document> {
        self.docs.with(|docs| docs.get(id).cloned())
    }

    pub fn len(&self) -> usize {
        self.docs.with(BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn added(&self, id: String, fields: Document) {
        *self.holders.lock().entry(id.clone()).or_insert(0) += 1;
        self.docs.update(|docs| docs.insert(id, fields));
    }

    fn changed(&self, id: String, fields: Document) {
        self.docs.update(|docs| docs.insert(id, fields));
    }

    fn removed(&self, id: &str) {
        let gone = {
            let mut holders = self.holders.lock();
            match holders.get_mut(id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                _ => {
                    holders.remove(id);
                    true
                }
            }
        };
        if gone {
            self.docs.update(|docs| docs.remove(id));
        }
    }

    fn clear(&self) {
        self.holders.lock().clear();
        self.docs.set(BTreeMap::new());
    }
}

struct ClientInner {
    stream: ReconnectingStream,
    collections: RwLock<HashMap<String, LiveCollection>>,
    /// Active subscriptions: id to (publication, params).
    subs: Mutex<BTreeMap<String, (String, Value)>>,
    ready: ReactiveCell<BTreeSet<String>>,
    failures: Mutex<HashMap<String, String>>,
    next_sub: AtomicU64,
}

/// Subscribes to server publications over a [`ReconnectingStream`] and keeps
/// a local cache of the documents they publish.
///
/// Subscriptions survive reconnects: when a new physical connection replaces
/// an old one, stale subscribe/unsubscribe messages are dropped from the
/// outbound queue, the cache is cleared and every active subscription is
/// requested again.
#[derive(Clone)]
pub struct LiveClient {
    inner: Arc<ClientInner>,
}

impl LiveClient {
    pub fn new(stream: ReconnectingStream) -> Result<Self> {
        let inner = Arc::new(ClientInner {
            stream: stream.clone(),
            collections: RwLock::new(HashMap::new()),
            subs: Mutex::new(BTreeMap::new()),
            ready: ReactiveCell::new(BTreeSet::new()),
            failures: Mutex::new(HashMap::new()),
            next_sub: AtomicU64::new(1),
        });

        // The stream owns these callbacks, so they only hold the client weakly.
        let weak = Arc::downgrade(&inner);
        stream.on(LIVEDATA_EVENT, move |args| {
            let Some(inner) = weak.upgrade() else {
                return;
            };
            match LiveMessage::from_args(args) {
                Ok(message) => inner.receive(message),
                Err(e) => warn!(error = %e, "dropping undecodable livedata message"),
            }
        });

        let weak = Arc::downgrade(&inner);
        stream.on_reset(move |queued| resubscribe(&weak, queued))?;

        Ok(Self { inner })
    }

    /// Subscribe to a publication. Returns the subscription id.
    pub fn subscribe(&self, name: impl Into<String>, params: Value) -> Result<String> {
        let id = self.inner.next_sub.fetch_add(1, Ordering::SeqCst).to_string();
        let name = name.into();
        self.inner
            .subs
            .lock()
            .insert(id.clone(), (name.clone(), params.clone()));

        let message = LiveMessage::Sub {
            id: id.clone(),
            name,
            params,
        };
        self.inner.stream.emit(LIVEDATA_EVENT, message.to_args()?)?;
        Ok(id)
    }

    pub fn unsubscribe(&self, id: &str) -> Result<()> {
        if self.inner.subs.lock().remove(id).is_none() {
            return Ok(());
        }
        self.inner.ready.update(|ready| ready.remove(id));

        let message = LiveMessage::Unsub { id: id.to_string() };
        self.inner.stream.emit(LIVEDATA_EVENT, message.to_args()?)
    }

    /// Whether the initial results for `id` have arrived. Reactive.
    pub fn is_ready(&self, id: &str) -> bool {
        self.inner.ready.with(|ready| ready.contains(id))
    }

    /// Why the server refused subscription `id`, if it did.
    pub fn subscription_error(&self, id: &str) -> Option<String> {
        self.inner.failures.lock().get(id).cloned()
    }

    /// The local cache for `name`, created empty on first use.
    pub fn collection(&self, name: &str) -> LiveCollection {
        self.inner.collection(name)
    }

    pub fn stream(&self) -> &ReconnectingStream {
        &self.inner.stream
    }
}

impl ClientInner {
    fn collection(&self, name: &str) -> LiveCollection {
        if let Some(collection) = self.collections.read().get(name) {
            return collection.clone();
        }
        self.collections
            .write()
            .entry(name.to_string())
            .or_insert_with(|| LiveCollection::new(name))
            .clone()
    }

    fn receive(&self, message: LiveMessage) {
        match message {
            LiveMessage::Added {
                collection,
                id,
                fields,
            } => self.collection(&collection).added(id, fields),
            LiveMessage::Changed {
                collection,
                id,
                fields,
            } => self.collection(&collection).changed(id, fields),
            LiveMessage::Removed { collection, id } => self.collection(&collection).removed(&id),
            LiveMessage::Ready { subs } => self.ready.update(|ready| ready.extend(subs)),
            LiveMessage::NoSub { id, error } => {
                warn!(sub = %id, %error, "subscription refused");
                self.subs.lock().remove(&id);
                self.failures.lock().insert(id, error);
            }
            other => debug!(?other, "ignoring client-bound message"),
        }
    }

    /// Forget everything the old server session told us.
    fn reset_cache(&self) {
        let collections: Vec<LiveCollection> = self.collections.read().values().cloned().collect();
        for collection in collections {
            collection.clear();
        }
        self.ready.set(BTreeSet::new());
    }
}

/// Queue rewrite for a fresh physical connection: re-request every active
/// subscription ahead of whatever else is still unsent.
fn resubscribe(inner: &Weak<ClientInner>, queued: Vec<Message>) -> Vec<Message> {
    let Some(inner) = inner.upgrade() else {
        return queued;
    };
    inner.reset_cache();

    let subs: Vec<(String, String, Value)> = inner
        .subs
        .lock()
        .iter()
        .map(|(id, (name, params))| (id.clone(), name.clone(), params.clone()))
        .collect();

    let mut rewritten = Vec::with_capacity(subs.len() + queued.len());
    for (id, name, params) in subs {
        match (LiveMessage::Sub { id, name, params }).to_message() {
            Ok(message) => rewritten.push(message),
            Err(e) => warn!(error = %e, "could not re-encode subscription"),
        }
    }
    rewritten.extend(queued.into_iter().filter(|message| {
        !LiveMessage::from_message(message).is_some_and(|live| live.is_subscription_control())
    }));

    debug!(resent = rewritten.len(), "livedata queue rewritten");
    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deps::autorun;
    use serde_json::json;

    #[test]
    fn test_collection_find_filters() {
        let collection = LiveCollection::new("rooms");
        collection.added("a".to_string(), json!({"_id": "a", "open": true}));
        collection.added("b".to_string(), json!({"_id": "b", "open": false}));

        let open = collection.find(json!({"open": true})).unwrap();
        assert_eq!(open, vec![json!({"_id": "a", "open": true})]);
        assert_eq!(collection.find(Selector::all()).unwrap().len(), 2);
        assert_eq!(
            collection.find_one("b"),
            Some(json!({"_id": "b", "open": false}))
        );
    }

    #[test]
    fn test_shared_document_survives_one_removal() {
        let collection = LiveCollection::new("rooms");
        collection.added("a".to_string(), json!({"_id": "a"}));
        collection.added("a".to_string(), json!({"_id": "a"}));

        collection.removed("a");
        assert_eq!(collection.len(), 1);
        collection.removed("a");
        assert!(collection.is_empty());
    }

    #[test]
    fn test_find_is_reactive() {
        let collection = LiveCollection::new("rooms");
        let counts = Arc::new(Mutex::new(Vec::new()));

        let computation = {
            let collection = collection.clone();
            let counts = Arc::clone(&counts);
            autorun(move || counts.lock().push(collection.len()))
        };

        collection.added("a".to_string(), json!({"_id": "a"}));
        collection.changed("a".to_string(), json!({"_id": "a", "n": 1}));
        collection.clear();
        assert_eq!(*counts.lock(), vec![0, 1, 1, 0]);
        computation.stop();
    }
}
