//! Live queries end to end: client stream, server sessions and the store.

mod common;

use common::init_tracing;
use livedata::{
    LinkEvent, LinkId, LiveClient, LiveError, MemoryDriver, PhysicalLink, Publications, QuerySpec,
    ReconnectConfig, ReconnectingStream, SendReceipt, ServerSocket, Session, SocketId,
    StoreFacade, StreamServer, Transport, UpdateOptions,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

// --- Loopback transport ---

/// Connects every physical link straight to a [`StreamServer`].
#[derive(Clone)]
struct Loopback {
    server: StreamServer,
    links: Arc<Mutex<Vec<UnboundedSender<LinkEvent>>>>,
}

impl Loopback {
    fn new(server: StreamServer) -> Self {
        Self {
            server,
            links: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    /// Drop the current physical connection from the network side.
    fn cut(&self) {
        if let Some(events) = self.links.lock().last() {
            let _ = events.send(LinkEvent::Disconnected);
        }
    }
}

struct LoopbackLink {
    server: StreamServer,
    socket: ServerSocket,
}

impl PhysicalLink for LoopbackLink {
    fn send(&mut self, frame: String, receipt: SendReceipt) {
        self.socket.receive(&frame);
        receipt.confirm();
    }

    fn close(&mut self) {
        self.server.disconnect(self.socket.id());
    }
}

impl Transport for Loopback {
    fn open(&self, _link: LinkId, events: UnboundedSender<LinkEvent>) -> Box<dyn PhysicalLink> {
        let (socket, outbound) = self.server.accept();
        self.links.lock().push(events.clone());
        let _ = events.send(LinkEvent::Connected);

        // Pump server frames to the client until either side goes away.
        let server = self.server.clone();
        let id: SocketId = socket.id();
        tokio::spawn(async move {
            loop {
                while let Ok(frame) = outbound.try_recv() {
                    if events.send(LinkEvent::Frame(frame)).is_err() {
                        return;
                    }
                }
                if server.socket(id).is_none() || events.is_closed() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        });

        Box::new(LoopbackLink {
            server: self.server.clone(),
            socket,
        })
    }
}

// --- Fixtures ---

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn publications() -> Publications {
    let publications = Publications::new();
    publications.publish("open-rooms", |_| Ok(QuerySpec::new("rooms", json!({"open": true}))));
    publications.publish("room", |params| {
        let id = params
            .as_str()
            .ok_or_else(|| LiveError::InvalidSelector("room id required".to_string()))?;
        Ok(QuerySpec::new("rooms", id))
    });
    publications
}

struct World {
    store: StoreFacade,
    transport: Loopback,
    client: LiveClient,
}

async fn world() -> World {
    init_tracing();
    let server = StreamServer::new();
    let store = StoreFacade::with_driver(MemoryDriver::new());
    Session::serve(&server, store.clone(), publications());

    let transport = Loopback::new(server);
    let config = ReconnectConfig {
        retry_base_ms: 20,
        ..ReconnectConfig::default()
    };
    let stream = ReconnectingStream::connect(Arc::new(transport.clone()), config).unwrap();
    let client = LiveClient::new(stream).unwrap();

    World {
        store,
        transport,
        client,
    }
}

// --- Tests ---

#[tokio::test]
async fn test_subscription_follows_store_writes() {
    let World { store, client, .. } = world().await;
    store.insert("rooms", json!({"_id": "a", "open": true})).await.unwrap();
    store.insert("rooms", json!({"_id": "b", "open": false})).await.unwrap();

    let sub = client.subscribe("open-rooms", Value::Null).unwrap();
    eventually("initial results", || client.is_ready(&sub)).await;
    let rooms = client.collection("rooms");
    assert_eq!(rooms.len(), 1);
    assert!(rooms.find_one("a").is_some());

    // Added
    store.insert("rooms", json!({"_id": "c", "open": true})).await.unwrap();
    eventually("c added", || rooms.find_one("c").is_some()).await;

    // Removed: a no longer matches.
    store
        .update("rooms", "a", json!({"$set": {"open": false}}), UpdateOptions::default())
        .await
        .unwrap();
    eventually("a removed", || rooms.find_one("a").is_none()).await;

    // Changed
    store
        .update("rooms", "c", json!({"$set": {"name": "attic"}}), UpdateOptions::default())
        .await
        .unwrap();
    eventually("c changed", || {
        rooms.find_one("c").map(|doc| doc["name"] == json!("attic")) == Some(true)
    })
    .await;
    assert_eq!(rooms.find(json!({"open": true})).unwrap().len(), 1);

    client.unsubscribe(&sub).unwrap();
    eventually("cache emptied", || rooms.is_empty()).await;
    assert!(!client.is_ready(&sub));
}

#[tokio::test]
async fn test_overlapping_subscriptions_share_documents() {
    let World { store, client, .. } = world().await;
    store.insert("rooms", json!({"_id": "a", "open": true})).await.unwrap();

    let all_open = client.subscribe("open-rooms", Value::Null).unwrap();
    let just_a = client.subscribe("room", json!("a")).unwrap();
    eventually("both ready", || client.is_ready(&all_open) && client.is_ready(&just_a)).await;

    let rooms = client.collection("rooms");
    client.unsubscribe(&all_open).unwrap();

    // Still held by the second subscription.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rooms.find_one("a").is_some());

    client.unsubscribe(&just_a).unwrap();
    eventually("a released", || rooms.is_empty()).await;
}

#[tokio::test]
async fn test_refused_subscription_reports_error() {
    let World { client, .. } = world().await;

    let unknown = client.subscribe("nope", Value::Null).unwrap();
    eventually("refusal", || client.subscription_error(&unknown).is_some()).await;
    assert!(client.subscription_error(&unknown).unwrap().contains("nope"));

    let bad_params = client.subscribe("room", json!(42)).unwrap();
    eventually("refusal", || client.subscription_error(&bad_params).is_some()).await;
    assert!(!client.is_ready(&bad_params));
}

#[tokio::test]
async fn test_subscriptions_resume_after_reconnect() {
    let World {
        store,
        transport,
        client,
    } = world().await;
    store.insert("rooms", json!({"_id": "a", "open": true})).await.unwrap();

    let sub = client.subscribe("open-rooms", Value::Null).unwrap();
    eventually("initial results", || client.is_ready(&sub)).await;
    eventually("connected", || client.stream().status().connected).await;

    transport.cut();
    store.insert("rooms", json!({"_id": "b", "open": true})).await.unwrap();

    eventually("reconnected", || {
        transport.link_count() == 2 && client.stream().status().connected
    })
    .await;
    eventually("resubscribed", || client.is_ready(&sub)).await;
    let rooms = client.collection("rooms");
    eventually("both rooms", || rooms.len() == 2).await;

    // The new session keeps following writes.
    store.remove("rooms", "a").await.unwrap();
    eventually("a removed", || rooms.find_one("a").is_none()).await;
    assert_eq!(rooms.len(), 1);

    // Only the live connection's session still follows the store.
    assert_eq!(store.observer_count(), 1);
}

#[tokio::test]
async fn test_closed_sockets_release_their_sessions() {
    init_tracing();
    let server = StreamServer::new();
    let store = StoreFacade::with_driver(MemoryDriver::new());
    Session::serve(&server, store.clone(), publications());

    let (kept, _kept_out) = server.accept();
    for _ in 0..50 {
        let (socket, outbound) = server.accept();
        drop(outbound);
        server.disconnect(socket.id());
    }
    assert_eq!(store.observer_count(), 1);

    for n in 0..5 {
        store.insert("rooms", json!({"n": n, "open": true})).await.unwrap();
    }
    assert_eq!(store.observer_count(), 1);

    server.disconnect(kept.id());
    assert_eq!(store.observer_count(), 0);
}
