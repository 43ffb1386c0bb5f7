//! Server side of the stream.
//!
//! The server does not own a transport either. Whatever accepts physical
//! connections calls [`StreamServer::accept`], feeds inbound frames to
//! [`ServerSocket::receive`] and drains [`SocketOutbound`].

use super::frame::Frame;
use super::handlers::EventHandlers;
use crate::error::{LiveError, Result};
use crate::types::SocketId;
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

type RegistrationCallback = Arc<dyn Fn(&ServerSocket) + Send + Sync>;
type CloseCallback = Box<dyn FnOnce() + Send>;

/// One connected client, as seen by the server.
#[derive(Clone)]
pub struct ServerSocket {
    id: SocketId,
    handlers: EventHandlers,
    outbound: Sender<String>,
    /// `None` once the socket has closed.
    on_close: Arc<Mutex<Option<Vec<CloseCallback>>>>,
}

impl ServerSocket {
    pub fn id(&self) -> SocketId {
        self.id
    }

    /// Listen for an event from this client.
    pub fn on<F>(&self, event: impl Into<String>, callback: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.handlers.on(event, callback);
    }

    /// Send a named event to this client.
    pub fn emit(&self, event: impl Into<String>, args: Vec<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(LiveError::StreamClosed);
        }
        let frame = Frame::Event {
            name: event.into(),
            args,
        }
        .encode()?;
        self.outbound
            .send(frame)
            .map_err(|_| LiveError::StreamClosed)
    }

    /// Run `callback` once when the socket closes, or right away if it
    /// already has.
    pub fn on_close<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut on_close = self.on_close.lock();
        match on_close.as_mut() {
            Some(callbacks) => callbacks.push(Box::new(callback)),
            None => {
                drop(on_close);
                callback();
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.on_close.lock().is_none()
    }

    fn close(&self) {
        let Some(callbacks) = self.on_close.lock().take() else {
            return;
        };
        for callback in callbacks {
            callback();
        }
    }

    /// Handle one inbound frame. Multiplexed frames are unwrapped and
    /// dispatched under their inner event name; malformed frames are
    /// dropped. Returns how many handlers ran.
    pub fn receive(&self, text: &str) -> usize {
        self.handlers.dispatch_raw(text).unwrap_or(0)
    }
}

/// Outbound frames for one socket, drained by the physical writer.
pub struct SocketOutbound {
    pub id: SocketId,
    receiver: Receiver<String>,
}

impl SocketOutbound {
    /// Receive the next frame (blocking).
    pub fn recv(&self) -> std::result::Result<String, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive a frame (non-blocking).
    pub fn try_recv(&self) -> std::result::Result<String, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: Duration,
    ) -> std::result::Result<String, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}

/// Tracks connected sockets and the callbacks that set each one up.
#[derive(Clone, Default)]
pub struct StreamServer {
    registrations: Arc<RwLock<Vec<RegistrationCallback>>>,
    sockets: Arc<RwLock<BTreeMap<SocketId, ServerSocket>>>,
    next_id: Arc<AtomicU64>,
}

impl StreamServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `callback` for every socket that connects from now on, and right
    /// away for every socket already connected.
    pub fn register<F>(&self, callback: F)
    where
        F: Fn(&ServerSocket) + Send + Sync + 'static,
    {
        let callback: RegistrationCallback = Arc::new(callback);
        self.registrations.write().push(Arc::clone(&callback));

        for socket in self.all_sockets() {
            callback(&socket);
        }
    }

    /// Admit a new physical connection.
    pub fn accept(&self) -> (ServerSocket, SocketOutbound) {
        let id = SocketId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let (sender, receiver) = unbounded();
        let socket = ServerSocket {
            id,
            handlers: EventHandlers::new(),
            outbound: sender,
            on_close: Arc::new(Mutex::new(Some(Vec::new()))),
        };

        self.sockets.write().insert(id, socket.clone());
        debug!(socket = ?id, "socket connected");

        let callbacks: Vec<RegistrationCallback> = self.registrations.read().clone();
        for callback in &callbacks {
            callback(&socket);
        }

        (socket, SocketOutbound { id, receiver })
    }

    /// Forget a socket whose physical connection went away and run its
    /// close callbacks.
    pub fn disconnect(&self, id: SocketId) -> Option<ServerSocket> {
        let removed = self.sockets.write().remove(&id);
        if let Some(socket) = &removed {
            debug!(socket = ?id, "socket disconnected");
            socket.close();
        }
        removed
    }

    pub fn socket(&self, id: SocketId) -> Option<ServerSocket> {
        self.sockets.read().get(&id).cloned()
    }

    /// Every connected socket, by id.
    pub fn all_sockets(&self) -> Vec<ServerSocket> {
        self.sockets.read().values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    #[test]
    fn test_register_runs_for_existing_and_new_sockets() {
        let server = StreamServer::new();
        let (first, _first_out) = server.accept();

        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            server.register(move |socket| seen.lock().push(socket.id()));
        }
        assert_eq!(*seen.lock(), vec![first.id()]);

        let (second, _second_out) = server.accept();
        assert_eq!(*seen.lock(), vec![first.id(), second.id()]);
    }

    #[test]
    fn test_message_frames_dispatch_as_named_events() {
        let server = StreamServer::new();
        let got = Arc::new(Mutex::new(Vec::new()));
        {
            let got = Arc::clone(&got);
            server.register(move |socket| {
                let got = Arc::clone(&got);
                socket.on("ping", move |args| got.lock().push(args.to_vec()));
            });
        }

        let (socket, _out) = server.accept();
        let ran = socket.receive(r#"{"type":"message","payload":["ping",42]}"#);
        assert_eq!(ran, 1);
        assert_eq!(*got.lock(), vec![vec![json!(42)]]);

        // Malformed frames are dropped without disturbing the socket.
        assert_eq!(socket.receive("garbage"), 0);
        assert!(server.socket(socket.id()).is_some());
    }

    #[test]
    fn test_emit_reaches_outbound() {
        let server = StreamServer::new();
        let (socket, out) = server.accept();

        socket.emit("pong", vec![json!("hi")]).unwrap();
        let frame = out.recv_timeout(Duration::from_millis(100)).unwrap();
        assert_eq!(
            Frame::decode(&frame).unwrap(),
            Frame::Event {
                name: "pong".to_string(),
                args: vec![json!("hi")]
            }
        );
    }

    #[test]
    fn test_disconnect_removes_socket() {
        let server = StreamServer::new();
        let (socket, out) = server.accept();
        assert_eq!(server.all_sockets().len(), 1);

        assert!(server.disconnect(socket.id()).is_some());
        assert!(server.disconnect(socket.id()).is_none());
        assert!(server.all_sockets().is_empty());

        drop(out);
        assert!(matches!(
            socket.emit("late", vec![]),
            Err(LiveError::StreamClosed)
        ));
    }

    #[test]
    fn test_disconnect_runs_close_callbacks_once() {
        let server = StreamServer::new();
        let (socket, _out) = server.accept();

        let closed = Arc::new(Mutex::new(Vec::new()));
        {
            let closed = Arc::clone(&closed);
            socket.on_close(move || closed.lock().push("early"));
        }
        assert!(!socket.is_closed());

        server.disconnect(socket.id());
        server.disconnect(socket.id());
        assert!(socket.is_closed());
        assert_eq!(*closed.lock(), vec!["early"]);

        // Registered after the fact: runs immediately.
        {
            let closed = Arc::clone(&closed);
            socket.on_close(move || closed.lock().push("late"));
        }
        assert_eq!(*closed.lock(), vec!["early", "late"]);

        // The outbound receiver is still alive, but the socket is closed.
        assert!(matches!(
            socket.emit("after", vec![]),
            Err(LiveError::StreamClosed)
        ));
    }
}
