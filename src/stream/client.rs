//! Client side of the logical stream.
//!
//! [`ReconnectingStream`] is a cheap handle. All mutable stream state (the
//! outbound queue, the physical link, the timers) lives in one actor task and
//! is touched only by that task, in response to commands from handles and
//! events from the current physical link.

use super::backoff::retry_delay;
use super::frame::Message;
use super::handlers::EventHandlers;
use super::queue::{OutboundQueue, ResetHook};
use super::transport::{LinkEvent, PhysicalLink, SendAck, SendReceipt, Transport};
use crate::config::ReconnectConfig;
use crate::deps::ReactiveCell;
use crate::error::{LiveError, Result};
use crate::types::{ConnectionState, ConnectionStatus, LinkId, SequenceId, Timestamp};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info, warn};

enum Command {
    Emit(Message),
    AddResetHook(ResetHook),
    Reconnect,
    QueueSnapshot(oneshot::Sender<Vec<(SequenceId, Message)>>),
    Shutdown,
}

/// One logical connection that outlives any number of physical ones.
///
/// Must be created inside a tokio runtime.
#[derive(Clone)]
pub struct ReconnectingStream {
    commands: UnboundedSender<Command>,
    status: ReactiveCell<ConnectionStatus>,
    handlers: EventHandlers,
}

impl ReconnectingStream {
    /// Spawn the stream and launch the first physical attempt. Fails if
    /// `config` does not validate.
    pub fn connect(transport: Arc<dyn Transport>, config: ReconnectConfig) -> Result<Self> {
        config.validate()?;
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (ack_tx, ack_rx) = mpsc::unbounded_channel();
        let status = ReactiveCell::new(ConnectionStatus::default());
        let handlers = EventHandlers::new();

        let actor = StreamActor {
            transport,
            config,
            status: status.clone(),
            handlers: handlers.clone(),
            current: ConnectionStatus::default(),
            queue: OutboundQueue::new(),
            hooks: Vec::new(),
            link: None,
            next_link: 1,
            guard_at: None,
            retry_at: None,
            commands: command_rx,
            ack_tx,
            ack_rx,
            rng: StdRng::from_entropy(),
        };
        tokio::spawn(actor.run());

        Ok(Self {
            commands,
            status,
            handlers,
        })
    }

    /// Queue a message for at-least-once, in-order delivery.
    pub fn emit(&self, event: impl Into<String>, args: Vec<Value>) -> Result<()> {
        self.send(Command::Emit(Message::new(event, args)))
    }

    /// Listen for an inbound event. Takes effect on the current physical
    /// connection too, not just the next one.
    pub fn on<F>(&self, event: impl Into<String>, callback: F)
    where
        F: Fn(&[Value]) + Send + Sync + 'static,
    {
        self.handlers.on(event, callback);
    }

    /// Register a hook that rewrites the queue whenever a new physical
    /// connection replaces an old one. Hooks run in registration order.
    pub fn on_reset<F>(&self, hook: F) -> Result<()>
    where
        F: Fn(Vec<Message>) -> Vec<Message> + Send + 'static,
    {
        self.send(Command::AddResetHook(Box::new(hook)))
    }

    /// Retry right away instead of waiting out the backoff. A no-op while
    /// connected.
    pub fn reconnect(&self) -> Result<()> {
        self.send(Command::Reconnect)
    }

    /// Current status. Registers the current invalidation context, so a
    /// computation reading this re-runs on the next status change.
    pub fn status(&self) -> ConnectionStatus {
        self.status.get()
    }

    /// Messages still waiting for a send confirmation, in order.
    pub async fn queued(&self) -> Result<Vec<(SequenceId, Message)>> {
        let (tx, rx) = oneshot::channel();
        self.send(Command::QueueSnapshot(tx))?;
        rx.await.map_err(|_| LiveError::StreamClosed)
    }

    /// Stop the stream and close the physical connection.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| LiveError::StreamClosed)
    }
}

struct ActiveLink {
    id: LinkId,
    conn: Box<dyn PhysicalLink>,
    events: UnboundedReceiver<LinkEvent>,
}

struct StreamActor {
    transport: Arc<dyn Transport>,
    config: ReconnectConfig,
    status: ReactiveCell<ConnectionStatus>,
    handlers: EventHandlers,
    /// Actor-side copy of the status; published to `status` on change.
    current: ConnectionStatus,
    queue: OutboundQueue,
    hooks: Vec<ResetHook>,
    link: Option<ActiveLink>,
    next_link: u64,
    guard_at: Option<Instant>,
    retry_at: Option<Instant>,
    commands: UnboundedReceiver<Command>,
    ack_tx: UnboundedSender<SendAck>,
    ack_rx: UnboundedReceiver<SendAck>,
    rng: StdRng,
}

async fn next_link_event(link: &mut Option<ActiveLink>) -> LinkEvent {
    match link {
        // A transport that drops its sender has lost the connection.
        Some(link) => link.events.recv().await.unwrap_or(LinkEvent::Disconnected),
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl StreamActor {
    async fn run(mut self) {
        self.launch_connection();

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                event = next_link_event(&mut self.link) => self.handle_link_event(event),
                Some(ack) = self.ack_rx.recv() => {
                    self.queue.confirm(ack.seq);
                }
                _ = sleep_until(self.guard_at) => self.fake_connect_failed(),
                _ = sleep_until(self.retry_at) => self.retry_now(false),
            }
        }

        info!("stream shut down");
        self.teardown_link();
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Emit(message) => self.emit(message),
            Command::AddResetHook(hook) => self.hooks.push(hook),
            Command::Reconnect => self.reconnect(),
            Command::QueueSnapshot(reply) => {
                let snapshot = self
                    .queue
                    .iter()
                    .map(|(seq, message)| (seq, message.clone()))
                    .collect();
                let _ = reply.send(snapshot);
            }
            Command::Shutdown => {}
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Connected => self.connected(),
            LinkEvent::Disconnected | LinkEvent::ConnectFailed => {
                debug!(?event, "link lost");
                self.disconnected();
            }
            LinkEvent::Frame(text) => {
                self.handlers.dispatch_raw(&text);
            }
        }
    }

    fn publish_status(&self) {
        self.status.set(self.current.clone());
    }

    // --- State transitions ---

    fn launch_connection(&mut self) {
        // Never two physical attempts at once.
        self.teardown_link();

        let id = LinkId(self.next_link);
        self.next_link += 1;
        let (events_tx, events) = mpsc::unbounded_channel();
        let conn = self.transport.open(id, events_tx);
        self.link = Some(ActiveLink { id, conn, events });
        self.guard_at = Some(Instant::now() + self.config.guard_timeout());

        debug!(link = %id, "launched connection");
    }

    fn connected(&mut self) {
        self.guard_at = None;

        if self.current.connected {
            warn!("connect signal while already connected, ignoring");
            return;
        }

        // Give layered protocols a chance to rewrite the queue. Not on the
        // very first connection: nothing in it can be stale yet.
        if self.current.state != ConnectionState::Startup {
            self.queue.reset(&self.hooks);
        }

        let pending: Vec<SequenceId> = self.queue.iter().map(|(seq, _)| seq).collect();
        for seq in pending {
            self.send_queued(seq);
        }

        self.current.state = ConnectionState::Connected;
        self.current.connected = true;
        self.current.retry_count = 0;
        self.current.retry_time = None;
        info!(
            link = ?self.link.as_ref().map(|l| l.id),
            resent = self.queue.len(),
            "connected"
        );
        self.publish_status();
    }

    fn disconnected(&mut self) {
        self.guard_at = None;
        self.teardown_link();
        self.retry_later();
    }

    /// Force the outstanding attempt into the failure path.
    fn fake_connect_failed(&mut self) {
        warn!(
            link = ?self.link.as_ref().map(|l| l.id),
            "forcing connection attempt to fail"
        );
        self.disconnected();
    }

    fn retry_later(&mut self) {
        let delay = retry_delay(&self.config, self.current.retry_count, &mut self.rng);
        self.retry_at = Some(Instant::now() + delay);

        self.current.state = ConnectionState::Waiting;
        self.current.connected = false;
        self.current.retry_time = Some(Timestamp::now().plus_millis(delay.as_millis() as u64));
        info!(
            retry_count = self.current.retry_count,
            delay_ms = delay.as_millis() as u64,
            "retry scheduled"
        );
        self.publish_status();
    }

    fn retry_now(&mut self, manual: bool) {
        self.retry_at = None;
        if !manual {
            self.current.retry_count += 1;
        }
        self.current.state = ConnectionState::Connecting;
        self.current.connected = false;
        self.current.retry_time = None;
        debug!(retry_count = self.current.retry_count, manual, "retrying");
        self.publish_status();

        self.launch_connection();
    }

    fn reconnect(&mut self) {
        if self.current.connected {
            return;
        }

        // Mid-attempt: fail it first so the old link is gone before the
        // new one starts.
        if self.link.is_some() {
            self.fake_connect_failed();
        }

        info!("manual reconnect");
        self.retry_now(true);
    }

    // --- Link plumbing ---

    fn emit(&mut self, message: Message) {
        let seq = self.queue.push(message);
        if self.current.connected {
            self.send_queued(seq);
        }
    }

    fn send_queued(&mut self, seq: SequenceId) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        let Some(message) = self.queue.get(seq) else {
            return;
        };

        match message.to_frame().encode() {
            Ok(frame) => {
                let receipt = SendReceipt::new(seq, self.ack_tx.clone());
                link.conn.send(frame, receipt);
            }
            Err(e) => {
                warn!(?seq, error = %e, "dropping unencodable message");
                self.queue.confirm(seq);
            }
        }
    }

    /// Detach and close the current physical link, if any.
    fn teardown_link(&mut self) {
        if let Some(mut link) = self.link.take() {
            // Closing the receiver first means nothing the old link
            // reports can reach us.
            link.events.close();
            link.conn.close();
            debug!(link = %link.id, "link torn down");
        }
    }
}
