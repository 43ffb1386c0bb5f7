//! Physical transport seam.
//!
//! A transport knows how to open one physical connection. Everything it has
//! to say about that connection goes through the event sender it was handed
//! at open time; the stream detaches a connection by dropping the matching
//! receiver, after which nothing the old connection reports can reach it.

use crate::types::{LinkId, SequenceId};
use tokio::sync::mpsc::UnboundedSender;

/// Something that happened on a physical connection.
#[derive(Clone, Debug, PartialEq)]
pub enum LinkEvent {
    /// Handshake finished.
    Connected,
    /// An established connection dropped.
    Disconnected,
    /// The attempt failed before connecting.
    ConnectFailed,
    /// An inbound frame, as JSON text.
    Frame(String),
}

/// Delivery confirmation for one sent frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SendAck {
    pub seq: SequenceId,
}

/// Handed to the transport with each frame; confirm once the frame is
/// known to have been sent.
#[derive(Debug)]
pub struct SendReceipt {
    ack: SendAck,
    acks: UnboundedSender<SendAck>,
}

impl SendReceipt {
    pub(crate) fn new(seq: SequenceId, acks: UnboundedSender<SendAck>) -> Self {
        Self {
            ack: SendAck { seq },
            acks,
        }
    }

    pub fn seq(&self) -> SequenceId {
        self.ack.seq
    }

    /// Confirm the send. A stream that has gone away ignores it.
    pub fn confirm(self) {
        let _ = self.acks.send(self.ack);
    }
}

/// One physical connection.
pub trait PhysicalLink: Send {
    /// Send a frame; call `receipt.confirm()` once it is on the wire.
    fn send(&mut self, frame: String, receipt: SendReceipt);

    /// Tear the connection down. Must be safe to call more than once.
    fn close(&mut self);
}

/// Opens physical connections.
pub trait Transport: Send + Sync + 'static {
    /// Start a connection attempt. The outcome is reported on `events`.
    fn open(&self, link: LinkId, events: UnboundedSender<LinkEvent>) -> Box<dyn PhysicalLink>;
}
