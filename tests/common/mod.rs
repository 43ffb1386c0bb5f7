//! Shared helpers for the integration tests.

#![allow(dead_code)]

use livedata::{LinkEvent, LinkId, Message, PhysicalLink, SendReceipt, Transport};
use livedata::stream::Frame;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;

/// Log to the test output when `RUST_LOG` is set.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Let every ready task run. Under a paused clock this only advances time
/// by a millisecond, well short of any stream timer.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

/// One physical connection opened through [`MockTransport`], driven by the
/// test.
pub struct MockLink {
    pub id: LinkId,
    events: UnboundedSender<LinkEvent>,
    sent: Mutex<Vec<String>>,
    receipts: Mutex<Vec<SendReceipt>>,
    closed: AtomicBool,
}

impl MockLink {
    pub fn connect(&self) {
        let _ = self.events.send(LinkEvent::Connected);
    }

    pub fn disconnect(&self) {
        let _ = self.events.send(LinkEvent::Disconnected);
    }

    pub fn fail(&self) {
        let _ = self.events.send(LinkEvent::ConnectFailed);
    }

    /// Hand the stream an inbound frame.
    pub fn deliver(&self, frame: &str) {
        let _ = self.events.send(LinkEvent::Frame(frame.to_string()));
    }

    /// Deliver a named event the way a server would send it.
    pub fn deliver_event(&self, name: &str, args: Vec<serde_json::Value>) {
        let frame = Frame::Event {
            name: name.to_string(),
            args,
        }
        .encode()
        .unwrap();
        self.deliver(&frame);
    }

    /// Raw frames written to this link.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().clone()
    }

    /// Frames written to this link, decoded.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .iter()
            .map(|frame| Frame::decode(frame).unwrap().into_message().unwrap())
            .collect()
    }

    /// Event names written to this link, in order.
    pub fn sent_events(&self) -> Vec<String> {
        self.sent_messages().into_iter().map(|m| m.event).collect()
    }

    /// Confirm the oldest `n` unconfirmed sends.
    pub fn confirm(&self, n: usize) {
        let mut receipts = self.receipts.lock();
        let n = n.min(receipts.len());
        for receipt in receipts.drain(..n) {
            receipt.confirm();
        }
    }

    pub fn confirm_all(&self) {
        let n = self.receipts.lock().len();
        self.confirm(n);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockConn {
    link: Arc<MockLink>,
    auto_confirm: bool,
}

impl PhysicalLink for MockConn {
    fn send(&mut self, frame: String, receipt: SendReceipt) {
        self.link.sent.lock().push(frame);
        if self.auto_confirm {
            receipt.confirm();
        } else {
            self.link.receipts.lock().push(receipt);
        }
    }

    fn close(&mut self) {
        self.link.closed.store(true, Ordering::SeqCst);
    }
}

/// Transport whose connections only do what the test tells them to.
#[derive(Clone, Default)]
pub struct MockTransport {
    links: Arc<Mutex<Vec<Arc<MockLink>>>>,
    auto_confirm: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Confirm every send as soon as it is written.
    pub fn auto_confirming() -> Self {
        Self {
            auto_confirm: true,
            ..Self::default()
        }
    }

    /// Physical connections opened so far.
    pub fn link_count(&self) -> usize {
        self.links.lock().len()
    }

    pub fn link(&self, index: usize) -> Arc<MockLink> {
        Arc::clone(&self.links.lock()[index])
    }

    pub fn latest(&self) -> Arc<MockLink> {
        Arc::clone(self.links.lock().last().expect("no link opened yet"))
    }

    /// Links not yet closed by the stream.
    pub fn open_links(&self) -> usize {
        self.links.lock().iter().filter(|l| !l.is_closed()).count()
    }
}

impl Transport for MockTransport {
    fn open(&self, link: LinkId, events: UnboundedSender<LinkEvent>) -> Box<dyn PhysicalLink> {
        let link = Arc::new(MockLink {
            id: link,
            events,
            sent: Mutex::new(Vec::new()),
            receipts: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });
        self.links.lock().push(Arc::clone(&link));
        Box::new(MockConn {
            link,
            auto_confirm: self.auto_confirm,
        })
    }
}
