//! Replayable outbound queue.

use super::frame::Message;
use crate::types::SequenceId;
use std::collections::BTreeMap;

/// Rewrites queued payloads when a new physical connection comes up.
pub type ResetHook = Box<dyn Fn(Vec<Message>) -> Vec<Message> + Send>;

/// Outbound messages not yet confirmed sent, keyed by sequence id.
///
/// Iteration order is sequence-id order. Entries leave only on
/// [`OutboundQueue::confirm`].
#[derive(Debug, Default)]
pub struct OutboundQueue {
    messages: BTreeMap<SequenceId, Message>,
    next_seq: SequenceId,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message under a fresh sequence id.
    pub fn push(&mut self, message: Message) -> SequenceId {
        let seq = self.next_seq;
        self.next_seq = seq.next();
        self.messages.insert(seq, message);
        seq
    }

    /// Drop a message whose send was confirmed. Unknown ids are ignored:
    /// late confirmations for messages already re-queued under new ids are
    /// expected after a reset.
    pub fn confirm(&mut self, seq: SequenceId) -> bool {
        self.messages.remove(&seq).is_some()
    }

    /// Run `hooks` in order over the queued payloads and re-queue the result
    /// under fresh ids, in the order returned.
    pub fn reset(&mut self, hooks: &[ResetHook]) {
        let mut payloads: Vec<Message> = std::mem::take(&mut self.messages).into_values().collect();
        for hook in hooks {
            payloads = hook(payloads);
        }
        for message in payloads {
            self.push(message);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (SequenceId, &Message)> {
        self.messages.iter().map(|(seq, message)| (*seq, message))
    }

    pub fn get(&self, seq: SequenceId) -> Option<&Message> {
        self.messages.get(&seq)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
