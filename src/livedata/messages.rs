//! Live query protocol messages.

use crate::error::{LiveError, Result};
use crate::stream::Message;
use crate::types::Document;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stream event name every live query message travels under.
pub const LIVEDATA_EVENT: &str = "livedata";

/// Everything the live query layer says, in either direction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "msg", rename_all = "snake_case")]
pub enum LiveMessage {
    // --- Client to server ---
    /// Start a subscription to a named publication.
    Sub {
        id: String,
        name: String,
        #[serde(default)]
        params: Value,
    },

    /// Stop a subscription.
    Unsub { id: String },

    // --- Server to client ---
    /// A document entered the result set.
    Added {
        collection: String,
        id: String,
        fields: Document,
    },

    /// A document in the result set changed. `fields` is the full new
    /// document.
    Changed {
        collection: String,
        id: String,
        fields: Document,
    },

    /// A document left the result set.
    Removed { collection: String, id: String },

    /// Initial results for these subscriptions have all been sent.
    Ready { subs: Vec<String> },

    /// The subscription could not be started.
    NoSub { id: String, error: String },
}

impl LiveMessage {
    /// Stream arguments carrying this message.
    pub fn to_args(&self) -> Result<Vec<Value>> {
        Ok(vec![serde_json::to_value(self)?])
    }

    /// Decode from stream arguments.
    pub fn from_args(args: &[Value]) -> Result<Self> {
        let [value] = args else {
            return Err(LiveError::MalformedFrame(format!(
                "expected one livedata argument, got {}",
                args.len()
            )));
        };
        serde_json::from_value(value.clone()).map_err(|e| LiveError::MalformedFrame(e.to_string()))
    }

    /// As an outbound stream message.
    pub fn to_message(&self) -> Result<Message> {
        Ok(Message::new(LIVEDATA_EVENT, self.to_args()?))
    }

    /// Decode a queued stream message, if it is one of ours.
    pub fn from_message(message: &Message) -> Option<Self> {
        if message.event != LIVEDATA_EVENT {
            return None;
        }
        Self::from_args(&message.args).ok()
    }

    /// Subscription bookkeeping that goes stale across reconnects.
    pub fn is_subscription_control(&self) -> bool {
        matches!(self, LiveMessage::Sub { .. } | LiveMessage::Unsub { .. })
    }
}
