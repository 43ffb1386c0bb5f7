//! Wire frames carried by a physical connection.

use crate::error::{LiveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A frame as it travels over one physical connection.
///
/// Decoded once at the boundary; anything that does not parse is dropped by
/// the receiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Frame {
    /// Multiplexed tuple `(event_name, ...args)`. The receiver re-dispatches
    /// it as if `event_name` had been emitted directly.
    Message { payload: Vec<Value> },

    /// A directly named event.
    Event {
        name: String,
        #[serde(default)]
        args: Vec<Value>,
    },
}

impl Frame {
    /// Parse a frame from its JSON text.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| LiveError::MalformedFrame(e.to_string()))
    }

    /// Encode to JSON text.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Unwrap into the event it carries.
    pub fn into_message(self) -> Result<Message> {
        match self {
            Frame::Event { name, args } => Ok(Message::new(name, args)),
            Frame::Message { payload } => {
                let mut items = payload.into_iter();
                match items.next() {
                    Some(Value::String(event)) => Ok(Message::new(event, items.collect())),
                    Some(other) => Err(LiveError::MalformedFrame(format!(
                        "message frame event name must be a string, got {}",
                        other
                    ))),
                    None => Err(LiveError::MalformedFrame(
                        "empty message frame".to_string(),
                    )),
                }
            }
        }
    }
}

/// A named event with its arguments: the payload of an outbound message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub event: String,
    pub args: Vec<Value>,
}

impl Message {
    pub fn new(event: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            event: event.into(),
            args,
        }
    }

    /// Wrap into a multiplexed frame.
    pub fn to_frame(&self) -> Frame {
        let mut payload = Vec::with_capacity(self.args.len() + 1);
        payload.push(Value::String(self.event.clone()));
        payload.extend(self.args.iter().cloned());
        Frame::Message { payload }
    }
}
