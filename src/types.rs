//! Core types shared across the stream, store and live query layers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Position of an outbound message in a logical stream.
///
/// Never reused for the lifetime of the stream, not even across reconnects.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct SequenceId(pub u64);

impl SequenceId {
    pub fn next(self) -> Self {
        SequenceId(self.0 + 1)
    }
}

impl fmt::Debug for SequenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seq({})", self.0)
    }
}

/// Identity of one physical connection attempt.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl fmt::Debug for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LinkId({})", self.0)
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable handle of an invalidation context.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContextId(pub u64);

impl fmt::Debug for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContextId({})", self.0)
    }
}

/// Identity of a server-side socket.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SocketId(pub u64);

impl fmt::Debug for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SocketId({})", self.0)
    }
}

/// Milliseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or_default();
        Timestamp(millis)
    }

    /// This timestamp shifted forward by `millis`.
    pub fn plus_millis(self, millis: u64) -> Self {
        Timestamp(self.0.saturating_add(millis as i64))
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Phase of the logical stream's connection state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Before the first attempt has resolved.
    Startup,
    /// A retry attempt is outstanding.
    Connecting,
    /// A physical connection is up.
    Connected,
    /// Backing off until the next retry.
    Waiting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Startup => "startup",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Waiting => "waiting",
        };
        f.write_str(name)
    }
}

/// Observable status of a logical stream.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub connected: bool,
    pub retry_count: u32,
    /// When the scheduled retry fires. Only set while waiting.
    pub retry_time: Option<Timestamp>,
}

impl Default for ConnectionStatus {
    fn default() -> Self {
        Self {
            state: ConnectionState::Startup,
            connected: false,
            retry_count: 0,
            retry_time: None,
        }
    }
}

/// A stored document. Always a JSON object in practice.
pub type Document = serde_json::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_status_is_startup() {
        let status = ConnectionStatus::default();
        assert_eq!(status.state, ConnectionState::Startup);
        assert!(!status.connected);
        assert_eq!(status.retry_count, 0);
        assert!(status.retry_time.is_none());
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&ConnectionState::Waiting).unwrap();
        assert_eq!(json, "\"waiting\"");
        assert_eq!(ConnectionState::Connecting.to_string(), "connecting");
    }
}
