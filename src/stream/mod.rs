//! Reconnecting message streams.
//!
//! This module hides physical reconnects behind one logical stream:
//! - [`ReconnectingStream`]: client handle with `emit`, `on`, `status` and
//!   `reconnect`
//! - [`OutboundQueue`]: unconfirmed messages, replayed in order on every new
//!   physical connection
//! - [`Transport`] / [`PhysicalLink`]: the seam to a concrete wire transport
//! - [`StreamServer`]: server-side socket bookkeeping and frame unwrapping
//!
//! The status cycles `startup → connecting → connected → waiting →
//! connecting → …` and never terminates. Transport failures only ever show
//! up as status changes.
//!
//! # Example
//!
//! ```ignore
//! let stream = ReconnectingStream::connect(transport, ReconnectConfig::default())?;
//!
//! stream.on("pong", |args| println!("pong: {:?}", args));
//! stream.emit("ping", vec![])?;
//!
//! autorun({
//!     let stream = stream.clone();
//!     move || println!("now {}", stream.status().state)
//! });
//! ```

mod backoff;
mod client;
mod frame;
mod handlers;
mod queue;
mod server;
mod transport;

pub use backoff::{base_delay_ms, jitter_band, retry_delay};
pub use client::ReconnectingStream;
pub use frame::{Frame, Message};
pub use handlers::{EventCallback, EventHandlers};
pub use queue::{OutboundQueue, ResetHook};
pub use server::{ServerSocket, SocketOutbound, StreamServer};
pub use transport::{LinkEvent, PhysicalLink, SendAck, SendReceipt, Transport};
