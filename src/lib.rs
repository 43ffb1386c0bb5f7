//! # Livedata
//!
//! Client/server plumbing for live-updating applications.
//!
//! ## Core Concepts
//!
//! - **Contexts**: One-shot invalidation that makes any value reactive
//! - **Streams**: One logical message stream over many physical connections,
//!   with in-order, at-least-once replay of unconfirmed messages
//! - **Store facade**: Callback-based store drivers behind calls that read
//!   like blocking ones
//! - **Live queries**: Named publications streamed to a reactive client cache
//!
//! ## Example
//!
//! ```ignore
//! use livedata::{autorun, ReconnectConfig, ReconnectingStream};
//!
//! let stream = ReconnectingStream::connect(transport, ReconnectConfig::default())?;
//!
//! // Re-runs on every status change
//! autorun({
//!     let stream = stream.clone();
//!     move || println!("stream is {}", stream.status().state)
//! });
//!
//! // Delivered once connected, even across reconnects
//! stream.emit("ping", vec![json!(1)])?;
//! ```

pub mod config;
pub mod deps;
pub mod error;
pub mod livedata;
pub mod store;
pub mod stream;
pub mod types;

// Re-exports
pub use config::{LiveConfig, ReconnectConfig, StoreConfig, STORE_URL_ENV};
pub use deps::{autorun, Computation, Context, ListenerRegistry, ReactiveCell};
pub use error::{LiveError, Result};
pub use livedata::{LiveClient, LiveCollection, LiveMessage, Publications, QuerySpec, Session};
pub use store::{
    Connector, Driver, FindOptions, Found, MemoryConnector, MemoryDriver, Selector, SortOrder,
    SortSpec, StoreFacade, UpdateOptions, WriteEvent, WriteKind,
};
pub use stream::{
    LinkEvent, Message, PhysicalLink, ReconnectingStream, SendReceipt, ServerSocket,
    SocketOutbound, StreamServer, Transport,
};
pub use types::*;
