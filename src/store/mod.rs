//! Store access that reads like blocking calls.
//!
//! This module wraps a callback-based driver so each store operation:
//! - suspends only the task that issued it, on a single-resolution reply slot
//! - waits in a startup queue, in arrival order, until the store connection
//!   exists
//! - returns writes only once the store has confirmed them
//!
//! Updates default to `multi: true`. See [`StoreFacade`].
//!
//! # Example
//!
//! ```ignore
//! let store = StoreFacade::connect(&MemoryConnector::new(MemoryDriver::new()), &config);
//!
//! // Queued until the connection is up, then issued in order.
//! let id = store.insert("rooms", json!({"name": "lobby"})).await?;
//!
//! let sorted = store
//!     .find("rooms", Selector::all(), FindOptions::default().sort(SortSpec::new().asc("name")).limit(10))
//!     .await?;
//!
//! // Touches every matching room.
//! store.update("rooms", json!({"open": true}), json!({"$set": {"seen": true}}), UpdateOptions::default()).await?;
//! ```

mod driver;
mod facade;
mod memory;
mod query;
mod types;

pub use driver::{Connector, Driver, PendingCall, Reply};
pub use facade::{ObserverId, StoreFacade, WriteObserver};
pub use memory::{MemoryConnector, MemoryDriver};
pub use query::{apply_modifier, compare_values, lookup, matches, sort_documents};
pub use types::{
    FindOptions, Found, Selector, SortOrder, SortSpec, UpdateOptions, WriteEvent, WriteFlags,
    WriteKind,
};
