//! Live queries over the reconnecting stream.
//!
//! A server [`Publications`] registry maps names to store queries. Each
//! connected client gets a [`Session`] that runs its subscriptions and
//! re-runs them whenever the store confirms a write to the same collection,
//! sending only what changed. On the client, [`LiveClient`] keeps a reactive
//! [`LiveCollection`] cache per collection.
//!
//! # Example
//!
//! ```ignore
//! // Server
//! let publications = Publications::new();
//! publications.publish("open-rooms", |_| Ok(QuerySpec::new("rooms", json!({"open": true}))));
//! Session::serve(&server, store.clone(), publications);
//!
//! // Client
//! let client = LiveClient::new(stream)?;
//! let sub = client.subscribe("open-rooms", Value::Null)?;
//! autorun({
//!     let rooms = client.collection("rooms");
//!     move || println!("{} open rooms", rooms.len())
//! });
//! ```

mod client;
mod messages;
mod publication;

pub use client::{LiveClient, LiveCollection};
pub use messages::{LiveMessage, LIVEDATA_EVENT};
pub use publication::{LiveSink, Publications, QuerySpec, Session};
