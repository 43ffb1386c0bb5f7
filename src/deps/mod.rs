//! Reactive dependency tracking.
//!
//! This module provides the invalidation primitive every live value is
//! built on:
//! - [`Context`]: one-shot invalidation with `on_invalidate` callbacks
//! - [`ListenerRegistry`]: contexts interested in a value, self-cleaning
//! - [`ReactiveCell`]: a value that registers readers and invalidates them
//!   on write
//! - [`autorun`]: re-run a closure whenever something it read changes
//!
//! # Example
//!
//! ```ignore
//! let status = ReactiveCell::new("startup");
//!
//! let computation = autorun({
//!     let status = status.clone();
//!     move || println!("status is {}", status.get())
//! });
//! // Prints: "status is startup"
//!
//! status.set("connected");
//! // Prints: "status is connected"
//!
//! computation.stop();
//! ```

mod context;
mod reactive;
mod registry;

pub use context::Context;
pub use reactive::{autorun, Computation, ReactiveCell};
pub use registry::ListenerRegistry;
