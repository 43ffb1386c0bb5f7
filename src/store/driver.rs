//! Callback-style driver seam and the single-resolution reply slot.

use super::types::{FindOptions, WriteFlags};
use crate::error::{LiveError, Result};
use crate::types::Document;
use std::sync::Arc;
use tokio::sync::oneshot;

type ResolveHook = Box<dyn FnOnce(bool) + Send>;

/// Callback a driver resolves exactly once when an operation finishes.
///
/// Consuming `resolve` makes a second answer impossible; dropping the reply
/// unanswered wakes the waiter with [`LiveError::CallAbandoned`].
pub struct Reply<T> {
    tx: oneshot::Sender<Result<T>>,
    on_resolve: Option<ResolveHook>,
}

/// The waiting half of an outstanding operation.
pub struct PendingCall<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Reply<T> {
    /// A fresh reply slot and the call waiting on it.
    pub fn channel() -> (Reply<T>, PendingCall<T>) {
        let (tx, rx) = oneshot::channel();
        (
            Reply {
                tx,
                on_resolve: None,
            },
            PendingCall { rx },
        )
    }

    /// Run `hook(succeeded)` at resolution time, before the waiter resumes.
    pub(crate) fn with_hook(mut self, hook: impl FnOnce(bool) + Send + 'static) -> Self {
        self.on_resolve = Some(Box::new(hook));
        self
    }

    /// Deliver the outcome.
    pub fn resolve(mut self, result: Result<T>) {
        if let Some(hook) = self.on_resolve.take() {
            hook(result.is_ok());
        }
        // The waiter may have given up; nothing to do then.
        let _ = self.tx.send(result);
    }
}

impl<T> PendingCall<T> {
    /// Suspend until the driver answers.
    pub async fn wait(self) -> Result<T> {
        self.rx.await.unwrap_or(Err(LiveError::CallAbandoned))
    }
}

/// An asynchronous, callback-based data-store driver.
///
/// Every method returns immediately and answers later through its reply.
/// Selectors arrive as filter documents; the identity shortcut has already
/// been expanded to `{"_id": id}`.
pub trait Driver: Send + Sync + 'static {
    fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
        reply: Reply<Vec<Document>>,
    );

    /// Persist a document that already carries an `_id`.
    fn insert(&self, collection: &str, document: Document, reply: Reply<()>);

    /// Answers with the number of documents modified or upserted.
    fn update(
        &self,
        collection: &str,
        filter: Document,
        modifier: Document,
        flags: WriteFlags,
        reply: Reply<u64>,
    );

    /// Answers with the number of documents removed.
    fn remove(&self, collection: &str, filter: Document, reply: Reply<u64>);
}

/// Opens the driver's store connection.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, url: &str, reply: Reply<Arc<dyn Driver>>);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_resolve_wakes_waiter() {
        let (reply, pending) = Reply::channel();
        reply.resolve(Ok(5u64));
        assert_eq!(pending.wait().await, Ok(5));
    }

    #[tokio::test]
    async fn test_dropped_reply_is_abandoned() {
        let (reply, pending) = Reply::<u64>::channel();
        drop(reply);
        assert_eq!(pending.wait().await, Err(LiveError::CallAbandoned));
    }

    #[tokio::test]
    async fn test_hook_runs_before_waiter_sees_result() {
        let flag = Arc::new(AtomicBool::new(false));
        let (reply, pending) = Reply::<()>::channel();
        let reply = {
            let flag = Arc::clone(&flag);
            reply.with_hook(move |ok| flag.store(ok, Ordering::SeqCst))
        };

        reply.resolve(Ok(()));
        pending.wait().await.unwrap();
        assert!(flag.load(Ordering::SeqCst));
    }
}
