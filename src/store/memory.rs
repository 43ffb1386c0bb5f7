//! In-memory reference driver.
//!
//! Behaves like a remote, callback-based driver: every operation does its
//! work and then answers from a freshly spawned task, never inline. Needs a
//! tokio runtime.

use super::driver::{Connector, Driver, Reply};
use super::query::{apply_modifier, matches, sort_documents, upsert_seed};
use super::types::{FindOptions, WriteFlags};
use crate::error::{LiveError, Result};
use crate::types::Document;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Collections of documents held in insertion order.
#[derive(Default)]
pub struct MemoryDriver {
    collections: Mutex<HashMap<String, Vec<Document>>>,
}

impl MemoryDriver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of documents in a collection.
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .get(collection)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn run_find(
        &self,
        collection: &str,
        filter: &Document,
        options: &FindOptions,
    ) -> Result<Vec<Document>> {
        let collections = self.collections.lock();
        let mut found = Vec::new();
        for doc in collections.get(collection).into_iter().flatten() {
            if matches(doc, filter)? {
                found.push(doc.clone());
            }
        }
        drop(collections);

        if let Some(sort) = &options.sort {
            sort_documents(&mut found, sort);
        }
        let skip = options.skip.unwrap_or(0);
        let limit = options.limit.unwrap_or(usize::MAX);
        Ok(found.into_iter().skip(skip).take(limit).collect())
    }

    fn run_insert(&self, collection: &str, document: Document) -> Result<()> {
        let id = document.get("_id").cloned().unwrap_or(Value::Null);
        if id.is_null() {
            return Err(LiveError::Store("document has no _id".to_string()));
        }

        let mut collections = self.collections.lock();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.iter().any(|doc| doc.get("_id") == Some(&id)) {
            return Err(LiveError::DuplicateKey(id.to_string()));
        }
        docs.push(document);
        Ok(())
    }

    fn run_update(
        &self,
        collection: &str,
        filter: &Document,
        modifier: &Document,
        flags: WriteFlags,
    ) -> Result<u64> {
        let mut collections = self.collections.lock();
        let docs = collections.entry(collection.to_string()).or_default();

        // Compute every replacement before touching anything, so a bad
        // modifier leaves the collection as it was.
        let mut replacements = Vec::new();
        for (index, doc) in docs.iter().enumerate() {
            if matches(doc, filter)? {
                replacements.push((index, apply_modifier(doc, modifier)?));
                if !flags.multi {
                    break;
                }
            }
        }

        if replacements.is_empty() {
            if !flags.upsert {
                return Ok(0);
            }
            let mut created = apply_modifier(&upsert_seed(filter)?, modifier)?;
            if let Some(fields) = created.as_object_mut() {
                fields
                    .entry("_id".to_string())
                    .or_insert_with(|| Value::String(uuid::Uuid::new_v4().to_string()));
            }
            docs.push(created);
            return Ok(1);
        }

        let modified = replacements.len() as u64;
        for (index, replacement) in replacements {
            docs[index] = replacement;
        }
        Ok(modified)
    }

    fn run_remove(&self, collection: &str, filter: &Document) -> Result<u64> {
        let mut collections = self.collections.lock();
        let Some(docs) = collections.get_mut(collection) else {
            return Ok(0);
        };

        // Decide every match first so a bad selector removes nothing.
        let doomed: Vec<bool> = docs
            .iter()
            .map(|doc| matches(doc, filter))
            .collect::<Result<_>>()?;
        let before = docs.len();
        let mut doomed = doomed.into_iter();
        docs.retain(|_| !doomed.next().unwrap_or(false));
        Ok((before - docs.len()) as u64)
    }
}

/// Answer from another task, the way a network driver would.
fn answer_later<T: Send + 'static>(reply: Reply<T>, result: Result<T>) {
    tokio::spawn(async move {
        reply.resolve(result);
    });
}

impl Driver for MemoryDriver {
    fn find(
        &self,
        collection: &str,
        filter: Document,
        options: FindOptions,
        reply: Reply<Vec<Document>>,
    ) {
        trace!(collection, %filter, "find");
        answer_later(reply, self.run_find(collection, &filter, &options));
    }

    fn insert(&self, collection: &str, document: Document, reply: Reply<()>) {
        trace!(collection, "insert");
        answer_later(reply, self.run_insert(collection, document));
    }

    fn update(
        &self,
        collection: &str,
        filter: Document,
        modifier: Document,
        flags: WriteFlags,
        reply: Reply<u64>,
    ) {
        trace!(collection, %filter, multi = flags.multi, upsert = flags.upsert, "update");
        answer_later(reply, self.run_update(collection, &filter, &modifier, flags));
    }

    fn remove(&self, collection: &str, filter: Document, reply: Reply<u64>) {
        trace!(collection, %filter, "remove");
        answer_later(reply, self.run_remove(collection, &filter));
    }
}

/// Connects `memory://` URLs to a shared [`MemoryDriver`].
pub struct MemoryConnector {
    driver: Arc<MemoryDriver>,
    delay: Duration,
}

impl MemoryConnector {
    pub fn new(driver: Arc<MemoryDriver>) -> Self {
        Self {
            driver,
            delay: Duration::ZERO,
        }
    }

    /// Take `delay` to connect.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: &str, reply: Reply<Arc<dyn Driver>>) {
        if !url.starts_with("memory://") {
            answer_later(
                reply,
                Err(LiveError::StoreUnavailable(format!(
                    "unsupported store url {}",
                    url
                ))),
            );
            return;
        }

        let driver: Arc<dyn Driver> = self.driver.clone();
        let delay = self.delay;
        tokio::spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            reply.resolve(Ok(driver));
        });
    }
}
