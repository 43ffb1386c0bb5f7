//! Selectors, options and results for store operations.

use crate::error::{LiveError, Result};
use crate::types::Document;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Which documents an operation applies to.
#[derive(Clone, Debug, PartialEq)]
pub enum Selector {
    /// Single-identity shortcut: `{"_id": id}`. Reads return one document.
    Id(String),
    /// A filter document. `{}` matches everything.
    Filter(Document),
}

impl Selector {
    /// Match every document.
    pub fn all() -> Self {
        Selector::Filter(json!({}))
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Selector::Id(_))
    }

    /// The filter document the driver sees.
    pub fn to_filter(&self) -> Document {
        match self {
            Selector::Id(id) => json!({ "_id": id }),
            Selector::Filter(filter) => filter.clone(),
        }
    }
}

impl From<&str> for Selector {
    fn from(id: &str) -> Self {
        Selector::Id(id.to_string())
    }
}

impl From<String> for Selector {
    fn from(id: String) -> Self {
        Selector::Id(id)
    }
}

impl From<Value> for Selector {
    fn from(filter: Value) -> Self {
        match filter {
            Value::String(id) => Selector::Id(id),
            Value::Null => Selector::all(),
            other => Selector::Filter(other),
        }
    }
}

/// Sort direction for one key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordered list of sort keys. Earlier keys take precedence.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SortSpec(pub Vec<(String, SortOrder)>);

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn asc(mut self, key: impl Into<String>) -> Self {
        self.0.push((key.into(), SortOrder::Ascending));
        self
    }

    pub fn desc(mut self, key: impl Into<String>) -> Self {
        self.0.push((key.into(), SortOrder::Descending));
        self
    }

    /// Parse `{"x": 1, "y": -1}` or `[["x", 1], ["y", -1]]`.
    ///
    /// Object form follows the map's key order; use the array form when key
    /// precedence matters.
    pub fn from_document(spec: &Value) -> Result<Self> {
        fn order(direction: &Value) -> Result<SortOrder> {
            match direction.as_i64() {
                Some(d) if d > 0 => Ok(SortOrder::Ascending),
                Some(d) if d < 0 => Ok(SortOrder::Descending),
                _ => Err(LiveError::InvalidSelector(format!(
                    "sort direction must be 1 or -1, got {}",
                    direction
                ))),
            }
        }

        let mut keys = Vec::new();
        match spec {
            Value::Object(map) => {
                for (key, direction) in map {
                    keys.push((key.clone(), order(direction)?));
                }
            }
            Value::Array(pairs) => {
                for pair in pairs {
                    match pair.as_array().map(Vec::as_slice) {
                        Some([Value::String(key), direction]) => {
                            keys.push((key.clone(), order(direction)?));
                        }
                        _ => {
                            return Err(LiveError::InvalidSelector(format!(
                                "bad sort pair {}",
                                pair
                            )))
                        }
                    }
                }
            }
            other => {
                return Err(LiveError::InvalidSelector(format!(
                    "bad sort spec {}",
                    other
                )))
            }
        }
        Ok(SortSpec(keys))
    }
}

/// Options for reads. Applied as sort, then skip, then limit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Option<SortSpec>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn sort(mut self, sort: SortSpec) -> Self {
        self.sort = Some(sort);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }
}

/// Options for updates.
///
/// **`multi` defaults to true**: an update touches every matching document
/// unless the caller opts out with [`UpdateOptions::single`] or uses an
/// identity selector.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateOptions {
    pub upsert: bool,
    pub multi: Option<bool>,
}

impl UpdateOptions {
    /// Only the first matching document.
    pub fn single() -> Self {
        Self {
            upsert: false,
            multi: Some(false),
        }
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }

    /// Effective multi flag.
    pub fn is_multi(&self) -> bool {
        self.multi.unwrap_or(true)
    }
}

/// Resolved write flags as handed to a driver.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WriteFlags {
    pub upsert: bool,
    pub multi: bool,
}

impl From<&UpdateOptions> for WriteFlags {
    fn from(options: &UpdateOptions) -> Self {
        Self {
            upsert: options.upsert,
            multi: options.is_multi(),
        }
    }
}

/// Result of a read.
#[derive(Clone, Debug, PartialEq)]
pub enum Found {
    /// Identity selector: the document, if it exists.
    One(Option<Document>),
    /// Filter selector: every match, in order.
    Many(Vec<Document>),
}

impl Found {
    pub fn into_vec(self) -> Vec<Document> {
        match self {
            Found::One(doc) => doc.into_iter().collect(),
            Found::Many(docs) => docs,
        }
    }

    pub fn into_one(self) -> Option<Document> {
        match self {
            Found::One(doc) => doc,
            Found::Many(docs) => docs.into_iter().next(),
        }
    }
}

/// Kind of completed write, as reported to write observers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteKind {
    Insert,
    Update,
    Remove,
}

/// A write the store confirmed.
#[derive(Clone, Debug, PartialEq)]
pub struct WriteEvent {
    pub collection: String,
    pub kind: WriteKind,
}
