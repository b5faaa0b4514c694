//! Documents and per-operation option types
//!
//! Every repository call takes one explicit option value with named fields
//! and documented defaults. Nothing is mutated behind the caller's back: the
//! repository copies the options it is given before injecting pagination.

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A document as exchanged with the store. Key order is preserved.
pub type Document = Map<String, Value>;

/// Convert a JSON value into a document, rejecting non-objects.
pub fn to_document(operation: &'static str, value: Value) -> Result<Document> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(Error::invalid_input(
            operation,
            format!("expected a JSON object, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Index hint attached to a query or write
#[derive(Debug, Clone, PartialEq)]
pub enum Hint {
    /// Hint by index name
    Name(String),
    /// Hint by key specification
    Keys(Document),
}

impl Hint {
    pub fn name(name: impl Into<String>) -> Self {
        Hint::Name(name.into())
    }
}

/// An update payload. The caller always states how it should be applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    /// Field values wrapped in a `$set` operator before sending
    Set(Document),
    /// An already-formed operator document (`$set`, `$inc`, `$unset`, ...)
    Raw(Document),
}

impl Update {
    /// Produce the operator document sent to the store.
    ///
    /// `Set` must contain at least one field. `Raw` must be non-empty and
    /// every top-level key must be an operator.
    pub fn into_document(self, operation: &'static str) -> Result<Document> {
        match self {
            Update::Set(fields) => {
                if fields.is_empty() {
                    return Err(Error::invalid_input(operation, "empty $set update"));
                }
                let mut update = Document::new();
                update.insert("$set".to_string(), Value::Object(fields));
                Ok(update)
            }
            Update::Raw(update) => {
                if update.is_empty() {
                    return Err(Error::invalid_input(operation, "empty update document"));
                }
                if let Some(key) = update.keys().find(|key| !key.starts_with('$')) {
                    return Err(Error::invalid_input(
                        operation,
                        format!("raw update key '{key}' is not an update operator"),
                    ));
                }
                Ok(update)
            }
        }
    }
}

/// Options for `find`
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Sort specification, e.g. `{"created_at": -1}`
    pub sort: Option<Document>,
    /// Projection applied to each returned document
    pub projection: Option<Document>,
    /// Documents to skip. Overwritten when a pagination is supplied.
    pub skip: Option<u64>,
    /// Maximum documents to return. Overwritten when a pagination is supplied.
    pub limit: Option<i64>,
    pub hint: Option<Hint>,
}

impl FindOptions {
    pub fn sorted_by(sort: Document) -> Self {
        Self {
            sort: Some(sort),
            ..Self::default()
        }
    }
}

/// Options for `find_one`
#[derive(Debug, Clone, Default)]
pub struct FindOneOptions {
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub skip: Option<u64>,
    pub hint: Option<Hint>,
}

/// Which version of the document `find_one_and_update` returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReturnDocument {
    Before,
    /// Default: the document after the update was applied
    #[default]
    After,
}

/// Options for `find_one_and_update`
#[derive(Debug, Clone, Default)]
pub struct FindOneAndUpdateOptions {
    pub return_document: ReturnDocument,
    /// Insert a new document when nothing matches (default false)
    pub upsert: bool,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub hint: Option<Hint>,
}

/// Options for `update_one`, `update_many` and `update_set_one`
#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    /// Insert a new document when nothing matches (default false)
    pub upsert: bool,
    /// Required when the repository's hint policy is `Required`
    pub hint: Option<Hint>,
}

impl UpdateOptions {
    pub fn with_hint(hint: Hint) -> Self {
        Self {
            hint: Some(hint),
            ..Self::default()
        }
    }

    pub fn upsert(mut self) -> Self {
        self.upsert = true;
        self
    }
}

/// Options for `delete_matching`
#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub hint: Option<Hint>,
}

/// Options for `count`
#[derive(Debug, Clone, Default)]
pub struct CountOptions {
    pub skip: Option<u64>,
    pub limit: Option<u64>,
    pub hint: Option<Hint>,
}

/// Options for `insert_many`
#[derive(Debug, Clone)]
pub struct InsertManyOptions {
    /// Stop at the first failed insert (default true)
    pub ordered: bool,
}

impl Default for InsertManyOptions {
    fn default() -> Self {
        Self { ordered: true }
    }
}

/// Options for `bulk_write`
#[derive(Debug, Clone)]
pub struct BulkWriteOptions {
    /// Stop at the first failed operation (default true). Unordered batches
    /// run every operation and report the first failure afterwards.
    pub ordered: bool,
}

impl Default for BulkWriteOptions {
    fn default() -> Self {
        Self { ordered: true }
    }
}

/// Options for `aggregate`
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    pub allow_disk_use: bool,
    pub hint: Option<Hint>,
}
