//! Document store collaborator
//!
//! The traits here are everything the core consumes from a driver: connect,
//! ping, collection handles, CRUD/count/aggregate/bulk on a collection, index
//! list/create/drop, and sessions with transactions. `docrepo-mongo` provides
//! the MongoDB implementation; [`memory`] is a deterministic in-process one.

pub mod memory;

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::index::{IndexDescriptor, IndexInfo};
use crate::observe::CommandObserver;
use crate::options::{
    AggregateOptions, BulkWriteOptions, CountOptions, DeleteOptions, Document,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, InsertManyOptions, UpdateOptions,
};

/// Which side of the router a connection serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionRole {
    Write,
    Read,
}

impl fmt::Display for ConnectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionRole::Write => f.write_str("write"),
            ConnectionRole::Read => f.write_str("read"),
        }
    }
}

/// Server selection policy requested for a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPreference {
    Primary,
    SecondaryPreferred,
}

/// Everything a connector needs to open one connection
#[derive(Clone)]
pub struct ConnectOptions {
    pub role: ConnectionRole,
    pub read_preference: ReadPreference,
    pub connect_timeout: Duration,
    pub observer: Option<Arc<dyn CommandObserver>>,
}

impl fmt::Debug for ConnectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectOptions")
            .field("role", &self.role)
            .field("read_preference", &self.read_preference)
            .field("connect_timeout", &self.connect_timeout)
            .field("observer", &self.observer.is_some())
            .finish()
    }
}

/// Error reported by a store implementation
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unreachable: {0}")]
    Unreachable(String),

    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    #[error("index conflict: {0}")]
    IndexConflict(String),

    #[error("index not found: {0}")]
    IndexNotFound(String),

    #[error("unsupported by store: {0}")]
    Unsupported(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("transaction state: {0}")]
    Transaction(String),

    #[error(transparent)]
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Whether an update or delete touches the first match or every match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    One,
    Many,
}

/// Counts reported by an update
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub matched: u64,
    pub modified: u64,
    pub upserted: u64,
}

/// One operation of a document-level bulk write
#[derive(Debug, Clone, PartialEq)]
pub enum WriteModel {
    InsertOne {
        document: Document,
    },
    UpdateOne {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    UpdateMany {
        filter: Document,
        update: Document,
        upsert: bool,
    },
    ReplaceOne {
        filter: Document,
        replacement: Document,
        upsert: bool,
    },
    DeleteOne {
        filter: Document,
    },
    DeleteMany {
        filter: Document,
    },
}

/// Per-category counts reported by a bulk write
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteSummary {
    pub inserted: u64,
    pub matched: u64,
    pub modified: u64,
    pub deleted: u64,
    pub upserted: u64,
}

/// A driver session shared between the coordinator and the work it runs.
pub type SessionHandle = Arc<Mutex<Box<dyn StoreSession>>>;

/// Opens connections to a document store
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, target: &str, options: ConnectOptions) -> StoreResult<Arc<dyn Connection>>;
}

/// One logical connection with a fixed server-selection policy
#[async_trait]
pub trait Connection: Send + Sync {
    fn role(&self) -> ConnectionRole;

    fn read_preference(&self) -> ReadPreference;

    async fn ping(&self) -> StoreResult<()>;

    fn collection(&self, database: &str, name: &str) -> Arc<dyn StoreCollection>;

    async fn start_session(&self) -> StoreResult<Box<dyn StoreSession>>;
}

/// A session able to run one transaction at a time
#[async_trait]
pub trait StoreSession: Send + 'static {
    async fn start_transaction(&mut self) -> StoreResult<()>;

    async fn commit_transaction(&mut self) -> StoreResult<()>;

    async fn abort_transaction(&mut self) -> StoreResult<()>;

    /// Release the session. Any open transaction is discarded.
    async fn end(&mut self);

    /// Lets a store recover its own session type from a handle.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A collection handle scoped to one connection
#[async_trait]
pub trait StoreCollection: Send + Sync {
    fn name(&self) -> &str;

    async fn find(
        &self,
        filter: &Document,
        options: &FindOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>>;

    async fn find_one(
        &self,
        filter: &Document,
        options: &FindOneOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Option<Document>>;

    async fn find_one_and_update(
        &self,
        filter: &Document,
        update: &Document,
        options: &FindOneAndUpdateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Option<Document>>;

    async fn insert_one(&self, document: &Document, session: Option<&SessionHandle>) -> StoreResult<()>;

    async fn insert_many(
        &self,
        documents: &[Document],
        options: &InsertManyOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64>;

    async fn update(
        &self,
        filter: &Document,
        update: &Document,
        scope: Scope,
        options: &UpdateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<UpdateSummary>;

    async fn delete(
        &self,
        filter: &Document,
        scope: Scope,
        options: &DeleteOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64>;

    async fn count(
        &self,
        filter: &Document,
        options: &CountOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<u64>;

    async fn aggregate(
        &self,
        pipeline: &[Document],
        options: &AggregateOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<Vec<Document>>;

    async fn bulk_write(
        &self,
        operations: &[WriteModel],
        options: &BulkWriteOptions,
        session: Option<&SessionHandle>,
    ) -> StoreResult<BulkWriteSummary>;

    async fn list_indexes(&self) -> StoreResult<Vec<IndexInfo>>;

    /// Create an index. Creating an index identical to an existing one is a no-op.
    async fn create_index(&self, index: &IndexDescriptor) -> StoreResult<()>;

    async fn drop_index(&self, name: &str) -> StoreResult<()>;
}
