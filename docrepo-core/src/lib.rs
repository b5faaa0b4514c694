pub mod config;
pub mod context;
pub mod error;
pub mod index;
pub mod model;
pub mod observe;
pub mod options;
pub mod pagination;
pub mod repository;
pub mod router;
pub mod store;
pub mod transaction;

pub use config::{RouterConfig, DEFAULT_CONNECT_TIMEOUT};
pub use context::{CallContext, CancelHandle};
pub use error::{Error, ReconcilePhase, Result};
pub use index::{
    IndexDescriptor, IndexInfo, IndexKey, IndexOrder, IndexReconciler, ReconcilePlan,
    ReconcileReport, PRIMARY_KEY_INDEX,
};
pub use model::Model;
pub use observe::{CommandEvent, CommandObserver, CommandOutcome, TracingObserver};
pub use options::{
    to_document, AggregateOptions, BulkWriteOptions, CountOptions, DeleteOptions, Document,
    FindOneAndUpdateOptions, FindOneOptions, FindOptions, Hint, InsertManyOptions, ReturnDocument,
    Update, UpdateOptions,
};
pub use pagination::{Paginated, Pagination, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT};
pub use repository::{
    BulkOperation, BulkResult, HintPolicy, Repository, RepositoryOptions, UpdateOutcome,
};
pub use router::ConnectionRouter;
pub use store::memory::{CommandRecord, MemoryConnector, MemoryServer, MEMORY_SCHEME};
pub use store::{ConnectionRole, ReadPreference, StoreError};
pub use transaction::TransactionCoordinator;
