/// Structured error types for docrepo-core.
///
/// Uses `thiserror` so callers can branch on the failure class (absent vs
/// broken, write side vs read side, could-not-start vs aborted). Binary crates
/// (docrepo-cli) wrap these in `anyhow` for reporting.
use std::fmt;

use thiserror::Error;

use crate::store::{ConnectionRole, StoreError};

/// Phase of an index reconciliation run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilePhase {
    Validate,
    List,
    Drop,
    Create,
}

impl fmt::Display for ReconcilePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            ReconcilePhase::Validate => "validate",
            ReconcilePhase::List => "list",
            ReconcilePhase::Drop => "drop",
            ReconcilePhase::Create => "create",
        };
        f.write_str(phase)
    }
}

/// Main error type for docrepo operations
#[derive(Error, Debug)]
pub enum Error {
    /// Missing URL or database name, or a mandated index hint was not supplied
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Connecting to or pinging one side of the router failed
    #[error("{side} connection failed: {source}")]
    Connectivity {
        side: ConnectionRole,
        #[source]
        source: StoreError,
    },

    /// The store rejected or failed a query or write
    #[error("{operation} on '{collection}' failed: {source}")]
    Query {
        operation: &'static str,
        collection: String,
        #[source]
        source: StoreError,
    },

    /// A single-document operation matched nothing
    #[error("{operation} on '{collection}' matched no document")]
    NotFound {
        operation: &'static str,
        collection: String,
    },

    /// A stored document could not be mapped onto the target type
    #[error("failed to decode {operation} result from '{collection}': {source}")]
    Decode {
        operation: &'static str,
        collection: String,
        #[source]
        source: serde_json::Error,
    },

    /// A model could not be serialized into a document
    #[error("failed to encode document for '{collection}': {reason}")]
    Encode { collection: String, reason: String },

    /// Index reconciliation aborted; earlier phases may already have applied
    #[error("index reconciliation of '{collection}' failed in {phase} phase (index '{index}'): {reason}")]
    IndexReconciliation {
        collection: String,
        phase: ReconcilePhase,
        index: String,
        reason: String,
        #[source]
        source: Option<StoreError>,
    },

    /// A session or transaction could not be opened
    #[error("transaction could not start: {source}")]
    TransactionStart {
        #[source]
        source: StoreError,
    },

    /// The transaction body or its commit failed; nothing was committed
    #[error("transaction aborted: {source}")]
    TransactionAborted {
        #[source]
        source: Box<Error>,
    },

    /// The call context was cancelled before the operation finished
    #[error("{operation} cancelled")]
    Cancelled { operation: &'static str },

    /// The call context deadline elapsed before the operation finished
    #[error("{operation} exceeded its deadline")]
    Timeout { operation: &'static str },

    /// Caller supplied arguments that can never succeed
    #[error("invalid input for {operation}: {reason}")]
    InvalidInput {
        operation: &'static str,
        reason: String,
    },

    /// Business failure raised by transaction work or other caller code
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for docrepo operations
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Create a configuration error
    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a query error for an operation on a collection
    pub fn query(operation: &'static str, collection: impl Into<String>, source: StoreError) -> Self {
        Self::Query {
            operation,
            collection: collection.into(),
            source,
        }
    }

    /// Create a not found error
    pub fn not_found(operation: &'static str, collection: impl Into<String>) -> Self {
        Self::NotFound {
            operation,
            collection: collection.into(),
        }
    }

    /// Create a decode error
    pub fn decode(
        operation: &'static str,
        collection: impl Into<String>,
        source: serde_json::Error,
    ) -> Self {
        Self::Decode {
            operation,
            collection: collection.into(),
            source,
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            operation,
            reason: reason.into(),
        }
    }

    /// Create a reconciliation error caused by the store
    pub fn reconcile(
        collection: impl Into<String>,
        phase: ReconcilePhase,
        index: impl Into<String>,
        source: StoreError,
    ) -> Self {
        Self::IndexReconciliation {
            collection: collection.into(),
            phase,
            index: index.into(),
            reason: source.to_string(),
            source: Some(source),
        }
    }

    /// Create a reconciliation error for a descriptor rejected before any store call
    pub fn rejected_index(
        collection: impl Into<String>,
        index: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::IndexReconciliation {
            collection: collection.into(),
            phase: ReconcilePhase::Validate,
            index: index.into(),
            reason: reason.into(),
            source: None,
        }
    }

    /// True when a single-document read found nothing
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// True when the call context fired (deadline or cancellation)
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Cancelled { .. } | Self::Timeout { .. })
    }
}
