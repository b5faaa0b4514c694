//! Driver error classification

use docrepo_core::StoreError;
use mongodb::error::{ErrorKind, WriteFailure};

/// E11000: unique index violation
pub const DUPLICATE_KEY: i32 = 11000;
/// Same index name, different options
pub const INDEX_OPTIONS_CONFLICT: i32 = 85;
/// Same index name, different key specification
pub const INDEX_KEY_SPECS_CONFLICT: i32 = 86;
pub const INDEX_NOT_FOUND: i32 = 27;
pub const NAMESPACE_NOT_FOUND: i32 = 26;

/// Map a driver error onto the store error classes the core branches on.
pub fn map_error(err: mongodb::error::Error) -> StoreError {
    match server_code(&err) {
        Some(code) => classify_code(code, err),
        None => match err.kind.as_ref() {
            ErrorKind::ServerSelection { .. } | ErrorKind::Io(_) => {
                StoreError::Unreachable(err.to_string())
            }
            ErrorKind::Transaction { message, .. } => StoreError::Transaction(message.clone()),
            ErrorKind::InvalidArgument { message, .. } => {
                StoreError::InvalidRequest(message.clone())
            }
            _ if err.to_string().contains("E11000") => StoreError::DuplicateKey(err.to_string()),
            _ => StoreError::Backend(Box::new(err)),
        },
    }
}

/// Server error code carried by a command or write failure
pub fn server_code(err: &mongodb::error::Error) -> Option<i32> {
    match err.kind.as_ref() {
        ErrorKind::Command(command) => Some(command.code),
        ErrorKind::Write(WriteFailure::WriteError(write)) => Some(write.code),
        _ => None,
    }
}

fn classify_code(code: i32, err: mongodb::error::Error) -> StoreError {
    match classify(code) {
        Some(Class::DuplicateKey) => StoreError::DuplicateKey(err.to_string()),
        Some(Class::IndexConflict) => StoreError::IndexConflict(err.to_string()),
        Some(Class::IndexNotFound) => StoreError::IndexNotFound(err.to_string()),
        None => StoreError::Backend(Box::new(err)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Class {
    DuplicateKey,
    IndexConflict,
    IndexNotFound,
}

fn classify(code: i32) -> Option<Class> {
    match code {
        DUPLICATE_KEY => Some(Class::DuplicateKey),
        INDEX_OPTIONS_CONFLICT | INDEX_KEY_SPECS_CONFLICT => Some(Class::IndexConflict),
        INDEX_NOT_FOUND => Some(Class::IndexNotFound),
        _ => None,
    }
}
