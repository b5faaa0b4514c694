//! MongoDB store for docrepo
//!
//! [`MongoConnector`] plugs the official driver into
//! [`docrepo_core::ConnectionRouter`]: each router side gets its own client
//! with the read preference the router asks for, driver command events are
//! relayed to the configured observer, and driver errors are classified into
//! [`docrepo_core::StoreError`] (duplicate key, index conflict, unreachable).
//!
//! Bulk writes run as sequential single-document operations so they take
//! part in the bound session like every other call.

pub mod collection;
pub mod connection;
pub mod convert;
pub mod error;
pub mod session;

pub use collection::MongoCollection;
pub use connection::{MongoConnection, MongoConnector, MONGODB_SCHEMES};
pub use error::map_error;
pub use session::MongoSession;
