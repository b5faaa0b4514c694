use std::sync::Arc;

use async_trait::async_trait;
use docrepo_core::store::{ConnectOptions, Connection, Connector, StoreResult};
use docrepo_core::{MemoryConnector, MEMORY_SCHEME};
use docrepo_mongo::MongoConnector;

/// Picks the store implementation from the connection string scheme.
///
/// `memory://` targets open a process-local store, which is empty on every
/// run; everything else goes to the MongoDB driver.
pub struct SchemeConnector {
    memory: MemoryConnector,
    mongo: MongoConnector,
}

impl SchemeConnector {
    pub fn new() -> Self {
        Self {
            memory: MemoryConnector::new(),
            mongo: MongoConnector::new().with_app_name("docrepo-cli"),
        }
    }
}

#[async_trait]
impl Connector for SchemeConnector {
    async fn connect(&self, target: &str, options: ConnectOptions) -> StoreResult<Arc<dyn Connection>> {
        if target.starts_with(MEMORY_SCHEME) {
            self.memory.connect(target, options).await
        } else {
            self.mongo.connect(target, options).await
        }
    }
}

impl Default for SchemeConnector {
    fn default() -> Self {
        Self::new()
    }
}
