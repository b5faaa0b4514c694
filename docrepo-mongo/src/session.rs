use std::any::Any;

use async_trait::async_trait;
use docrepo_core::store::StoreSession;
use docrepo_core::StoreError;
use mongodb::ClientSession;
use tokio::sync::MutexGuard;
use tracing::warn;

use crate::error::map_error;

/// A driver session bound to one client
pub struct MongoSession {
    inner: ClientSession,
    active: bool,
}

impl MongoSession {
    pub(crate) fn new(inner: ClientSession) -> Self {
        Self {
            inner,
            active: false,
        }
    }
}

#[async_trait]
impl StoreSession for MongoSession {
    async fn start_transaction(&mut self) -> Result<(), StoreError> {
        self.inner.start_transaction().await.map_err(map_error)?;
        self.active = true;
        Ok(())
    }

    async fn commit_transaction(&mut self) -> Result<(), StoreError> {
        let result = self.inner.commit_transaction().await.map_err(map_error);
        if result.is_ok() {
            self.active = false;
        }
        result
    }

    async fn abort_transaction(&mut self) -> Result<(), StoreError> {
        self.active = false;
        self.inner.abort_transaction().await.map_err(map_error)
    }

    async fn end(&mut self) {
        if self.active {
            if let Err(err) = self.abort_transaction().await {
                warn!(error = %err, "abort on session end failed");
            }
        }
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Recover the driver session behind a locked handle.
pub(crate) fn client_session<'a>(
    guard: &'a mut MutexGuard<'_, Box<dyn StoreSession>>,
) -> Result<&'a mut ClientSession, StoreError> {
    guard
        .as_any_mut()
        .downcast_mut::<MongoSession>()
        .map(|session| &mut session.inner)
        .ok_or_else(|| {
            StoreError::InvalidRequest("session was not opened by a MongoDB connection".to_string())
        })
}
