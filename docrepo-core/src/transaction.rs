//! Transaction coordinator
//!
//! `with_transaction` opens a session on the write connection, starts a
//! transaction, hands the work a context bound to that session and commits
//! when the work succeeds. On failure the transaction is aborted. The session
//! is ended on every path; if the whole future is dropped mid-flight the
//! store session is dropped with it, which discards the open transaction.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::context::CallContext;
use crate::error::{Error, Result};
use crate::store::{Connection, SessionHandle};

/// Runs units of work inside store transactions
#[derive(Clone)]
pub struct TransactionCoordinator {
    connection: Arc<dyn Connection>,
}

impl TransactionCoordinator {
    /// `connection` must be the write connection.
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    /// Run `work` in a transaction.
    ///
    /// `work` receives a copy of `ctx` bound to the session; every repository
    /// call made with it joins the transaction.
    ///
    /// ```ignore
    /// let moved = router
    ///     .transactions()
    ///     .with_transaction(&ctx, |tx| async move {
    ///         accounts.update_one(&tx, debit_filter, debit, UpdateOptions::default()).await?;
    ///         accounts.update_one(&tx, credit_filter, credit, UpdateOptions::default()).await?;
    ///         Ok(amount)
    ///     })
    ///     .await?;
    /// ```
    pub async fn with_transaction<F, Fut, R>(&self, ctx: &CallContext, work: F) -> Result<R>
    where
        F: FnOnce(CallContext) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        if ctx.in_transaction() {
            return Err(Error::invalid_input(
                "with_transaction",
                "transactions cannot be nested",
            ));
        }

        let connection = self.connection.clone();
        let session = ctx
            .run("start_session", async move {
                connection
                    .start_session()
                    .await
                    .map_err(|source| Error::TransactionStart { source })
            })
            .await?;
        let handle: SessionHandle = Arc::new(Mutex::new(session));

        let started = handle.lock().await.start_transaction().await;
        if let Err(source) = started {
            end_session(&handle).await;
            return Err(Error::TransactionStart { source });
        }
        debug!("transaction started");

        let outcome = ctx.run("transaction", work(ctx.bind_session(handle.clone()))).await;

        let result = match outcome {
            Ok(value) => {
                let committed = handle.lock().await.commit_transaction().await;
                match committed {
                    Ok(()) => {
                        debug!("transaction committed");
                        Ok(value)
                    }
                    Err(source) => {
                        abort(&handle).await;
                        Err(Error::TransactionAborted {
                            source: Box::new(Error::query("commit_transaction", "*", source)),
                        })
                    }
                }
            }
            Err(err) => {
                abort(&handle).await;
                Err(Error::TransactionAborted {
                    source: Box::new(err),
                })
            }
        };

        end_session(&handle).await;
        result
    }
}

async fn abort(handle: &SessionHandle) {
    let aborted = handle.lock().await.abort_transaction().await;
    if let Err(err) = aborted {
        warn!(error = %err, "failed to abort transaction; the store discards it when the session ends");
    } else {
        debug!("transaction aborted");
    }
}

async fn end_session(handle: &SessionHandle) {
    handle.lock().await.end().await;
}
