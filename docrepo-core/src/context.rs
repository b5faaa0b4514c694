//! Call context: deadline, cancellation and transaction binding
//!
//! Every I/O operation takes a `CallContext`. `run` races the store future
//! against the deadline and the cancellation signal; whichever fires first
//! wins and the in-flight store future is dropped.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::store::SessionHandle;

/// Deadline, cancellation signal and optional session carried by a call
#[derive(Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
    session: Option<SessionHandle>,
}

/// Cancels every context derived from the one that created it
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers may all be gone already; that is fine.
        let _ = self.sender.send(true);
    }
}

impl CallContext {
    /// A context with no deadline and no cancellation
    pub fn background() -> Self {
        Self::default()
    }

    /// Bound the context by `timeout` from now, keeping any earlier deadline.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bound the context by `deadline`, keeping any earlier deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Attach a fresh cancellation signal.
    pub fn cancellable(mut self) -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        self.cancel = Some(receiver);
        (self, CancelHandle { sender })
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// True when operations under this context run inside a transaction
    pub fn in_transaction(&self) -> bool {
        self.session.is_some()
    }

    pub(crate) fn session(&self) -> Option<&SessionHandle> {
        self.session.as_ref()
    }

    pub(crate) fn bind_session(&self, session: SessionHandle) -> Self {
        Self {
            deadline: self.deadline,
            cancel: self.cancel.clone(),
            session: Some(session),
        }
    }

    /// Run `future` under this context's deadline and cancellation signal.
    pub async fn run<T, F>(&self, operation: &'static str, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::Cancelled { operation });
        }
        if self.deadline.is_some_and(|deadline| deadline <= Instant::now()) {
            return Err(Error::Timeout { operation });
        }

        let cancelled = wait_cancelled(self.cancel.clone());
        let expired = wait_deadline(self.deadline);

        tokio::select! {
            biased;
            _ = cancelled => Err(Error::Cancelled { operation }),
            _ = expired => Err(Error::Timeout { operation }),
            result = future => result,
        }
    }
}

async fn wait_cancelled(receiver: Option<watch::Receiver<bool>>) {
    let Some(mut receiver) = receiver else {
        return std::future::pending().await;
    };
    loop {
        if *receiver.borrow_and_update() {
            return;
        }
        if receiver.changed().await.is_err() {
            // Handle dropped without cancelling: this context can no longer fire.
            return std::future::pending().await;
        }
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
