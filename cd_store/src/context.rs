//! Request-scoped deadline and cancellation.
//!
//! Database work wrapped in [`RequestContext::run`] is dropped as soon as the
//! context is cancelled or its deadline passes. Dropping an in-flight diesel
//! future abandons the statement but leaves the session as it was, so a
//! caller that cancels inside a transaction must close the connection with
//! [`crate::db::discard`] rather than return it to the pool.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{StoreError, StoreResult};

#[derive(Clone, Debug)]
pub struct RequestContext {
    deadline: Option<Instant>,
    cancelled: watch::Receiver<bool>,
}

/// Owner side of a [`RequestContext`]; cancelling it cancels every clone.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // Receivers may all be gone already.
        let _ = self.tx.send(true);
    }
}

impl RequestContext {
    /// A context that never expires on its own.
    pub fn background() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self {
            deadline: None,
            cancelled: rx,
        }
    }

    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                deadline: None,
                cancelled: rx,
            },
            CancelHandle { tx },
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        self.deadline = Some(match self.deadline {
            Some(existing) if existing < deadline => existing,
            _ => deadline,
        });
        self
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` to completion unless the context ends first.
    pub async fn run<T, F>(&self, fut: F) -> StoreResult<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        if self.is_cancelled() {
            return Err(StoreError::Cancelled);
        }

        let mut cancelled = self.cancelled.clone();
        let cancel_signal = async move {
            // A dropped sender can never cancel.
            let closed = cancelled.wait_for(|c| *c).await.is_err();
            if closed {
                std::future::pending::<()>().await;
            }
        };
        let deadline = async {
            match self.deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel_signal => Err(StoreError::Cancelled),
            _ = deadline => Err(StoreError::Cancelled),
            result = fut => result,
        }
    }
}
