//! Cancellation and deadlines for backend calls.
//!
//! A [`Context`] is passed to every backend call and iterator step. It becomes
//! done when its [`CancelHandle`] fires (the owning connection closed) or when
//! its deadline passes (`maxTimeMS`). Deadlines derived with
//! [`Context::with_timeout`] apply to that single call only; the parent context
//! is unaffected.
//!
//! # Example
//!
//! ```ignore
//! use std::time::Duration;
//! use docwire_core::context::Context;
//!
//! let (ctx, handle) = Context::new();
//! let call = ctx.with_timeout(Duration::from_millis(50));
//! let docs = call.run(async { fetch(&call).await }).await?;
//! handle.cancel();
//! ```

use std::{future::Future, sync::Arc, time::Duration};

use tokio::{sync::watch, time::Instant};

use crate::error::{DocWireError, DocWireResult};

/// Fires cancellation for every [`Context`] derived from it.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    /// Cancels all contexts derived from this handle. Calling it again is a no-op.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// A cancellable operation context with an optional deadline.
#[derive(Debug, Clone)]
pub struct Context {
    cancelled: watch::Receiver<bool>,
    deadline: Option<Instant>,
}

impl Context {
    /// Creates a new root context and the handle that cancels it.
    pub fn new() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        (
            Self { cancelled: rx, deadline: None },
            CancelHandle { tx: Arc::new(tx) },
        )
    }

    /// Creates a context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::new().0
    }

    /// Returns a child context whose deadline is `timeout` from now, or the
    /// parent deadline if that is sooner.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            cancelled: self.cancelled.clone(),
            deadline: Some(self.deadline.map_or(deadline, |d| d.min(deadline))),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Returns an error if the context is already done.
    ///
    /// # Errors
    ///
    /// [`DocWireError::Cancelled`] when cancelled, [`DocWireError::MaxTimeExpired`]
    /// when the deadline has passed.
    pub fn check(&self) -> DocWireResult<()> {
        if self.is_cancelled() {
            return Err(DocWireError::Cancelled);
        }
        if self.deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(DocWireError::MaxTimeExpired);
        }
        Ok(())
    }

    /// Resolves once the context is done, with the reason.
    pub async fn done(&self) -> DocWireError {
        let mut rx = self.cancelled.clone();
        let cancelled = async move {
            // A dropped handle can never cancel.
            if rx.wait_for(|c| *c).await.is_err() {
                std::future::pending::<()>().await;
            }
        };

        match self.deadline {
            Some(deadline) => tokio::select! {
                _ = cancelled => DocWireError::Cancelled,
                _ = tokio::time::sleep_until(deadline) => DocWireError::MaxTimeExpired,
            },
            None => {
                cancelled.await;
                DocWireError::Cancelled
            }
        }
    }

    /// Runs `fut` until it completes or the context is done, whichever is first.
    pub async fn run<T, F>(&self, fut: F) -> DocWireResult<T>
    where
        F: Future<Output = DocWireResult<T>>,
    {
        self.check()?;

        tokio::select! {
            biased;
            err = self.done() => Err(err),
            res = fut => res,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiters() {
        let (ctx, handle) = Context::new();
        assert!(ctx.check().is_ok());

        let waiter = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.done().await }
        });
        handle.cancel();

        assert_eq!(waiter.await.unwrap(), DocWireError::Cancelled);
        assert_eq!(ctx.check(), Err(DocWireError::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_run() {
        let ctx = Context::background().with_timeout(Duration::from_millis(10));
        let res: DocWireResult<()> = ctx
            .run(async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert_eq!(res, Err(DocWireError::MaxTimeExpired));
    }

    #[tokio::test(start_paused = true)]
    async fn child_deadline_does_not_outlive_parent() {
        let parent = Context::background().with_timeout(Duration::from_millis(5));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());
    }

    #[tokio::test]
    async fn background_never_finishes() {
        let ctx = Context::background();
        let res = tokio::time::timeout(Duration::from_millis(20), ctx.done()).await;
        assert!(res.is_err());
    }
}
