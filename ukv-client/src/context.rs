//! # Call Context
//!
//! Purpose: Carry a caller's deadline and cancellation signal into every
//! operation, so an in-flight round trip can be abandoned.
//!
//! ## Design Principles
//! 1. **Race, Don't Poll**: The round trip is raced against the signal and
//!    the deadline; whichever loses is dropped.
//! 2. **Cheap to Clone**: Contexts are a deadline plus a `watch` receiver.
//! 3. **No Retries**: An interrupted call reports `Cancelled` or
//!    `DeadlineExceeded` and nothing else happens.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use ukv_common::{CacheError, CacheResult};

/// Deadline and cancellation signal for one or more operations.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: Option<watch::Receiver<bool>>,
}

/// Fires the cancellation signal of the contexts created with it.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Cancels every context derived from this handle.
    pub fn cancel(&self) {
        let _ = self.sender.send(true);
    }
}

impl CallContext {
    /// Context with neither deadline nor cancellation.
    pub fn background() -> Self {
        CallContext::default()
    }

    /// Context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        CallContext::background().deadline_at(Instant::now() + timeout)
    }

    /// Cancellable context plus the handle that cancels it.
    pub fn cancellable() -> (Self, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let ctx = CallContext {
            deadline: None,
            cancel: Some(receiver),
        };
        (ctx, CancelHandle { sender })
    }

    /// Returns a copy with the given deadline, keeping the earlier one.
    pub fn deadline_at(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(current) => current.min(deadline),
            None => deadline,
        });
        self
    }

    /// Deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// True once the cancel handle fired.
    pub fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map(|receiver| *receiver.borrow())
            .unwrap_or(false)
    }

    /// Runs `fut` unless the context is cancelled or its deadline elapses
    /// first. `fallback` bounds the call when the context has no deadline.
    pub(crate) async fn run<T, F>(&self, fallback: Option<Duration>, fut: F) -> CacheResult<T>
    where
        F: Future<Output = CacheResult<T>>,
    {
        let deadline = self
            .deadline
            .or_else(|| fallback.map(|timeout| Instant::now() + timeout));
        self.check(deadline)?;

        tokio::select! {
            biased;
            err = self.interrupted_by(deadline) => Err(err),
            out = fut => out,
        }
    }

    /// Resolves when the context is cancelled or its own deadline elapses.
    pub(crate) async fn interrupted(&self) -> CacheError {
        self.interrupted_by(self.deadline).await
    }

    fn check(&self, deadline: Option<Instant>) -> CacheResult<()> {
        if self.is_cancelled() {
            return Err(CacheError::Cancelled);
        }
        match deadline {
            Some(deadline) if deadline <= Instant::now() => Err(CacheError::DeadlineExceeded),
            _ => Ok(()),
        }
    }

    async fn interrupted_by(&self, deadline: Option<Instant>) -> CacheError {
        let mut cancel = self.cancel.clone();
        let cancelled = async move {
            let Some(receiver) = cancel.as_mut() else {
                return std::future::pending().await;
            };
            loop {
                if *receiver.borrow_and_update() {
                    return;
                }
                // A dropped handle can never cancel.
                if receiver.changed().await.is_err() {
                    return std::future::pending().await;
                }
            }
        };
        let expired = async move {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            _ = cancelled => CacheError::Cancelled,
            _ = expired => CacheError::DeadlineExceeded,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_runs_to_completion() {
        let ctx = CallContext::background();
        assert_eq!(ctx.run(None, async { Ok(7) }).await, Ok(7));
    }

    #[tokio::test]
    async fn deadline_interrupts_slow_calls() {
        let ctx = CallContext::with_timeout(Duration::from_millis(20));
        let out: CacheResult<()> = ctx
            .run(None, async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert_eq!(out, Err(CacheError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn fallback_applies_without_deadline() {
        let ctx = CallContext::background();
        let out: CacheResult<()> = ctx
            .run(Some(Duration::from_millis(10)), std::future::pending())
            .await;
        assert_eq!(out, Err(CacheError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_calls() {
        let (ctx, handle) = CallContext::cancellable();
        let task = tokio::spawn({
            let ctx = ctx.clone();
            async move { ctx.run::<(), _>(None, std::future::pending()).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        assert_eq!(task.await.unwrap(), Err(CacheError::Cancelled));
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.run(None, async { Ok(1) }).await, Err(CacheError::Cancelled));
    }

    #[tokio::test]
    async fn dropped_handle_never_cancels() {
        let (ctx, handle) = CallContext::cancellable();
        drop(handle);
        assert_eq!(ctx.run(None, async { Ok(2) }).await, Ok(2));
    }

    #[test]
    fn deadline_keeps_earliest() {
        let now = Instant::now();
        let ctx = CallContext::background()
            .deadline_at(now + Duration::from_secs(5))
            .deadline_at(now + Duration::from_secs(10));
        assert_eq!(ctx.deadline(), Some(now + Duration::from_secs(5)));
    }
}
