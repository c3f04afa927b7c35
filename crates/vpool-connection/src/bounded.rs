//! Bounded wait for pool operations
//!
//! [`BoundedWaitExecutor`] runs an operation on its own task and stops
//! waiting for it after `max_wait`. The operation is told to stop through its
//! [`WaitContext`] but is never aborted: whatever it still produces is
//! dropped, and dropped pool handles find their way back to the pool.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use vpool_core::{Result, VpoolError};

/// Cancellation flag and error record shared with a bounded operation
#[derive(Debug, Clone, Default)]
pub struct WaitContext {
    token: CancellationToken,
    last_error: Arc<Mutex<Option<String>>>,
}

impl WaitContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the waiting caller has given up
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the waiting caller gives up
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Remember an error to report if the wait times out
    pub fn record_error(&self, error: impl std::fmt::Display) {
        *self.last_error.lock() = Some(error.to_string());
    }

    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn cancel(&self) {
        self.token.cancel();
    }
}

/// Runs operations with an upper bound on how long the caller waits
#[derive(Debug, Clone, Copy, Default)]
pub struct BoundedWaitExecutor {
    max_wait: Option<Duration>,
}

impl BoundedWaitExecutor {
    /// `None` waits without a bound and runs the operation inline
    pub fn new(max_wait: Option<Duration>) -> Self {
        Self { max_wait }
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait
    }

    /// Run `operation`, failing with [`VpoolError::AcquireTimeout`] when it
    /// takes longer than `max_wait`. `caller` names the waiting caller in
    /// the error.
    pub async fn run<T, F, Fut>(&self, caller: &str, operation: F) -> Result<T>
    where
        F: FnOnce(WaitContext) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let ctx = WaitContext::new();
        let Some(limit) = self.max_wait else {
            return operation(ctx).await;
        };

        let start = Instant::now();
        let mut unit = tokio::spawn(operation(ctx.clone()));

        match tokio::time::timeout(limit, &mut unit).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(VpoolError::pool(
                "bounded operation did not complete",
                VpoolError::Other(e.to_string()),
            )),
            Err(_) => {
                // Detached: the task sees the cancellation and cleans up on its own
                ctx.cancel();
                let elapsed = start.elapsed();
                let cause = ctx.last_error();
                tracing::warn!(caller, elapsed = ?elapsed, cause = ?cause, "gave up waiting for a validated connection");
                Err(VpoolError::AcquireTimeout {
                    elapsed,
                    caller: caller.to_string(),
                    cause,
                })
            }
        }
    }
}

/// Name of the calling thread, or its id when unnamed
pub fn current_caller() -> String {
    let thread = std::thread::current();
    match thread.name() {
        Some(name) => name.to_string(),
        None => format!("{:?}", thread.id()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_result_within_bound() {
        let executor = BoundedWaitExecutor::new(Some(Duration::from_secs(1)));
        let value = executor.run("test", |_ctx| async { Ok(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_errors_pass_through() {
        let executor = BoundedWaitExecutor::new(Some(Duration::from_secs(1)));
        let err = executor
            .run("test", |_ctx| async {
                Err::<(), _>(VpoolError::TooManyConnections("full".into()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VpoolError::TooManyConnections(_)));
    }

    #[tokio::test]
    async fn test_timeout_reports_caller_and_last_error() {
        let executor = BoundedWaitExecutor::new(Some(Duration::from_millis(50)));
        let err = executor
            .run("worker-3", |ctx| async move {
                ctx.record_error("connection failed validation");
                ctx.cancelled().await;
                Ok(())
            })
            .await
            .unwrap_err();

        match err {
            VpoolError::AcquireTimeout {
                elapsed,
                caller,
                cause,
            } => {
                assert!(elapsed >= Duration::from_millis(50));
                assert_eq!(caller, "worker-3");
                assert_eq!(cause.as_deref(), Some("connection failed validation"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout_cancels_operation() {
        let executor = BoundedWaitExecutor::new(Some(Duration::from_millis(20)));
        let (tx, rx) = tokio::sync::oneshot::channel();
        let result = executor
            .run("test", |ctx| async move {
                ctx.cancelled().await;
                let _ = tx.send(ctx.is_cancelled());
                Ok(())
            })
            .await;

        assert!(result.is_err());
        assert!(rx.await.unwrap());
    }

    #[tokio::test]
    async fn test_unbounded_runs_inline() {
        let executor = BoundedWaitExecutor::new(None);
        let value = executor
            .run("test", |ctx| async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Ok(ctx.is_cancelled())
            })
            .await
            .unwrap();
        assert!(!value);
    }

    #[test]
    fn test_current_caller_uses_thread_name() {
        let name = std::thread::Builder::new()
            .name("pool-user".into())
            .spawn(current_caller)
            .unwrap()
            .join()
            .unwrap();
        assert_eq!(name, "pool-user");
    }
}
