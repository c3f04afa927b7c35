//! Validated connection pool implementation

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use vpool_core::{ConnectionFactory, Result, ThreadSafety, VpoolError};

use super::pooled::PooledConnection;
use super::state::PoolState;
use super::stats::PoolStats;
use crate::bounded::{BoundedWaitExecutor, WaitContext, current_caller};
use crate::config::{PoolConfig, SteadyOptions};
use crate::health::{ConnectionValidator, ValidationResult};
use crate::steady::SteadyConnection;

/// State shared by the pool, its handles and the idle reaper
pub(crate) struct PoolInner {
    pub(super) config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    steady_options: SteadyOptions,
    pub(super) validator: ConnectionValidator,
    pub(super) state: Mutex<PoolState>,
    /// Woken whenever a slot, an idle connection or a shared entry frees up
    pub(super) available: Notify,
    pub(super) waiting: AtomicUsize,
    /// Parent of the reaper token; cancelled on close and drop
    pub(super) shutdown: CancellationToken,
    pub(super) reaper: Mutex<Option<CancellationToken>>,
}

impl PoolInner {
    pub(super) fn notify(&self) {
        self.available.notify_waiters();
    }

    /// Open a new steady connection with the pool's factory
    pub(super) async fn open(&self) -> Result<Arc<SteadyConnection>> {
        match SteadyConnection::connect(Arc::clone(&self.factory), self.steady_options.clone()).await
        {
            Ok(con) => Ok(Arc::new(con)),
            Err(e) => {
                tracing::warn!(pool = %self.config.name(), error = %e, "could not open a connection");
                Err(VpoolError::pool("could not open a new connection", e))
            }
        }
    }

    /// Validate the connection behind a handle, evicting it on timeout
    async fn validate_handle(
        &self,
        conn: &mut PooledConnection,
        sql: Option<&str>,
        recount: bool,
    ) -> Option<ValidationResult> {
        let con = Arc::clone(conn.steady_connection()?);
        let result = self.validator.validate(&con, sql).await;
        if result.timed_out() {
            conn.discard(recount).await;
        }
        Some(result)
    }

    /// Allocate and validate until a connection passes, or `ctx` is cancelled
    async fn get_validated_conn(
        self: Arc<Self>,
        shareable: bool,
        ctx: WaitContext,
    ) -> Result<PooledConnection> {
        loop {
            if ctx.is_cancelled() {
                return Err(VpoolError::Cancelled);
            }

            let allocated = tokio::select! {
                biased;
                result = self.allocate(shareable) => result,
                _ = ctx.cancelled() => return Err(VpoolError::Cancelled),
            };
            let mut conn = match allocated {
                Ok(conn) => conn,
                Err(e) => {
                    ctx.record_error(&e);
                    return Err(e);
                }
            };

            if ctx.is_cancelled() {
                conn.close().await;
                return Err(VpoolError::Cancelled);
            }

            match self.validate_handle(&mut conn, None, true).await {
                Some(result) if result.is_valid() => return Ok(conn),
                Some(result) => {
                    if let Some(error) = result.error() {
                        ctx.record_error(error);
                    }
                }
                None => {}
            }

            conn.discard(true).await;
            tokio::task::yield_now().await;
        }
    }

    async fn close_all(&self) {
        self.shutdown.cancel();
        let connections = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut connections = state.idle.drain();
            let shared: Vec<_> = state.shared.drain(..).collect();
            state.connections = state.connections.saturating_sub(shared.len());
            connections.extend(shared.into_iter().map(|entry| entry.con));
            connections
        };
        self.notify();

        for con in &connections {
            discard(con).await;
        }
        tracing::info!(pool = %self.config.name(), closed = connections.len(), "pool closed");
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Cancel whatever runs on the connection and close it, ignoring errors
pub(super) async fn discard(con: &SteadyConnection) {
    con.cancel();
    if let Err(e) = con.close().await {
        tracing::debug!(connection_id = %con.id(), error = %e, "error while closing connection");
    }
}

/// A pool of steady connections with borrow and idle validation
///
/// Cloning is cheap; all clones share the same connections.
///
/// ```ignore
/// let config = PoolConfig::new()
///     .with_mincached(2)
///     .with_maxconnections(10)
///     .with_blocking(true)
///     .with_test_on_borrow(true);
/// let pool = ValidatedPool::new(factory, config).await?;
///
/// let mut conn = pool.connection(true).await?;
/// conn.query("SELECT 1", &[]).await?;
/// conn.close().await;
/// ```
#[derive(Clone)]
pub struct ValidatedPool {
    inner: Arc<PoolInner>,
}

impl ValidatedPool {
    /// Create a pool and open its `mincached` idle connections.
    ///
    /// Fails with [`VpoolError::Configuration`] if the factory's driver is
    /// not thread-safe at all. Drivers that cannot share connections get a
    /// pool without a shared cache.
    #[tracing::instrument(skip(factory, config), fields(pool = %config.name()))]
    pub async fn new(factory: Arc<dyn ConnectionFactory>, config: PoolConfig) -> Result<Self> {
        let mut config = config.normalized();
        match factory.threadsafety() {
            ThreadSafety::None => {
                return Err(VpoolError::Configuration(
                    "database driver is not thread-safe".into(),
                ));
            }
            level if level < ThreadSafety::Connections => {
                if config.maxshared() > 0 {
                    tracing::debug!(threadsafety = ?level, "driver cannot share connections, sharing disabled");
                }
                config.disable_sharing();
            }
            _ => {}
        }

        let validator = ConnectionValidator::new(config.validation_sql(), config.validate_timeout());
        let inner = Arc::new(PoolInner {
            steady_options: config.steady_options(),
            factory,
            validator,
            state: Mutex::new(PoolState::default()),
            available: Notify::new(),
            waiting: AtomicUsize::new(0),
            shutdown: CancellationToken::new(),
            reaper: Mutex::new(None),
            config,
        });
        let pool = Self { inner };

        let mincached = pool.inner.config.mincached();
        let mut warm = Vec::with_capacity(mincached);
        for _ in 0..mincached {
            warm.push(pool.inner.allocate(false).await?);
        }
        while let Some(mut conn) = warm.pop() {
            conn.close().await;
        }

        let interval = pool.inner.config.idle_check_time();
        if pool.inner.config.test_idle() && !interval.is_zero() {
            pool.start_check_idle(interval).await;
        }

        tracing::info!(
            mincached,
            maxshared = pool.inner.config.maxshared(),
            maxconnections = pool.inner.config.maxconnections(),
            "pool ready"
        );
        Ok(pool)
    }

    /// Get a connection, shared if `shareable` and sharing is enabled.
    ///
    /// With `test_on_borrow` the connection is validated first, retrying
    /// with fresh connections until one passes or `max_wait_time` runs out.
    #[tracing::instrument(skip(self), fields(pool = %self.inner.config.name()))]
    pub async fn connection(&self, shareable: bool) -> Result<PooledConnection> {
        if !self.inner.config.test_on_borrow() {
            return self.inner.allocate(shareable).await;
        }

        let inner = Arc::clone(&self.inner);
        BoundedWaitExecutor::new(self.inner.config.max_wait_time())
            .run(&current_caller(), move |ctx| {
                inner.get_validated_conn(shareable, ctx)
            })
            .await
    }

    /// Get a connection that is never shared
    pub async fn dedicated_connection(&self) -> Result<PooledConnection> {
        self.connection(false).await
    }

    /// Close a handed-out connection for good instead of returning it.
    ///
    /// The running statement is cancelled and all errors are ignored. With
    /// `recount_on_error` its slot is given back. Closing the same handle
    /// again returns true without touching the counts; a handle already
    /// returned with [`PooledConnection::close`] yields false.
    pub async fn close_conn(&self, conn: &mut PooledConnection, recount_on_error: bool) -> bool {
        conn.discard(recount_on_error).await
    }

    /// Run the validation query on a handed-out connection.
    ///
    /// Never fails: errors and timeouts come back as false, and a
    /// connection that timed out is closed via [`close_conn`](Self::close_conn).
    pub async fn validate_connection(
        &self,
        conn: &mut PooledConnection,
        sql: Option<&str>,
        recount_on_error: bool,
    ) -> bool {
        self.inner
            .validate_handle(conn, sql, recount_on_error)
            .await
            .is_some_and(|result| result.is_valid())
    }

    /// Sweep the idle cache now and then every `interval`.
    ///
    /// Replaces an already running reaper. Returns false without doing
    /// anything for a zero interval, otherwise whether the first sweep
    /// finished cleanly.
    #[tracing::instrument(skip(self), fields(pool = %self.inner.config.name()))]
    pub async fn start_check_idle(&self, interval: Duration) -> bool {
        if interval.is_zero() {
            return false;
        }
        let swept = Arc::clone(&self.inner).sweep().await;
        self.inner.arm_reaper(interval);
        swept
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        PoolStats::new(
            state.idle.len(),
            state.shared.len(),
            state.connections,
            self.inner.waiting.load(Ordering::SeqCst),
            self.inner.config.maxconnections(),
        )
    }

    /// Configuration after normalization
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    pub fn name(&self) -> &str {
        self.inner.config.name()
    }

    #[cfg(test)]
    pub(crate) fn reaper_token(&self) -> Option<CancellationToken> {
        self.inner.reaper.lock().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Stop the idle reaper and close all idle and shared connections.
    ///
    /// Waiting callers fail with [`VpoolError::Closed`]; dedicated
    /// connections still handed out are closed when returned.
    pub async fn close(&self) {
        self.inner.close_all().await;
    }
}

impl std::fmt::Debug for ValidatedPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValidatedPool")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .finish()
    }
}
