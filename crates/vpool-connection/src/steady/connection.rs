//! Steady connection implementation

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use tokio::sync::Mutex;
use uuid::Uuid;
use vpool_core::{
    Connection, ConnectionFactory, QueryCancelHandle, QueryResult, Result, StatementResult, Value,
    VpoolError,
};

use crate::config::{PingMode, SteadyOptions};
use crate::health::ping_database;

/// A connection that reopens its underlying driver connection on failure
///
/// The pool only ever stores steady connections; pooled handles borrow them.
pub struct SteadyConnection {
    id: Uuid,
    /// The underlying connection (behind mutex for replacement)
    connection: Mutex<Option<Arc<dyn Connection>>>,
    factory: Arc<dyn ConnectionFactory>,
    options: SteadyOptions,
    /// Statements run since the last (re)connect
    usage: AtomicU64,
    transaction: AtomicBool,
    closed: AtomicBool,
    reconnects: AtomicU32,
    cancel_handle: parking_lot::Mutex<Option<Arc<dyn QueryCancelHandle>>>,
    driver_name: String,
}

impl SteadyConnection {
    /// Open a connection with the factory and run the session statements on it
    pub async fn connect(
        factory: Arc<dyn ConnectionFactory>,
        options: SteadyOptions,
    ) -> Result<Self> {
        let connection = open_session(factory.as_ref(), &options).await?;
        let driver_name = connection.driver_name().to_string();
        let cancel_handle = connection.cancel_handle();

        let steady = Self {
            id: Uuid::new_v4(),
            connection: Mutex::new(Some(connection)),
            factory,
            options,
            usage: AtomicU64::new(0),
            transaction: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            reconnects: AtomicU32::new(0),
            cancel_handle: parking_lot::Mutex::new(cancel_handle),
            driver_name,
        };
        tracing::debug!(connection_id = %steady.id, driver = %steady.driver_name, "steady connection opened");
        Ok(steady)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    /// Statements executed since the last (re)connect
    pub fn usage(&self) -> u64 {
        self.usage.load(Ordering::SeqCst)
    }

    /// Number of times the underlying connection was replaced
    pub fn reconnects(&self) -> u32 {
        self.reconnects.load(Ordering::SeqCst)
    }

    /// Whether a transaction was started with [`begin`](Self::begin) and not finished
    pub fn in_transaction(&self) -> bool {
        self.transaction.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn is_failure(&self, error: &VpoolError) -> bool {
        self.options.failures.contains(&error.kind())
    }

    /// Replace the underlying connection with a fresh one
    pub async fn reconnect(&self) -> Result<()> {
        if self.is_closed() {
            return Err(VpoolError::Connection("connection is closed".into()));
        }
        let mut guard = self.connection.lock().await;

        if let Some(old) = guard.take() {
            if let Err(e) = old.close().await {
                tracing::debug!(connection_id = %self.id, error = %e, "closing replaced connection failed");
            }
        }

        let fresh = open_session(self.factory.as_ref(), &self.options).await?;
        *self.cancel_handle.lock() = fresh.cancel_handle();
        *guard = Some(fresh);

        self.usage.store(0, Ordering::SeqCst);
        self.transaction.store(false, Ordering::SeqCst);
        self.reconnects.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(connection_id = %self.id, "steady connection reconnected");
        Ok(())
    }

    /// Current underlying connection, reopening it if a previous reconnect failed
    async fn current(&self) -> Result<Arc<dyn Connection>> {
        if self.is_closed() {
            return Err(VpoolError::Connection("connection is closed".into()));
        }
        if let Some(conn) = self.connection.lock().await.as_ref() {
            return Ok(Arc::clone(conn));
        }
        self.reconnect().await?;
        self.connection
            .lock()
            .await
            .as_ref()
            .cloned()
            .ok_or_else(|| VpoolError::Connection("failed to establish connection".into()))
    }

    /// Ping the server if `when` is enabled in the ping mode.
    ///
    /// A dead connection is replaced when `reconnect` is set and no
    /// transaction is open. Returns whether the connection is usable.
    pub async fn ping_check(&self, when: PingMode, reconnect: bool) -> bool {
        if self.is_closed() {
            return false;
        }
        if !self.options.ping.intersects(when) {
            return true;
        }

        let current = self.connection.lock().await.as_ref().cloned();
        let alive = match current {
            Some(conn) => ping_database(conn.as_ref()).await.is_ok(),
            None => false,
        };

        if alive || !reconnect || self.in_transaction() {
            return alive;
        }

        match self.reconnect().await {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(connection_id = %self.id, error = %e, "reconnect after failed ping did not succeed");
                false
            }
        }
    }

    /// Run a statement with usage accounting and failover
    async fn run<F, Fut, T>(&self, operation: F) -> Result<T>
    where
        F: Fn(Arc<dyn Connection>) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T>> + Send,
    {
        self.ping_check(PingMode::ON_CURSOR | PingMode::ON_QUERY, true)
            .await;

        if let Some(maxusage) = self.options.maxusage {
            if self.usage() >= maxusage && !self.in_transaction() {
                tracing::debug!(connection_id = %self.id, maxusage, "usage limit reached, reconnecting");
                self.reconnect().await?;
            }
        }

        let conn = self.current().await?;
        self.usage.fetch_add(1, Ordering::SeqCst);

        let err = match operation(conn).await {
            Ok(value) => return Ok(value),
            Err(err) if !self.is_failure(&err) => return Err(err),
            Err(err) => err,
        };

        if self.in_transaction() {
            // The transaction is lost either way; leave a usable connection behind.
            tracing::warn!(connection_id = %self.id, error = %err, "connection failed inside a transaction");
            self.transaction.store(false, Ordering::SeqCst);
            if let Err(e) = self.reconnect().await {
                tracing::debug!(connection_id = %self.id, error = %e, "reconnect after transaction failure did not succeed");
            }
            return Err(err);
        }

        tracing::debug!(connection_id = %self.id, error = %err, "statement failed, retrying on a fresh connection");
        if let Err(e) = self.reconnect().await {
            tracing::debug!(connection_id = %self.id, error = %e, "reconnect failed");
            return Err(err);
        }
        let conn = self.current().await?;
        self.usage.fetch_add(1, Ordering::SeqCst);
        operation(conn).await
    }

    /// Execute a query that returns rows
    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.run(|conn| async move { conn.query(sql, params).await })
            .await
    }

    /// Execute a statement that modifies data
    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.run(|conn| async move { conn.execute(sql, params).await })
            .await
    }

    pub async fn begin(&self) -> Result<()> {
        let conn = self.current().await?;
        conn.begin().await?;
        self.transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn commit(&self) -> Result<()> {
        self.finish_transaction(true).await
    }

    pub async fn rollback(&self) -> Result<()> {
        self.finish_transaction(false).await
    }

    async fn finish_transaction(&self, commit: bool) -> Result<()> {
        self.transaction.store(false, Ordering::SeqCst);
        let conn = self.current().await?;
        let result = if commit {
            conn.commit().await
        } else {
            conn.rollback().await
        };

        if let Err(err) = &result {
            if self.is_failure(err) {
                if let Err(e) = self.reconnect().await {
                    tracing::debug!(connection_id = %self.id, error = %e, "reconnect after failed transaction end did not succeed");
                }
            }
        }
        result
    }

    /// Roll back before the connection is reused.
    ///
    /// With `force` the rollback always happens, otherwise only when a
    /// transaction is open. Errors are ignored.
    pub async fn reset(&self, force: bool) {
        if self.is_closed() || !(force || self.in_transaction()) {
            return;
        }
        if let Err(e) = self.rollback().await {
            tracing::debug!(connection_id = %self.id, error = %e, "rollback on reset failed");
        }
    }

    /// Cancel the statement currently running, if the driver supports it
    pub fn cancel(&self) {
        if let Some(handle) = self.cancel_handle.lock().as_ref() {
            handle.cancel();
        }
    }

    /// Close the connection for good. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.transaction.store(false, Ordering::SeqCst);
        let conn = self.connection.lock().await.take();
        tracing::debug!(connection_id = %self.id, "steady connection closed");
        match conn {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for SteadyConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SteadyConnection")
            .field("id", &self.id)
            .field("driver", &self.driver_name)
            .field("usage", &self.usage())
            .field("in_transaction", &self.in_transaction())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Open a raw connection and run the session statements on it
async fn open_session(
    factory: &dyn ConnectionFactory,
    options: &SteadyOptions,
) -> Result<Arc<dyn Connection>> {
    let conn = factory.create().await?;
    for statement in &options.setsession {
        if let Err(e) = conn.execute(statement, &[]).await {
            if let Err(close_err) = conn.close().await {
                tracing::debug!(driver = %conn.driver_name(), error = %close_err, "error while closing connection after failed session setup");
            }
            return Err(e);
        }
    }
    Ok(conn)
}
