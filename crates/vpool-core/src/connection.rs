//! Connection and factory traits implemented by database drivers

use crate::{QueryResult, Result, StatementResult, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Handle for cancelling a running statement from any thread.
///
/// Calling `cancel` when nothing is running is a no-op, and repeated calls
/// are harmless.
pub trait QueryCancelHandle: Send + Sync {
    fn cancel(&self);
}

/// A raw database connection produced by a [`ConnectionFactory`]
#[async_trait]
pub trait Connection: Send + Sync {
    /// Driver name (e.g. "sqlite", "postgresql")
    fn driver_name(&self) -> &str;

    /// Execute a statement that modifies data
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult>;

    /// Execute a query that returns rows
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult>;

    /// Start a transaction
    async fn begin(&self) -> Result<()> {
        self.execute("BEGIN", &[]).await.map(|_| ())
    }

    async fn commit(&self) -> Result<()> {
        self.execute("COMMIT", &[]).await.map(|_| ())
    }

    async fn rollback(&self) -> Result<()> {
        self.execute("ROLLBACK", &[]).await.map(|_| ())
    }

    /// Close the connection
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;

    /// Handle that interrupts the statement currently running on this
    /// connection, if the driver supports it.
    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        None
    }
}

/// Thread-safety level advertised by a driver, following the DB-API levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadSafety {
    /// The driver may not be used from more than one task
    None = 0,
    /// Tasks may share the driver but not connections
    Module = 1,
    /// Tasks may share the driver and connections
    Connections = 2,
    /// Tasks may share the driver, connections and cursors
    Cursors = 3,
}

/// Creates raw connections for the pool (the pool's `creator`)
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Open a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// How far connections from this factory may be shared
    fn threadsafety(&self) -> ThreadSafety {
        ThreadSafety::Connections
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    fn threadsafety(&self) -> ThreadSafety {
        (**self).threadsafety()
    }
}
