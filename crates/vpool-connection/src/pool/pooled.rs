//! Connection handles given out by the pool

use std::sync::Arc;

use uuid::Uuid;
use vpool_core::{QueryResult, Result, StatementResult, Value, VpoolError};

use super::pool::PoolInner;
use crate::steady::SteadyConnection;

/// How a handle holds its connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Exclusive to the handle's owner
    Dedicated,
    /// Entry of the shared cache, possibly used by other handles too
    Shared,
}

/// A connection borrowed from a [`ValidatedPool`](super::ValidatedPool)
///
/// Return it with [`close`](Self::close). A handle that is dropped without
/// being closed is returned on the current tokio runtime in the background.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    con: Option<Arc<SteadyConnection>>,
    slot: Slot,
    /// Set once the connection was closed for good through `close_conn`
    discarded: bool,
}

impl PooledConnection {
    pub(super) fn new(pool: Arc<PoolInner>, con: Arc<SteadyConnection>, slot: Slot) -> Self {
        Self {
            pool,
            con: Some(con),
            slot,
            discarded: false,
        }
    }

    /// Id of the underlying steady connection, `None` once returned
    pub fn id(&self) -> Option<Uuid> {
        self.con.as_ref().map(|con| con.id())
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    pub fn is_shared(&self) -> bool {
        self.slot == Slot::Shared
    }

    /// Whether the handle was returned or its connection closed
    pub fn is_closed(&self) -> bool {
        self.con.is_none()
    }

    pub fn in_transaction(&self) -> bool {
        self.con.as_ref().is_some_and(|con| con.in_transaction())
    }

    /// The steady connection behind this handle
    pub fn steady_connection(&self) -> Option<&Arc<SteadyConnection>> {
        self.con.as_ref()
    }

    fn steady(&self) -> Result<&Arc<SteadyConnection>> {
        self.con
            .as_ref()
            .ok_or_else(|| VpoolError::Connection("pooled connection is closed".into()))
    }

    pub async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.steady()?.query(sql, params).await
    }

    pub async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.steady()?.execute(sql, params).await
    }

    /// Start a transaction. A shared connection is not handed to other
    /// callers until the transaction ends.
    pub async fn begin(&self) -> Result<()> {
        self.steady()?.begin().await
    }

    pub async fn commit(&self) -> Result<()> {
        let result = self.steady()?.commit().await;
        self.pool.notify();
        result
    }

    pub async fn rollback(&self) -> Result<()> {
        let result = self.steady()?.rollback().await;
        self.pool.notify();
        result
    }

    /// Return the connection to the pool. Closing twice is a no-op.
    pub async fn close(&mut self) {
        if let Some(con) = self.con.take() {
            self.pool.release(con, self.slot).await;
        }
    }

    /// Close the connection for good instead of returning it.
    ///
    /// Returns false only when the handle had already been returned with
    /// [`close`](Self::close).
    pub(super) async fn discard(&mut self, recount: bool) -> bool {
        let Some(con) = self.con.take() else {
            return self.discarded;
        };
        self.discarded = true;
        self.pool.evict(&con, self.slot, recount).await;
        true
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(con) = self.con.take() else {
            return;
        };
        let pool = Arc::clone(&self.pool);
        let slot = self.slot;
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { pool.release(con, slot).await });
            }
            Err(_) => pool.release_detached(&con, slot),
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id())
            .field("slot", &self.slot)
            .field("closed", &self.is_closed())
            .finish()
    }
}
