//! Handing out and taking back connections
//!
//! Every slot is counted under the pool lock before a connection is opened
//! and given back by a [`Reservation`] if opening fails or the allocating
//! task is dropped, so abandoned allocations never leave the counts off.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use vpool_core::{Result, VpoolError};

use super::pool::{PoolInner, discard};
use super::pooled::{PooledConnection, Slot};
use super::state::{PoolState, SharedEntry};
use crate::config::{PingMode, ResetPolicy};
use crate::steady::SteadyConnection;

/// Outcome of choosing a shared connection
enum SharedPick {
    /// A new shared entry, from the idle cache or to be opened
    Open(Option<Arc<SteadyConnection>>),
    /// An existing entry whose share count was already raised
    Reuse(Arc<SteadyConnection>),
}

/// Result of one allocation attempt under the pool lock
enum Attempt<T> {
    Ready(T),
    /// A limit is reached; wait for a release or fail fast
    Exhausted,
    /// A shared entry is still being opened; wait for it even when not blocking
    Pending,
}

/// A counted slot whose connection is not handed out yet
struct Reservation<'a> {
    pool: &'a PoolInner,
    shared: bool,
    /// Idle connection taken for this slot, put back if the slot is given up
    con: Option<Arc<SteadyConnection>>,
    armed: bool,
}

impl<'a> Reservation<'a> {
    fn new(pool: &'a PoolInner, shared: bool) -> Self {
        Self {
            pool,
            shared,
            con: None,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let leftover = {
            let mut state = self.pool.state.lock();
            state.uncount();
            if self.shared {
                state.pending_shared = state.pending_shared.saturating_sub(1);
            }
            match self.con.take() {
                Some(con) if self.pool.can_cache(&state, &con) => {
                    state.idle.push(con);
                    None
                }
                other => other,
            }
        };
        self.pool.notify();

        if let Some(con) = leftover {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move { discard(&con).await });
            }
        }
    }
}

/// Decrements the waiter count when a wait ends
struct Waiting<'a>(&'a AtomicUsize);

impl<'a> Waiting<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for Waiting<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl PoolInner {
    fn at_limit(&self, state: &PoolState) -> bool {
        let max = self.config.maxconnections();
        max != 0 && state.connections >= max
    }

    fn has_idle_room(&self, state: &PoolState) -> bool {
        let max = self.config.maxcached();
        max == 0 || state.idle.len() < max
    }

    /// Whether a returned connection may go back to the idle cache
    pub(super) fn can_cache(&self, state: &PoolState, con: &SteadyConnection) -> bool {
        !state.closed && !con.is_closed() && !con.in_transaction() && self.has_idle_room(state)
    }

    /// Run `attempt` under the pool lock until it yields a value.
    ///
    /// On [`Attempt::Exhausted`] a blocking pool waits for the next release
    /// and a non-blocking one fails with [`VpoolError::TooManyConnections`].
    /// [`Attempt::Pending`] always waits.
    async fn wait_until<T>(&self, mut attempt: impl FnMut(&mut PoolState) -> Attempt<T>) -> Result<T> {
        loop {
            // Registered before the check so a release in between is not missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let (in_use, pending) = {
                let mut state = self.state.lock();
                if state.closed {
                    return Err(VpoolError::Closed);
                }
                match attempt(&mut *state) {
                    Attempt::Ready(value) => return Ok(value),
                    Attempt::Exhausted => (state.connections, false),
                    Attempt::Pending => (state.connections, true),
                }
            };

            if !pending && !self.config.blocking() {
                tracing::debug!(pool = %self.config.name(), connections = in_use, "pool exhausted");
                return Err(VpoolError::TooManyConnections(format!(
                    "{} connections in use (limit {}, shared limit {})",
                    in_use,
                    self.config.maxconnections(),
                    self.config.maxshared()
                )));
            }

            let _waiting = Waiting::enter(&self.waiting);
            tracing::trace!(pool = %self.config.name(), "waiting for a connection");
            notified.await;
        }
    }

    /// Hand out a shared or dedicated connection without validating it
    pub(super) async fn allocate(self: &Arc<Self>, shareable: bool) -> Result<PooledConnection> {
        if shareable && self.config.maxshared() > 0 {
            self.shared_connection().await
        } else {
            self.dedicated_connection().await
        }
    }

    async fn dedicated_connection(self: &Arc<Self>) -> Result<PooledConnection> {
        let idle = self
            .wait_until(|state| {
                if self.at_limit(state) {
                    return Attempt::Exhausted;
                }
                state.connections += 1;
                Attempt::Ready(state.idle.take_newest())
            })
            .await?;

        let mut reservation = Reservation::new(self, false);
        let con = match idle {
            Some(con) => {
                reservation.con = Some(Arc::clone(&con));
                self.ping_on_borrow(&con).await;
                con
            }
            None => self.open().await?,
        };
        reservation.disarm();

        tracing::trace!(pool = %self.config.name(), connection_id = %con.id(), "dedicated connection handed out");
        Ok(PooledConnection::new(Arc::clone(self), con, Slot::Dedicated))
    }

    async fn shared_connection(self: &Arc<Self>) -> Result<PooledConnection> {
        let maxshared = self.config.maxshared();
        let pick = self
            .wait_until(|state| {
                let at_limit = self.at_limit(state);
                if state.shared.len() + state.pending_shared < maxshared && !at_limit {
                    state.connections += 1;
                    state.pending_shared += 1;
                    return Attempt::Ready(SharedPick::Open(state.idle.take_newest()));
                }
                // Entries inside a transaction are never handed to a second caller
                if let Some(entry) = state.least_shared() {
                    entry.shared += 1;
                    return Attempt::Ready(SharedPick::Reuse(Arc::clone(&entry.con)));
                }
                if state.pending_shared > 0 && !at_limit {
                    Attempt::Pending
                } else {
                    Attempt::Exhausted
                }
            })
            .await?;

        match pick {
            SharedPick::Open(idle) => {
                let mut reservation = Reservation::new(self, true);
                let con = match idle {
                    Some(con) => {
                        reservation.con = Some(Arc::clone(&con));
                        self.ping_on_borrow(&con).await;
                        con
                    }
                    None => self.open().await?,
                };
                reservation.disarm();

                {
                    let mut state = self.state.lock();
                    state.pending_shared = state.pending_shared.saturating_sub(1);
                    state.shared.push(SharedEntry {
                        con: Arc::clone(&con),
                        shared: 1,
                    });
                }
                self.notify();
                tracing::trace!(pool = %self.config.name(), connection_id = %con.id(), "new shared connection handed out");
                Ok(PooledConnection::new(Arc::clone(self), con, Slot::Shared))
            }
            SharedPick::Reuse(con) => {
                // The handle owns the raised share count from here on
                let conn = PooledConnection::new(Arc::clone(self), Arc::clone(&con), Slot::Shared);
                self.ping_on_borrow(&con).await;
                tracing::trace!(pool = %self.config.name(), connection_id = %con.id(), "shared connection reused");
                Ok(conn)
            }
        }
    }

    async fn ping_on_borrow(&self, con: &SteadyConnection) {
        if !con.ping_check(PingMode::ON_BORROW, true).await {
            tracing::debug!(pool = %self.config.name(), connection_id = %con.id(), "connection failed ping on borrow");
        }
    }

    /// Take a connection back from a handle
    pub(super) async fn release(&self, con: Arc<SteadyConnection>, slot: Slot) {
        let con = match slot {
            Slot::Dedicated => con,
            Slot::Shared => match self.unshare(&con) {
                Some(con) => con,
                None => return,
            },
        };

        if !con.is_closed() {
            con.reset(self.config.reset() == ResetPolicy::Always).await;
        }
        if let Some(con) = self.cache(con) {
            discard(&con).await;
        }
    }

    /// Bookkeeping for a handle dropped outside a runtime. The connection
    /// cannot be reset there, so it is not cached.
    pub(super) fn release_detached(&self, con: &SteadyConnection, slot: Slot) {
        if slot == Slot::Shared && self.unshare(con).is_none() {
            return;
        }
        self.state.lock().uncount();
        self.notify();
    }

    /// Drop one user of a shared entry, returning the connection once unused
    fn unshare(&self, con: &SteadyConnection) -> Option<Arc<SteadyConnection>> {
        let mut state = self.state.lock();
        let position = state.shared_position(con)?;
        let entry = &mut state.shared[position];
        entry.shared = entry.shared.saturating_sub(1);
        if entry.shared > 0 {
            return None;
        }
        Some(state.shared.remove(position).con)
    }

    /// Put a returned connection in the idle cache if there is room.
    ///
    /// Gives the slot back either way; returns the connection when it has
    /// to be closed instead.
    fn cache(&self, con: Arc<SteadyConnection>) -> Option<Arc<SteadyConnection>> {
        let leftover = {
            let mut state = self.state.lock();
            state.uncount();
            if self.can_cache(&state, &con) {
                state.idle.push(con);
                None
            } else {
                Some(con)
            }
        };
        self.notify();
        leftover
    }

    /// Close a handed-out connection for good.
    ///
    /// With `recount` the slot is given back; a shared entry is only
    /// counted once however many handles close it.
    pub(super) async fn evict(&self, con: &SteadyConnection, slot: Slot, recount: bool) {
        discard(con).await;
        {
            let mut state = self.state.lock();
            let counted = match slot {
                Slot::Dedicated => true,
                Slot::Shared => match state.shared_position(con) {
                    Some(position) => {
                        state.shared.remove(position);
                        true
                    }
                    None => false,
                },
            };
            if recount && counted {
                state.uncount();
            }
        }
        self.notify();
        tracing::debug!(pool = %self.config.name(), connection_id = %con.id(), recount, "connection closed and evicted");
    }
}
