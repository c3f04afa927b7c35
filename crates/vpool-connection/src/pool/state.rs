//! Mutable pool state, always accessed under the pool lock

use std::collections::VecDeque;
use std::sync::Arc;

use crate::steady::SteadyConnection;

/// Idle connections, oldest at the front
#[derive(Debug, Default)]
pub(super) struct IdleCache {
    entries: VecDeque<Arc<SteadyConnection>>,
}

impl IdleCache {
    /// Add a connection as the newest entry
    pub fn push(&mut self, con: Arc<SteadyConnection>) {
        self.entries.push_back(con);
    }

    /// Most recently added connection, used for allocation and trimming
    pub fn take_newest(&mut self) -> Option<Arc<SteadyConnection>> {
        self.entries.pop_back()
    }

    /// Least recently added connection, used by the validation sweep
    pub fn take_oldest(&mut self) -> Option<Arc<SteadyConnection>> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn drain(&mut self) -> Vec<Arc<SteadyConnection>> {
        self.entries.drain(..).collect()
    }
}

/// A connection in the shared cache with the number of handles using it
#[derive(Debug)]
pub(super) struct SharedEntry {
    pub con: Arc<SteadyConnection>,
    pub shared: usize,
}

#[derive(Debug, Default)]
pub(super) struct PoolState {
    pub idle: IdleCache,
    pub shared: Vec<SharedEntry>,
    /// Connections handed out; a shared entry counts once
    pub connections: usize,
    /// Shared entries being opened outside the lock
    pub pending_shared: usize,
    pub closed: bool,
}

impl PoolState {
    /// Shared entry with the fewest users among those not inside a transaction
    pub fn least_shared(&mut self) -> Option<&mut SharedEntry> {
        self.shared
            .iter_mut()
            .filter(|entry| !entry.con.in_transaction())
            .min_by_key(|entry| entry.shared)
    }

    pub fn shared_position(&self, con: &SteadyConnection) -> Option<usize> {
        self.shared
            .iter()
            .position(|entry| entry.con.id() == con.id())
    }

    /// Give a connection slot back, never going below zero
    pub fn uncount(&mut self) {
        self.connections = self.connections.saturating_sub(1);
    }
}
