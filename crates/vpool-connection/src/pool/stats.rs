//! Pool statistics types

use serde::{Deserialize, Serialize};

/// Snapshot of a pool's caches and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections in the idle cache
    idle: usize,
    /// Entries in the shared cache
    shared: usize,
    /// Connections handed out, each shared entry counted once
    connections: usize,
    /// Callers blocked waiting for a connection
    waiting: usize,
    /// Connection limit, 0 when unbounded
    max_connections: usize,
}

impl PoolStats {
    pub fn new(
        idle: usize,
        shared: usize,
        connections: usize,
        waiting: usize,
        max_connections: usize,
    ) -> Self {
        Self {
            idle,
            shared,
            connections,
            waiting,
            max_connections,
        }
    }

    pub fn idle(&self) -> usize {
        self.idle
    }

    pub fn shared(&self) -> usize {
        self.shared
    }

    pub fn connections(&self) -> usize {
        self.connections
    }

    pub fn waiting(&self) -> usize {
        self.waiting
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Open connections owned by the pool, idle or handed out
    pub fn total(&self) -> usize {
        self.idle + self.connections
    }

    /// Share of the connection limit in use (0.0 to 1.0)
    ///
    /// Returns 0.0 for an unbounded pool.
    pub fn utilization(&self) -> f64 {
        if self.max_connections == 0 {
            0.0
        } else {
            self.connections as f64 / self.max_connections as f64
        }
    }

    /// Check if no further connection can be handed out without waiting
    pub fn is_exhausted(&self) -> bool {
        self.max_connections != 0 && self.connections >= self.max_connections
    }
}
