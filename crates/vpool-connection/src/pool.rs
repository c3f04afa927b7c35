//! Validated connection pooling
//!
//! The pool keeps an idle cache of steady connections and, when sharing is
//! enabled, a shared cache whose entries several callers use at once. It
//! bounds the number of connections handed out, validates connections before
//! lending them (`test_on_borrow`) and sweeps the idle cache in the
//! background (`test_idle`).
//!
//! # Example
//!
//! ```ignore
//! use vpool_connection::{PoolConfig, ValidatedPool};
//!
//! let config = PoolConfig::new()
//!     .with_mincached(2)
//!     .with_maxshared(4)
//!     .with_maxconnections(20)
//!     .with_test_on_borrow(true);
//!
//! let pool = ValidatedPool::new(factory, config).await?;
//! let mut conn = pool.connection(true).await?;
//! // Use connection...
//! conn.close().await;
//! ```

mod allocator;
mod pool;
mod pooled;
mod reaper;
mod state;
mod stats;


pub use pool::ValidatedPool;
pub use pooled::{PooledConnection, Slot};
pub use stats::PoolStats;
