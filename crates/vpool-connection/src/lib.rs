//! vpool connection - validated, self-healing connection pool
//!
//! A pool of steady (auto-reconnecting) connections with dedicated and
//! shared handles, connection limits, validation on borrow bounded by a
//! maximum wait, and a background reaper that trims and validates the idle
//! cache.

mod bounded;
mod config;
pub mod health;
pub mod pool;
pub mod steady;

#[cfg(test)]
mod testing;

pub use bounded::{BoundedWaitExecutor, WaitContext, current_caller};
pub use config::{PingMode, PoolConfig, ResetPolicy, SteadyOptions};
pub use health::{
    ConnectionValidator, HealthStatus, HealthThresholds, PingError, PingResult,
    ValidationOutcome, ValidationResult, ping_database,
};
pub use pool::{PoolStats, PooledConnection, Slot, ValidatedPool};
pub use steady::SteadyConnection;
