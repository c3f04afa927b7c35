//! vpool core - driver-facing abstractions for the validated connection pool
//!
//! This crate defines what a database driver has to provide to be pooled:
//!
//! - `Connection` - a raw database connection
//! - `ConnectionFactory` - the pool's `creator`, opening raw connections
//! - `QueryCancelHandle` - optional statement cancellation
//! - `VpoolError` / `ErrorKind` - the shared error type and its classification
//! - Value and result types exchanged with drivers

mod connection;
mod error;
mod types;

pub use connection::*;
pub use error::*;
pub use types::*;
