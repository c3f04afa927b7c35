//! Steady (auto-reconnecting) connections
//!
//! A steady connection wraps a raw driver connection and transparently opens
//! a new one when the old one fails, when it has been used `maxusage` times,
//! or when a ping shows it is dead. Reconnects never happen in the middle of
//! a transaction.
//!
//! # Example
//!
//! ```ignore
//! use vpool_connection::{SteadyConnection, SteadyOptions};
//!
//! let con = SteadyConnection::connect(factory, SteadyOptions::default()).await?;
//! // Retried once on a fresh connection if the server went away
//! let rows = con.query("SELECT name FROM users", &[]).await?;
//! ```

mod connection;


pub use connection::SteadyConnection;
