//! Lightweight liveness check used by steady connections

use std::time::{Duration, Instant};
use vpool_core::Connection;

/// Round-trip time of a successful ping
pub type PingResult = Result<Duration, PingError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PingError {
    ConnectionClosed,
    QueryFailed(String),
}

impl std::fmt::Display for PingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PingError::ConnectionClosed => write!(f, "Connection is closed"),
            PingError::QueryFailed(msg) => write!(f, "Ping query failed: {}", msg),
        }
    }
}

impl std::error::Error for PingError {}

/// Ping a raw connection with the cheapest statement its driver accepts.
pub async fn ping_database(conn: &dyn Connection) -> PingResult {
    if conn.is_closed() {
        return Err(PingError::ConnectionClosed);
    }

    let start = Instant::now();
    conn.query(ping_query(conn.driver_name()), &[])
        .await
        .map(|_| start.elapsed())
        .map_err(|e| PingError::QueryFailed(e.to_string()))
}

/// Ping statement per driver; Oracle and Firebird need a FROM clause.
pub(super) fn ping_query(driver_name: &str) -> &'static str {
    match driver_name {
        "oracle" => "SELECT 1 FROM DUAL",
        "firebird" => "SELECT 1 FROM RDB$DATABASE",
        _ => "SELECT 1",
    }
}
