//! Pool configuration
//!
//! Controls cache sizes, sharing, connection limits, the steady-connection
//! behaviour handed to every pooled connection, and the health-check timings.

use std::time::Duration;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use vpool_core::{ErrorKind, Result, VpoolError};

bitflags! {
    /// When a steady connection proactively pings its server
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PingMode: u8 {
        /// Whenever the connection is taken from the pool
        const ON_BORROW = 1;
        /// Whenever a statement is prepared (cursor created)
        const ON_CURSOR = 2;
        /// Whenever a statement is executed
        const ON_QUERY = 4;
        const ALWAYS = Self::ON_BORROW.bits() | Self::ON_CURSOR.bits() | Self::ON_QUERY.bits();
    }
}

impl PingMode {
    pub const NEVER: PingMode = PingMode::empty();
}

impl Default for PingMode {
    fn default() -> Self {
        PingMode::ON_BORROW
    }
}

impl From<u8> for PingMode {
    fn from(bits: u8) -> Self {
        PingMode::from_bits_truncate(bits)
    }
}

impl From<PingMode> for u8 {
    fn from(mode: PingMode) -> Self {
        mode.bits()
    }
}

/// Rollback policy applied when a connection goes back to the idle cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetPolicy {
    /// Always roll back
    #[default]
    Always,
    /// Roll back only when a transaction was started with `begin`
    InTransaction,
}

/// Options applied to every steady connection the pool opens
#[derive(Debug, Clone, PartialEq)]
pub struct SteadyOptions {
    /// Reconnect after this many statements (`None` = unlimited)
    pub maxusage: Option<u64>,
    /// Statements run on every freshly opened connection
    pub setsession: Vec<String>,
    /// Error kinds that trigger a reconnect
    pub failures: Vec<ErrorKind>,
    pub ping: PingMode,
}

impl Default for SteadyOptions {
    fn default() -> Self {
        Self {
            maxusage: None,
            setsession: Vec::new(),
            failures: default_failures(),
            ping: PingMode::default(),
        }
    }
}

fn default_failures() -> Vec<ErrorKind> {
    vec![ErrorKind::Connection, ErrorKind::Io, ErrorKind::Timeout]
}

/// Configuration for a [`ValidatedPool`](crate::ValidatedPool)
///
/// All limits use 0 for "unbounded"/"disabled". Unknown keys are rejected
/// when loading from a file, missing keys take their defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Name attached to every log event of this pool
    name: String,
    /// Idle connections opened at startup and kept by the idle reaper
    mincached: usize,
    /// Maximum number of idle connections kept (0 = unbounded)
    maxcached: usize,
    /// Maximum number of shared connections (0 = no sharing)
    maxshared: usize,
    /// Maximum number of connections handed out at once (0 = unbounded)
    maxconnections: usize,
    /// Wait when exhausted instead of failing
    blocking: bool,
    maxusage: Option<u64>,
    setsession: Vec<String>,
    reset: ResetPolicy,
    failures: Vec<ErrorKind>,
    #[serde(with = "ping_bits")]
    ping: PingMode,
    /// Validate connections before handing them out
    test_on_borrow: bool,
    /// Run the idle reaper
    test_idle: bool,
    validation_sql: String,
    idle_check_time_ms: u64,
    validate_timeout_ms: u64,
    max_wait_time_ms: u64,
}

mod ping_bits {
    use super::PingMode;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(mode: &PingMode, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(mode.bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<PingMode, D::Error> {
        u8::deserialize(deserializer).map(PingMode::from)
    }
}

impl PoolConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self {
            name: "vpool".to_string(),
            mincached: 0,
            maxcached: 0,
            maxshared: 0,
            maxconnections: 0,
            blocking: false,
            maxusage: None,
            setsession: Vec::new(),
            reset: ResetPolicy::default(),
            failures: default_failures(),
            ping: PingMode::default(),
            test_on_borrow: false,
            test_idle: false,
            validation_sql: "SELECT 1".to_string(),
            idle_check_time_ms: 60_000,
            validate_timeout_ms: 5_000,
            max_wait_time_ms: 30_000,
        }
    }

    /// Parse a configuration from TOML
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| VpoolError::Configuration(e.to_string()))
    }

    /// Parse a configuration from JSON
    pub fn from_json_str(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_mincached(mut self, mincached: usize) -> Self {
        self.mincached = mincached;
        self
    }

    pub fn with_maxcached(mut self, maxcached: usize) -> Self {
        self.maxcached = maxcached;
        self
    }

    pub fn with_maxshared(mut self, maxshared: usize) -> Self {
        self.maxshared = maxshared;
        self
    }

    pub fn with_maxconnections(mut self, maxconnections: usize) -> Self {
        self.maxconnections = maxconnections;
        self
    }

    pub fn with_blocking(mut self, blocking: bool) -> Self {
        self.blocking = blocking;
        self
    }

    /// Reconnect after `maxusage` statements; 0 means unlimited
    pub fn with_maxusage(mut self, maxusage: u64) -> Self {
        self.maxusage = (maxusage > 0).then_some(maxusage);
        self
    }

    pub fn with_setsession(mut self, statements: Vec<String>) -> Self {
        self.setsession = statements;
        self
    }

    pub fn with_reset(mut self, reset: ResetPolicy) -> Self {
        self.reset = reset;
        self
    }

    pub fn with_failures(mut self, failures: Vec<ErrorKind>) -> Self {
        self.failures = failures;
        self
    }

    pub fn with_ping(mut self, ping: PingMode) -> Self {
        self.ping = ping;
        self
    }

    pub fn with_test_on_borrow(mut self, enabled: bool) -> Self {
        self.test_on_borrow = enabled;
        self
    }

    pub fn with_test_idle(mut self, enabled: bool) -> Self {
        self.test_idle = enabled;
        self
    }

    pub fn with_validation_sql(mut self, sql: impl Into<String>) -> Self {
        self.validation_sql = sql.into();
        self
    }

    pub fn with_idle_check_time_ms(mut self, interval_ms: u64) -> Self {
        self.idle_check_time_ms = interval_ms;
        self
    }

    pub fn with_validate_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.validate_timeout_ms = timeout_ms;
        self
    }

    pub fn with_max_wait_time_ms(mut self, wait_ms: u64) -> Self {
        self.max_wait_time_ms = wait_ms;
        self
    }

    /// Apply the limit fix-ups used by the pool.
    ///
    /// - `maxcached` is raised to `mincached` when bounded and smaller
    /// - a bounded `maxconnections` is raised to cover `mincached`, `maxcached`
    ///   and `maxshared`, so warming up the idle cache cannot exhaust the pool
    pub fn normalized(mut self) -> Self {
        if self.maxcached != 0 && self.maxcached < self.mincached {
            self.maxcached = self.mincached;
        }
        if self.maxconnections != 0 {
            self.maxconnections = self
                .maxconnections
                .max(self.mincached)
                .max(self.maxcached)
                .max(self.maxshared);
        }
        self
    }

    pub(crate) fn disable_sharing(&mut self) {
        self.maxshared = 0;
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mincached(&self) -> usize {
        self.mincached
    }

    pub fn maxcached(&self) -> usize {
        self.maxcached
    }

    pub fn maxshared(&self) -> usize {
        self.maxshared
    }

    pub fn maxconnections(&self) -> usize {
        self.maxconnections
    }

    pub fn blocking(&self) -> bool {
        self.blocking
    }

    pub fn reset(&self) -> ResetPolicy {
        self.reset
    }

    pub fn ping(&self) -> PingMode {
        self.ping
    }

    pub fn test_on_borrow(&self) -> bool {
        self.test_on_borrow
    }

    pub fn test_idle(&self) -> bool {
        self.test_idle
    }

    pub fn validation_sql(&self) -> &str {
        &self.validation_sql
    }

    pub fn idle_check_time(&self) -> Duration {
        Duration::from_millis(self.idle_check_time_ms)
    }

    /// Validation timeout, `None` when validation runs without a bound
    pub fn validate_timeout(&self) -> Option<Duration> {
        (self.validate_timeout_ms > 0).then(|| Duration::from_millis(self.validate_timeout_ms))
    }

    /// Bound on acquiring a validated connection, `None` when unbounded
    pub fn max_wait_time(&self) -> Option<Duration> {
        (self.max_wait_time_ms > 0).then(|| Duration::from_millis(self.max_wait_time_ms))
    }

    /// Options for the steady connections this pool opens
    pub fn steady_options(&self) -> SteadyOptions {
        SteadyOptions {
            maxusage: self.maxusage,
            setsession: self.setsession.clone(),
            failures: self.failures.clone(),
            ping: self.ping,
        }
    }
}

impl Default for PoolConfig {
    /// Defaults:
    /// - no caching, sharing or connection limit, fail fast when exhausted
    /// - ping on borrow, always roll back on return
    /// - validation with `SELECT 1`, 5 second validation timeout
    /// - 30 second bound on acquiring a validated connection
    fn default() -> Self {
        Self::new()
    }
}
