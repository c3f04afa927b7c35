//! Latency classification of validation results

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Health of a connection as seen by its last validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Healthy,
    /// Valid, but slow to answer
    Degraded,
    /// Failed or timed out
    Unhealthy,
}

impl HealthStatus {
    /// Both `Healthy` and `Degraded` connections may be handed out.
    pub fn is_usable(&self) -> bool {
        !matches!(self, HealthStatus::Unhealthy)
    }
}

/// Latency bounds for [`HealthStatus`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthThresholds {
    /// Up to this latency a connection is healthy
    pub healthy: Duration,
    /// Up to this latency a connection is degraded, above it unhealthy
    pub degraded: Duration,
}

impl HealthThresholds {
    pub fn new(healthy: Duration, degraded: Duration) -> Self {
        Self {
            healthy,
            degraded: degraded.max(healthy),
        }
    }

    pub fn classify(&self, latency: Duration) -> HealthStatus {
        if latency <= self.healthy {
            HealthStatus::Healthy
        } else if latency <= self.degraded {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }
}

impl Default for HealthThresholds {
    /// Healthy up to 100ms, degraded up to 500ms
    fn default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(500))
    }
}
