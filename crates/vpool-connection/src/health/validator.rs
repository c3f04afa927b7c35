//! Validation query with an optional time bound

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::status::{HealthStatus, HealthThresholds};
use crate::steady::SteadyConnection;

/// How a validation ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Valid,
    /// The query failed; carries the error message
    Invalid(String),
    /// The query did not finish within the validation timeout
    TimedOut,
}

/// Result of one validation run. Never persisted.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub outcome: ValidationOutcome,
    pub latency: Duration,
    pub status: HealthStatus,
    pub checked_at: Instant,
}

impl ValidationResult {
    fn new(outcome: ValidationOutcome, latency: Duration, thresholds: &HealthThresholds) -> Self {
        let status = match outcome {
            ValidationOutcome::Valid => thresholds.classify(latency),
            _ => HealthStatus::Unhealthy,
        };
        Self {
            outcome,
            latency,
            status,
            checked_at: Instant::now(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.outcome == ValidationOutcome::Valid
    }

    pub fn timed_out(&self) -> bool {
        self.outcome == ValidationOutcome::TimedOut
    }

    /// Error description for failed validations
    pub fn error(&self) -> Option<String> {
        match &self.outcome {
            ValidationOutcome::Valid => None,
            ValidationOutcome::Invalid(msg) => Some(msg.clone()),
            ValidationOutcome::TimedOut => {
                Some(format!("validation timed out after {:?}", self.latency))
            }
        }
    }
}

/// Runs the validation statement against steady connections.
///
/// With a timeout the statement runs on its own task so a hung server
/// cannot hold the caller longer than the bound; on expiry the task is
/// aborted and the running statement cancelled. The validator never returns
/// an error, every failure is folded into the [`ValidationResult`].
#[derive(Debug, Clone)]
pub struct ConnectionValidator {
    sql: String,
    timeout: Option<Duration>,
    thresholds: HealthThresholds,
}

impl ConnectionValidator {
    pub fn new(sql: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            sql: sql.into(),
            timeout,
            thresholds: HealthThresholds::default(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: HealthThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Validate `con` with `sql`, or the configured statement when `None`.
    pub async fn validate(&self, con: &Arc<SteadyConnection>, sql: Option<&str>) -> ValidationResult {
        let sql = sql.unwrap_or(&self.sql).to_string();
        let start = Instant::now();

        let outcome = match self.timeout {
            None => match con.query(&sql, &[]).await {
                Ok(_) => ValidationOutcome::Valid,
                Err(e) => ValidationOutcome::Invalid(e.to_string()),
            },
            Some(limit) => {
                let unit_con = Arc::clone(con);
                let mut unit = tokio::spawn(async move { unit_con.query(&sql, &[]).await });

                match tokio::time::timeout(limit, &mut unit).await {
                    Ok(Ok(Ok(_))) => ValidationOutcome::Valid,
                    Ok(Ok(Err(e))) => ValidationOutcome::Invalid(e.to_string()),
                    Ok(Err(join_err)) => ValidationOutcome::Invalid(join_err.to_string()),
                    Err(_) => {
                        unit.abort();
                        con.cancel();
                        ValidationOutcome::TimedOut
                    }
                }
            }
        };

        let result = ValidationResult::new(outcome, start.elapsed(), &self.thresholds);
        match &result.outcome {
            ValidationOutcome::Valid => {
                tracing::trace!(connection_id = %con.id(), latency = ?result.latency, "connection validated");
            }
            ValidationOutcome::Invalid(error) => {
                tracing::warn!(connection_id = %con.id(), error = %error, "connection failed validation");
            }
            ValidationOutcome::TimedOut => {
                tracing::warn!(connection_id = %con.id(), timeout = ?self.timeout, "connection validation timed out");
            }
        }
        result
    }
}
