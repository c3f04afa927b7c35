//! Connection health checks
//!
//! Pinging, latency classification and the bounded validation query the pool
//! runs before handing out connections and while sweeping the idle cache.
//!
//! # Example
//!
//! ```ignore
//! use vpool_connection::health::ConnectionValidator;
//!
//! let validator = ConnectionValidator::new("SELECT 1", Some(Duration::from_secs(1)));
//! let result = validator.validate(&steady, None).await;
//! if !result.is_valid() {
//!     println!("evicting: {:?}", result.outcome);
//! }
//! ```

mod ping;
mod status;
mod validator;


pub use ping::{PingError, PingResult, ping_database};
pub use status::{HealthStatus, HealthThresholds};
pub use validator::{ConnectionValidator, ValidationOutcome, ValidationResult};
