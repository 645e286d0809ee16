//! Prometheus metrics and structured logging for chart-sync.
//!
//! - Prometheus metrics for the session, dispatch and render stages
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
