//! Prometheus metrics and structured logging for basket-close.
//!
//! - Prometheus collectors for PnL, targets, liquidation runs and gateway errors
//! - Structured logging with tracing (JSON in production)

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
