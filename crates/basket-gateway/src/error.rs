//! Gateway error types.

use thiserror::Error;

/// Errors returned by exchange gateway calls.
///
/// Two classes matter to the engine: transient errors (network, rate limit,
/// timeout) that the next poll cycle may not see again, and exchange
/// rejections that will not go away by retrying the same request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GatewayError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Rejected by exchange: {0}")]
    Rejected(String),

    #[error("Unknown symbol: {0}")]
    UnknownSymbol(String),

    #[error("Unknown order: {0}")]
    UnknownOrder(String),
}

impl GatewayError {
    /// Check if the error is transient (network class).
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::Network(_) | GatewayError::RateLimited(_) | GatewayError::Timeout(_)
        )
    }

    /// Short label for logs and metrics.
    #[must_use]
    pub fn class(&self) -> &'static str {
        if self.is_transient() {
            "transient"
        } else {
            "rejection"
        }
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;
