//! Engine error types.

use basket_core::{CoreError, Position};
use basket_gateway::GatewayError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid operator configuration. Fatal to starting a monitoring cycle.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    /// Positions still open after a liquidation run.
    #[error("Partial liquidation, still open: {}", describe_positions(.remaining))]
    PartialLiquidation { remaining: Vec<Position> },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl From<CoreError> for EngineError {
    fn from(err: CoreError) -> Self {
        Self::Configuration(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;

/// "BTCUSDT (0.5), ETHUSDT (-2)"
pub fn describe_positions(positions: &[Position]) -> String {
    positions
        .iter()
        .map(|p| format!("{} ({})", p.symbol, p.size))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_core::{Size, Usd};
    use rust_decimal_macros::dec;

    #[test]
    fn test_partial_liquidation_names_symbols() {
        let err = EngineError::PartialLiquidation {
            remaining: vec![
                Position::new("BTCUSDT", Size::new(dec!(0.5)), Usd::ZERO),
                Position::new("ETHUSDT", Size::new(dec!(-2)), Usd::ZERO),
            ],
        };
        assert_eq!(
            err.to_string(),
            "Partial liquidation, still open: BTCUSDT (0.5), ETHUSDT (-2)"
        );
    }

    #[test]
    fn test_core_error_is_configuration() {
        let err: EngineError = CoreError::InvalidTarget("negative".into()).into();
        assert!(matches!(err, EngineError::Configuration(_)));
    }
}
