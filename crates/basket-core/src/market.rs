//! Instrument precision rules.
//!
//! Exchanges reject orders whose price or quantity does not conform to the
//! instrument's tick and lot size, so every close order is rounded through
//! an `InstrumentSpec` before submission.

use crate::{CoreError, Price, Size};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Precision rules for one instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentSpec {
    /// Minimum price increment.
    pub tick_size: Price,
    /// Minimum quantity increment.
    pub lot_size: Size,
}

impl InstrumentSpec {
    /// Create a spec, rejecting negative increments.
    pub fn new(tick_size: Price, lot_size: Size) -> Result<Self, CoreError> {
        if tick_size.is_negative() {
            return Err(CoreError::InvalidPrice(format!(
                "tick size must not be negative: {tick_size}"
            )));
        }
        if lot_size.is_negative() {
            return Err(CoreError::InvalidSize(format!(
                "lot size must not be negative: {lot_size}"
            )));
        }
        Ok(Self {
            tick_size,
            lot_size,
        })
    }

    /// Build from decimal-place counts, e.g. `(2, 3)` = tick 0.01, lot 0.001.
    pub fn from_decimals(price_decimals: u32, size_decimals: u32) -> Self {
        Self {
            tick_size: Price::new(Decimal::new(1, price_decimals)),
            lot_size: Size::new(Decimal::new(1, size_decimals)),
        }
    }

    /// Round a price to the nearest tick.
    pub fn round_price(&self, price: Price) -> Price {
        price.round_to_tick(self.tick_size)
    }

    /// Truncate a quantity to whole lots.
    pub fn round_size(&self, size: Size) -> Size {
        size.round_to_lot(self.lot_size)
    }
}

impl Default for InstrumentSpec {
    /// Unconstrained precision (no rounding).
    fn default() -> Self {
        Self {
            tick_size: Price::ZERO,
            lot_size: Size::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_decimals() {
        let spec = InstrumentSpec::from_decimals(2, 3);
        assert_eq!(spec.tick_size, Price::new(dec!(0.01)));
        assert_eq!(spec.lot_size, Size::new(dec!(0.001)));
    }

    #[test]
    fn test_rounding() {
        let spec = InstrumentSpec::from_decimals(1, 2);
        assert_eq!(spec.round_price(Price::new(dec!(100.26))), Price::new(dec!(100.3)));
        assert_eq!(spec.round_size(Size::new(dec!(0.129))), Size::new(dec!(0.12)));
    }

    #[test]
    fn test_rejects_negative_increments() {
        assert!(InstrumentSpec::new(Price::new(dec!(-0.1)), Size::ONE).is_err());
        assert!(InstrumentSpec::new(Price::ONE, Size::new(dec!(-1))).is_err());
        assert!(InstrumentSpec::new(Price::new(dec!(0.1)), Size::new(dec!(0.01))).is_ok());
    }

    #[test]
    fn test_default_is_unconstrained() {
        let spec = InstrumentSpec::default();
        let size = Size::new(dec!(0.123456789));
        assert_eq!(spec.round_size(size), size);
    }
}
