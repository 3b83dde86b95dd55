//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Prices, quantities
//! and currency amounts are separate newtypes so a PnL figure can never be
//! passed where an order quantity is expected.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;

macro_rules! decimal_newtype {
    ($name:ident) => {
        impl $name {
            pub const ZERO: Self = Self(Decimal::ZERO);
            pub const ONE: Self = Self(Decimal::ONE);

            #[inline]
            pub fn new(value: Decimal) -> Self {
                Self(value)
            }

            #[inline]
            pub fn inner(&self) -> Decimal {
                self.0
            }

            #[inline]
            pub fn is_zero(&self) -> bool {
                self.0.is_zero()
            }

            #[inline]
            pub fn is_positive(&self) -> bool {
                self.0.is_sign_positive() && !self.0.is_zero()
            }

            #[inline]
            pub fn is_negative(&self) -> bool {
                self.0.is_sign_negative() && !self.0.is_zero()
            }
        }

        impl FromStr for $name {
            type Err = rust_decimal::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(s.parse()?))
            }
        }

        impl From<Decimal> for $name {
            fn from(d: Decimal) -> Self {
                Self(d)
            }
        }

        impl Add for $name {
            type Output = Self;

            fn add(self, rhs: Self) -> Self::Output {
                Self(self.0 + rhs.0)
            }
        }

        impl Sub for $name {
            type Output = Self;

            fn sub(self, rhs: Self) -> Self::Output {
                Self(self.0 - rhs.0)
            }
        }

        impl Mul<Decimal> for $name {
            type Output = Self;

            fn mul(self, rhs: Decimal) -> Self::Output {
                Self(self.0 * rhs)
            }
        }

        impl Div<Decimal> for $name {
            type Output = Self;

            fn div(self, rhs: Decimal) -> Self::Output {
                Self(self.0 / rhs)
            }
        }

        impl Neg for $name {
            type Output = Self;

            fn neg(self) -> Self::Output {
                Self(-self.0)
            }
        }
    };
}

/// Price with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Price(pub Decimal);

decimal_newtype!(Price);

impl Price {
    /// Round to the nearest multiple of `tick_size` (midpoint away from zero).
    ///
    /// A zero tick size leaves the price untouched.
    #[inline]
    pub fn round_to_tick(&self, tick_size: Price) -> Self {
        if tick_size.is_zero() {
            return *self;
        }
        let ticks = (self.0 / tick_size.0)
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        Self(ticks * tick_size.0)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Signed quantity with exact decimal precision.
///
/// Position sizes are signed (positive = long, negative = short). Order
/// quantities are always the absolute value.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

decimal_newtype!(Size);

impl Size {
    #[inline]
    pub fn abs(&self) -> Self {
        Self(self.0.abs())
    }

    /// Truncate toward zero to a multiple of `lot_size`.
    ///
    /// Exchanges reject quantities that are not whole lots; truncating never
    /// oversizes a reduce order.
    #[inline]
    pub fn round_to_lot(&self, lot_size: Size) -> Self {
        if lot_size.is_zero() {
            return *self;
        }
        Self((self.0 / lot_size.0).trunc() * lot_size.0)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Currency amount in the account's settlement asset (USDT).
///
/// Used for balances, unrealized PnL and take-profit targets.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Usd(pub Decimal);

decimal_newtype!(Usd);

impl Usd {
    /// `percent` percent of this amount.
    #[inline]
    pub fn percent(&self, percent: Decimal) -> Self {
        Self(percent / Decimal::ONE_HUNDRED * self.0)
    }

    /// Lossy conversion for metrics export.
    pub fn to_f64(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.0.to_f64().unwrap_or(0.0)
    }
}

impl Sum for Usd {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc + x)
    }
}

impl fmt::Display for Usd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut cents = self
            .0
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        cents.rescale(2);
        write!(f, "${}", cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_round_to_tick() {
        let tick = Price::new(dec!(0.01));

        assert_eq!(Price::new(dec!(12345.674)).round_to_tick(tick).0, dec!(12345.67));
        assert_eq!(Price::new(dec!(12345.675)).round_to_tick(tick).0, dec!(12345.68));
    }

    #[test]
    fn test_price_round_zero_tick_is_noop() {
        let price = Price::new(dec!(1.23456));
        assert_eq!(price.round_to_tick(Price::ZERO), price);
    }

    #[test]
    fn test_size_round_to_lot_truncates() {
        let lot = Size::new(dec!(0.001));

        assert_eq!(Size::new(dec!(1.2349)).round_to_lot(lot).0, dec!(1.234));
        // Negative sizes truncate toward zero, not toward -inf
        assert_eq!(Size::new(dec!(-1.2349)).round_to_lot(lot).0, dec!(-1.234));
    }

    #[test]
    fn test_size_below_one_lot_rounds_to_zero() {
        let rounded = Size::new(dec!(0.0004)).round_to_lot(Size::new(dec!(0.001)));
        assert!(rounded.is_zero());
    }

    #[test]
    fn test_size_abs_and_sign() {
        let short = Size::new(dec!(-2.5));
        assert!(short.is_negative());
        assert!(!short.is_positive());
        assert_eq!(short.abs(), Size::new(dec!(2.5)));
    }

    #[test]
    fn test_usd_percent_and_sum() {
        let balance = Usd::new(dec!(1000));
        assert_eq!(balance.percent(dec!(10)), Usd::new(dec!(100)));

        let total: Usd = [dec!(12.5), dec!(-2.5), dec!(40)]
            .into_iter()
            .map(Usd::new)
            .sum();
        assert_eq!(total, Usd::new(dec!(50)));
    }

    #[test]
    fn test_usd_display_two_decimals() {
        assert_eq!(Usd::new(dec!(1100)).to_string(), "$1100.00");
        assert_eq!(Usd::new(dec!(-3.456)).to_string(), "$-3.46");
    }
}
