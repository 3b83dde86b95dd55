//! Exchange snapshots: instrument symbols, open positions and top-of-book
//! quotes.
//!
//! All of these are fetched fresh on every evaluation and never cached
//! across poll cycles; positions can change externally at any time.

use crate::{OrderSide, Price, Size, Usd};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument identifier as used by the exchange (e.g. "BTCUSDT").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl AsRef<str> for Symbol {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Snapshot of an open leveraged position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed size: positive = long, negative = short.
    pub size: Size,
    /// Unrealized profit in account currency (signed).
    pub unrealized_pnl: Usd,
}

impl Position {
    pub fn new(symbol: impl Into<Symbol>, size: Size, unrealized_pnl: Usd) -> Self {
        Self {
            symbol: symbol.into(),
            size,
            unrealized_pnl,
        }
    }

    /// A position with zero size is not open.
    pub fn is_open(&self) -> bool {
        !self.size.is_zero()
    }

    /// Side of the position as an order side (Buy = long, Sell = short).
    ///
    /// Returns `None` for a flat position.
    pub fn side(&self) -> Option<OrderSide> {
        if self.size.is_positive() {
            Some(OrderSide::Buy)
        } else if self.size.is_negative() {
            Some(OrderSide::Sell)
        } else {
            None
        }
    }

    /// Side of the order that closes this position.
    pub fn closing_side(&self) -> Option<OrderSide> {
        self.side().map(|s| s.opposite())
    }

    /// Quantity needed to close: the absolute position size.
    pub fn close_quantity(&self) -> Size {
        self.size.abs()
    }
}

/// Quote state for passive-order pricing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteState {
    /// Both bid and ask are present.
    Valid,
    /// No resting bids.
    NoBid,
    /// No resting asks.
    NoAsk,
    /// Both sides missing.
    Empty,
}

impl fmt::Display for QuoteState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Valid => write!(f, "VALID"),
            Self::NoBid => write!(f, "NO_BID"),
            Self::NoAsk => write!(f, "NO_ASK"),
            Self::Empty => write!(f, "EMPTY"),
        }
    }
}

/// Best bid and ask for a symbol at a point in time.
///
/// A missing side is `None` (no resting liquidity on that side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub bid: Option<Price>,
    pub ask: Option<Price>,
    /// Timestamp when this quote was received.
    pub received_at: DateTime<Utc>,
}

impl Quote {
    pub fn new(bid: Option<Price>, ask: Option<Price>) -> Self {
        Self {
            bid: bid.filter(Price::is_positive),
            ask: ask.filter(Price::is_positive),
            received_at: Utc::now(),
        }
    }

    pub fn state(&self) -> QuoteState {
        match (self.bid, self.ask) {
            (Some(_), Some(_)) => QuoteState::Valid,
            (Some(_), None) => QuoteState::NoAsk,
            (None, Some(_)) => QuoteState::NoBid,
            (None, None) => QuoteState::Empty,
        }
    }

    /// Passive price for a closing order on `side`.
    ///
    /// A sell rests at the best ask and a buy rests at the best bid, so the
    /// order joins the passive side of the book instead of crossing the
    /// spread. Returns `None` when that side of the book is empty.
    pub fn passive_price(&self, side: OrderSide) -> Option<Price> {
        match side {
            OrderSide::Sell => self.ask,
            OrderSide::Buy => self.bid,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn position(size: rust_decimal::Decimal) -> Position {
        Position::new("BTCUSDT", Size::new(size), Usd::new(dec!(12.5)))
    }

    #[test]
    fn test_long_position_closes_with_sell() {
        let pos = position(dec!(0.5));
        assert_eq!(pos.side(), Some(OrderSide::Buy));
        assert_eq!(pos.closing_side(), Some(OrderSide::Sell));
        assert_eq!(pos.close_quantity(), Size::new(dec!(0.5)));
    }

    #[test]
    fn test_short_position_closes_with_buy() {
        let pos = position(dec!(-3));
        assert_eq!(pos.closing_side(), Some(OrderSide::Buy));
        assert_eq!(pos.close_quantity(), Size::new(dec!(3)));
    }

    #[test]
    fn test_flat_position_has_no_side() {
        let pos = position(dec!(0));
        assert!(!pos.is_open());
        assert_eq!(pos.side(), None);
        assert_eq!(pos.closing_side(), None);
    }

    #[test]
    fn test_passive_price_selection() {
        let quote = Quote::new(Some(Price::new(dec!(99.5))), Some(Price::new(dec!(100.5))));
        assert_eq!(quote.state(), QuoteState::Valid);
        // Closing a long sells at the ask, closing a short buys at the bid
        assert_eq!(quote.passive_price(OrderSide::Sell), Some(Price::new(dec!(100.5))));
        assert_eq!(quote.passive_price(OrderSide::Buy), Some(Price::new(dec!(99.5))));
    }

    #[test]
    fn test_quote_missing_side() {
        let quote = Quote::new(Some(Price::new(dec!(99.5))), None);
        assert_eq!(quote.state(), QuoteState::NoAsk);
        assert_eq!(quote.passive_price(OrderSide::Sell), None);

        // Zero prices are treated as an empty side
        let quote = Quote::new(Some(Price::ZERO), Some(Price::ZERO));
        assert_eq!(quote.state(), QuoteState::Empty);
    }
}
