//! Order-related types and identifiers.
//!
//! Provides order side, type, time-in-force, exchange order IDs and order
//! status as reported back by the gateway.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::Size;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Order type used by the close sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Passive limit order (post-only).
    Limit,
    /// Market order, used as the guaranteed-fill fallback.
    Market,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit => write!(f, "limit"),
            Self::Market => write!(f, "market"),
        }
    }
}

/// Time-in-force for limit orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TimeInForce {
    /// Good-til-cancelled.
    #[serde(rename = "GTC")]
    GoodTilCancelled,
    /// Good-til-crossing: post-only, expires instead of taking liquidity.
    #[default]
    #[serde(rename = "GTX")]
    PostOnly,
}

impl fmt::Display for TimeInForce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GoodTilCancelled => write!(f, "GTC"),
            Self::PostOnly => write!(f, "GTX"),
        }
    }
}

/// Exchange-assigned order identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderId(String);

impl OrderId {
    /// Create a new unique order ID.
    ///
    /// Format: `bc_{timestamp_ms}_{uuid_short}`. Used by the simulated
    /// gateway; live gateways wrap the exchange's own ID via `from_string`.
    pub fn generate() -> Self {
        let ts = chrono::Utc::now().timestamp_millis();
        let uuid_short = &Uuid::new_v4().to_string()[..8];
        Self(format!("bc_{ts}_{uuid_short}"))
    }

    /// Create from an existing string (for parsing responses).
    pub fn from_string(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self::from_string(s)
    }
}

/// Lifecycle state of an order on the exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    /// Resting on the book, nothing filled.
    Open,
    /// Resting on the book, some quantity filled.
    PartiallyFilled,
    /// Completely filled.
    Filled,
    /// Cancelled (by us or by the exchange).
    Cancelled,
    /// Expired without filling, e.g. a post-only order that would have crossed.
    Expired,
    /// Rejected by the exchange.
    Rejected,
}

impl OrderState {
    /// Check if the order can still trade.
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Open | Self::PartiallyFilled)
    }
}

impl fmt::Display for OrderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::PartiallyFilled => write!(f, "partially_filled"),
            Self::Filled => write!(f, "filled"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Expired => write!(f, "expired"),
            Self::Rejected => write!(f, "rejected"),
        }
    }
}

/// Order status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatus {
    pub state: OrderState,
    /// Quantity filled so far (always non-negative).
    pub filled: Size,
}

impl OrderStatus {
    pub fn new(state: OrderState, filled: Size) -> Self {
        Self { state, filled }
    }

    /// Status of an order that has not traded.
    pub fn unfilled(state: OrderState) -> Self {
        Self::new(state, Size::ZERO)
    }

    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_order_side_opposite() {
        assert_eq!(OrderSide::Buy.opposite(), OrderSide::Sell);
        assert_eq!(OrderSide::Sell.opposite(), OrderSide::Buy);
    }

    #[test]
    fn test_order_id_unique() {
        let id1 = OrderId::generate();
        let id2 = OrderId::generate();
        assert_ne!(id1, id2);
        assert!(id1.as_str().starts_with("bc_"));
    }

    #[test]
    fn test_post_only_is_default_tif() {
        assert_eq!(TimeInForce::default(), TimeInForce::PostOnly);
        assert_eq!(TimeInForce::PostOnly.to_string(), "GTX");
    }

    #[test]
    fn test_order_state_liveness() {
        assert!(OrderState::Open.is_live());
        assert!(OrderState::PartiallyFilled.is_live());
        assert!(!OrderState::Filled.is_live());
        assert!(!OrderState::Expired.is_live());
    }

    #[test]
    fn test_order_status_serialization() {
        let status = OrderStatus::new(OrderState::PartiallyFilled, Size::new(dec!(0.25)));
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, r#"{"state":"partially_filled","filled":"0.25"}"#);
    }
}
