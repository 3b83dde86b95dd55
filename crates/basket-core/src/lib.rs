//! Core domain types for the basket-close liquidation engine.
//!
//! This crate provides the value types shared by every other crate:
//! - `Price`, `Size`, `Usd`: Precision-safe numeric types
//! - `Symbol`, `Position`, `Quote`: Exchange snapshots held for one poll cycle
//! - `InstrumentSpec`: Per-instrument precision rules (tick size, lot size)
//! - `OrderSide`, `OrderType`, `TimeInForce`, `OrderStatus`: Order enums
//! - `TargetSpec`, `TargetState`: Take-profit target modes

pub mod decimal;
pub mod error;
pub mod market;
pub mod order;
pub mod target;
pub mod types;

pub use decimal::{Price, Size, Usd};
pub use error::{CoreError, Result};
pub use market::InstrumentSpec;
pub use order::{OrderId, OrderSide, OrderState, OrderStatus, OrderType, TimeInForce};
pub use target::{TargetMode, TargetSpec, TargetState};
pub use types::{Position, Quote, QuoteState, Symbol};
