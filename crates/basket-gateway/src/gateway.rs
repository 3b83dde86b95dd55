//! Exchange gateway trait.
//!
//! The liquidation engine only talks to the exchange through this
//! capability interface. A live exchange adapter, the in-memory
//! [`SimGateway`](crate::SimGateway) and test doubles all implement it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use basket_core::{
    OrderId, OrderSide, OrderStatus, Position, Price, Quote, Size, Symbol, TimeInForce, Usd,
};

use crate::error::GatewayResult;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capability interface to a derivatives exchange.
///
/// Every call may fail with a transient network error or an exchange
/// rejection. The session is shared read-mostly across concurrent close
/// attempts, so implementations must be `Send + Sync`.
pub trait Gateway: Send + Sync {
    /// All positions with non-zero size.
    fn open_positions(&self) -> BoxFuture<'_, GatewayResult<Vec<Position>>>;

    /// Fresh top-of-book quote for a symbol.
    fn quote<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, GatewayResult<Quote>>;

    /// Round a quantity to the instrument's lot size.
    fn size_to_precision(&self, symbol: &Symbol, size: Size) -> GatewayResult<Size>;

    /// Round a price to the instrument's tick size.
    fn price_to_precision(&self, symbol: &Symbol, price: Price) -> GatewayResult<Price>;

    /// Submit a limit order. A [`TimeInForce::PostOnly`] order is never
    /// executed as a taker; it expires instead.
    fn place_limit_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        side: OrderSide,
        size: Size,
        price: Price,
        time_in_force: TimeInForce,
    ) -> BoxFuture<'a, GatewayResult<OrderId>>;

    /// Current status of an order.
    fn order_status<'a>(
        &'a self,
        order_id: &'a OrderId,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, GatewayResult<OrderStatus>>;

    /// Cancel a resting order.
    fn cancel_order<'a>(
        &'a self,
        order_id: &'a OrderId,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, GatewayResult<()>>;

    /// Submit a market order. With `reduce_only` the exchange never lets
    /// the order increase or flip the position.
    fn place_market_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        side: OrderSide,
        size: Size,
        reduce_only: bool,
    ) -> BoxFuture<'a, GatewayResult<OrderId>>;

    /// Total margin balance (wallet plus unrealized PnL).
    fn balance(&self) -> BoxFuture<'_, GatewayResult<Usd>>;

    /// Exchange server time in Unix milliseconds.
    fn server_time(&self) -> BoxFuture<'_, GatewayResult<i64>>;

    /// Offset (`server - local`, ms) added to the timestamp of every signed
    /// request from now on.
    fn set_time_offset_ms(&self, offset_ms: i64);
}

/// Arc wrapper for Gateway trait objects.
pub type DynGateway = Arc<dyn Gateway>;
