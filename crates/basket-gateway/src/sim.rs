//! In-memory simulated exchange.
//!
//! `SimGateway` keeps positions, books, precision rules, a wallet and an
//! order table behind a single mutex. It is used by the bot for dry runs
//! (exchange authentication is not part of this project) and by tests,
//! which script one-shot failures and inspect the call journal.
//!
//! Fill model:
//! - Market orders fill immediately at the touch (sell at bid, buy at ask,
//!   mark price when that side is empty) and realise PnL into the wallet.
//! - Post-only limit orders that would cross expire. Otherwise they rest
//!   until their status is queried, then follow the symbol's
//!   [`PassiveFill`] policy.
//! - Reduce-only market orders are clipped to the open position and
//!   rejected when there is nothing to reduce.
//! - Signed requests (place, cancel) are stamped with the client's clock
//!   offset and rejected outside a 5 s receive window of server time.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use basket_core::{
    InstrumentSpec, OrderId, OrderSide, OrderState, OrderStatus, OrderType, Position, Price,
    Quote, Size, Symbol, TimeInForce, Usd,
};
use chrono::Utc;
use parking_lot::Mutex;
use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use tracing::debug;

use crate::error::{GatewayError, GatewayResult};
use crate::gateway::{BoxFuture, Gateway};

/// Maximum distance between a request timestamp and server time.
const RECV_WINDOW_MS: i64 = 5_000;

/// Gateway operation, used for failure scripting and the call journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOperation {
    OpenPositions,
    Quote,
    Precision,
    PlaceLimit,
    OrderStatus,
    Cancel,
    PlaceMarket,
    Balance,
    ServerTime,
}

/// How a resting limit order behaves when its status is queried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PassiveFill {
    /// Fill the whole order.
    #[default]
    Full,
    /// Never fill; the order stays on the book.
    Rest,
    /// Fill up to this quantity once, then rest.
    Partial(Size),
}

/// One recorded gateway call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimCall {
    pub operation: SimOperation,
    pub symbol: Option<Symbol>,
}

/// Snapshot of a simulated order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimOrder {
    pub id: OrderId,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub size: Size,
    pub price: Option<Price>,
    /// `None` for market orders.
    pub time_in_force: Option<TimeInForce>,
    pub reduce_only: bool,
    pub state: OrderState,
    pub filled: Size,
}

#[derive(Debug, Clone)]
struct SimPosition {
    size: Size,
    entry_price: Price,
    mark_price: Price,
}

impl SimPosition {
    fn unrealized_pnl(&self) -> Usd {
        Usd::new(self.size.inner() * (self.mark_price.inner() - self.entry_price.inner()))
    }
}

#[derive(Debug, Clone)]
struct SimInstrument {
    spec: InstrumentSpec,
    bid: Option<Price>,
    ask: Option<Price>,
    passive_fill: PassiveFill,
    /// Quantity that trades while a cancel request is in flight.
    fill_on_cancel: Option<Size>,
}

impl SimInstrument {
    fn new(spec: InstrumentSpec, bid: Option<Price>, ask: Option<Price>) -> Self {
        Self {
            spec,
            bid,
            ask,
            passive_fill: PassiveFill::default(),
            fill_on_cancel: None,
        }
    }
}

#[derive(Debug, Default)]
struct SimState {
    wallet: Usd,
    instruments: HashMap<Symbol, SimInstrument>,
    positions: HashMap<Symbol, SimPosition>,
    orders: Vec<SimOrder>,
    failures: HashMap<SimOperation, VecDeque<GatewayError>>,
    symbol_failures: HashMap<(SimOperation, Symbol), VecDeque<GatewayError>>,
    journal: Vec<SimCall>,
    server_time_offset_ms: i64,
    client_time_offset_ms: i64,
    latency: Duration,
}

impl SimState {
    /// Record the call and pop a scripted failure, symbol-specific first.
    fn enter(&mut self, operation: SimOperation, symbol: Option<&Symbol>) -> GatewayResult<()> {
        self.journal.push(SimCall {
            operation,
            symbol: symbol.cloned(),
        });
        if let Some(symbol) = symbol {
            if let Some(err) = self
                .symbol_failures
                .get_mut(&(operation, symbol.clone()))
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
        }
        match self.failures.get_mut(&operation).and_then(VecDeque::pop_front) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Reject a signed request whose timestamp is outside the receive window.
    fn check_timestamp(&self, symbol: &Symbol) -> GatewayResult<()> {
        let drift_ms = self.client_time_offset_ms - self.server_time_offset_ms;
        if drift_ms.abs() > RECV_WINDOW_MS {
            return Err(GatewayError::Rejected(format!(
                "{symbol}: request timestamp {drift_ms} ms from server time, outside {RECV_WINDOW_MS} ms receive window"
            )));
        }
        Ok(())
    }

    fn instrument(&self, symbol: &Symbol) -> GatewayResult<&SimInstrument> {
        self.instruments
            .get(symbol)
            .ok_or_else(|| GatewayError::UnknownSymbol(symbol.to_string()))
    }

    fn order_mut(&mut self, order_id: &OrderId) -> GatewayResult<&mut SimOrder> {
        self.orders
            .iter_mut()
            .find(|o| &o.id == order_id)
            .ok_or_else(|| GatewayError::UnknownOrder(order_id.to_string()))
    }

    fn check_precision(
        &self,
        symbol: &Symbol,
        size: Size,
        price: Option<Price>,
    ) -> GatewayResult<()> {
        let spec = self.instrument(symbol)?.spec;
        if !size.is_positive() {
            return Err(GatewayError::Rejected(format!(
                "{symbol}: order quantity must be positive, got {size}"
            )));
        }
        if spec.round_size(size) != size {
            return Err(GatewayError::Rejected(format!(
                "{symbol}: quantity {size} does not match lot size {}",
                spec.lot_size
            )));
        }
        if let Some(price) = price {
            if spec.round_price(price) != price {
                return Err(GatewayError::Rejected(format!(
                    "{symbol}: price {price} does not match tick size {}",
                    spec.tick_size
                )));
            }
        }
        Ok(())
    }

    /// Apply a fill to the position and realise PnL on the reduced part.
    fn apply_fill(&mut self, symbol: &Symbol, side: OrderSide, qty: Size, price: Price) {
        let delta = if side == OrderSide::Buy { qty.inner() } else { -qty.inner() };
        let position = self.positions.entry(symbol.clone()).or_insert(SimPosition {
            size: Size::ZERO,
            entry_price: price,
            mark_price: price,
        });

        let current = position.size.inner();
        let reducing = current * delta < Decimal::ZERO;
        if reducing {
            let reduced = qty.inner().min(current.abs());
            let direction = current.signum();
            let realized = reduced * (price.inner() - position.entry_price.inner()) * direction;
            self.wallet = self.wallet + Usd::new(realized);
        }

        let next = current + delta;
        if next.is_zero() {
            self.positions.remove(symbol);
            return;
        }
        if current.is_zero() || next.signum() != current.signum() {
            position.entry_price = price;
        }
        position.size = Size::new(next);
    }

    fn open_positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .positions
            .iter()
            .filter(|(_, p)| !p.size.is_zero())
            .map(|(symbol, p)| Position::new(symbol.clone(), p.size, p.unrealized_pnl()))
            .collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        positions
    }

    fn margin_balance(&self) -> Usd {
        self.wallet + self.positions.values().map(SimPosition::unrealized_pnl).sum::<Usd>()
    }
}

/// Simulated exchange.
#[derive(Debug, Default)]
pub struct SimGateway {
    state: Mutex<SimState>,
}

impl SimGateway {
    /// Empty exchange with a zero wallet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty exchange with the given wallet balance.
    pub fn with_balance(wallet: Usd) -> Self {
        let gateway = Self::new();
        gateway.state.lock().wallet = wallet;
        gateway
    }

    /// Register an instrument with its precision rules and book.
    pub fn add_instrument(
        &self,
        symbol: impl Into<Symbol>,
        spec: InstrumentSpec,
        bid: Option<Price>,
        ask: Option<Price>,
    ) {
        self.state
            .lock()
            .instruments
            .insert(symbol.into(), SimInstrument::new(spec, bid, ask));
    }

    /// Replace the top of book for a symbol.
    pub fn set_quote(&self, symbol: &Symbol, bid: Option<Price>, ask: Option<Price>) {
        if let Some(instrument) = self.state.lock().instruments.get_mut(symbol) {
            instrument.bid = bid;
            instrument.ask = ask;
        }
    }

    pub fn set_passive_fill(&self, symbol: &Symbol, policy: PassiveFill) {
        if let Some(instrument) = self.state.lock().instruments.get_mut(symbol) {
            instrument.passive_fill = policy;
        }
    }

    /// Let `qty` of a resting order trade just before the next cancel
    /// request for this symbol takes effect.
    pub fn set_fill_on_cancel(&self, symbol: &Symbol, qty: Size) {
        if let Some(instrument) = self.state.lock().instruments.get_mut(symbol) {
            instrument.fill_on_cancel = Some(qty);
        }
    }

    /// Open (or replace) a position. Registers the instrument with
    /// unconstrained precision if it is unknown.
    pub fn open_position(
        &self,
        symbol: impl Into<Symbol>,
        size: Size,
        entry_price: Price,
        mark_price: Price,
    ) {
        let symbol = symbol.into();
        let mut state = self.state.lock();
        state
            .instruments
            .entry(symbol.clone())
            .or_insert_with(|| {
                SimInstrument::new(InstrumentSpec::default(), Some(mark_price), Some(mark_price))
            });
        if size.is_zero() {
            state.positions.remove(&symbol);
            return;
        }
        state.positions.insert(
            symbol,
            SimPosition {
                size,
                entry_price,
                mark_price,
            },
        );
    }

    /// Move the mark price so that the position shows `pnl` unrealized.
    pub fn set_unrealized_pnl(&self, symbol: &Symbol, pnl: Usd) {
        if let Some(position) = self.state.lock().positions.get_mut(symbol) {
            if !position.size.is_zero() {
                let mark = position.entry_price.inner() + pnl.inner() / position.size.inner();
                position.mark_price = Price::new(mark);
            }
        }
    }

    /// Move the exchange clock `offset_ms` ahead of local time.
    pub fn set_server_time_offset_ms(&self, offset_ms: i64) {
        self.state.lock().server_time_offset_ms = offset_ms;
    }

    /// Offset the client last applied to request timestamps.
    pub fn time_offset_ms(&self) -> i64 {
        self.state.lock().client_time_offset_ms
    }

    /// Delay applied to every async call.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Fail the next call of `operation` with `error`.
    pub fn fail_next(&self, operation: SimOperation, error: GatewayError) {
        self.state
            .lock()
            .failures
            .entry(operation)
            .or_default()
            .push_back(error);
    }

    /// Fail the next call of `operation` on `symbol` with `error`.
    pub fn fail_next_for(&self, operation: SimOperation, symbol: &Symbol, error: GatewayError) {
        self.state
            .lock()
            .symbol_failures
            .entry((operation, symbol.clone()))
            .or_default()
            .push_back(error);
    }

    pub fn calls(&self) -> Vec<SimCall> {
        self.state.lock().journal.clone()
    }

    pub fn call_count(&self, operation: SimOperation) -> usize {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| c.operation == operation)
            .count()
    }

    /// Operations issued for one symbol, in order.
    pub fn calls_for(&self, symbol: &Symbol) -> Vec<SimOperation> {
        self.state
            .lock()
            .journal
            .iter()
            .filter(|c| c.symbol.as_ref() == Some(symbol))
            .map(|c| c.operation)
            .collect()
    }

    pub fn orders_for(&self, symbol: &Symbol) -> Vec<SimOrder> {
        self.state
            .lock()
            .orders
            .iter()
            .filter(|o| &o.symbol == symbol)
            .cloned()
            .collect()
    }

    /// Signed position size, zero when flat.
    pub fn position_size(&self, symbol: &Symbol) -> Size {
        self.state
            .lock()
            .positions
            .get(symbol)
            .map_or(Size::ZERO, |p| p.size)
    }

    /// Wallet balance excluding unrealized PnL.
    pub fn wallet_balance(&self) -> Usd {
        self.state.lock().wallet
    }

    fn latency(&self) -> Duration {
        self.state.lock().latency
    }

    async fn delay(&self) {
        let latency = self.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn do_open_positions(&self) -> GatewayResult<Vec<Position>> {
        let mut state = self.state.lock();
        state.enter(SimOperation::OpenPositions, None)?;
        Ok(state.open_positions())
    }

    fn do_quote(&self, symbol: &Symbol) -> GatewayResult<Quote> {
        let mut state = self.state.lock();
        state.enter(SimOperation::Quote, Some(symbol))?;
        let instrument = state.instrument(symbol)?;
        Ok(Quote::new(instrument.bid, instrument.ask))
    }

    fn do_place_limit(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        size: Size,
        price: Price,
        time_in_force: TimeInForce,
    ) -> GatewayResult<OrderId> {
        let mut state = self.state.lock();
        state.enter(SimOperation::PlaceLimit, Some(symbol))?;
        state.check_timestamp(symbol)?;
        state.check_precision(symbol, size, Some(price))?;
        let post_only = time_in_force == TimeInForce::PostOnly;

        let instrument = state.instrument(symbol)?;
        let crosses = match side {
            OrderSide::Sell => instrument.bid.is_some_and(|bid| price <= bid),
            OrderSide::Buy => instrument.ask.is_some_and(|ask| price >= ask),
        };

        let id = OrderId::generate();
        let (order_state, filled) = match (crosses, post_only) {
            (true, true) => (OrderState::Expired, Size::ZERO),
            (true, false) => {
                state.apply_fill(symbol, side, size, price);
                (OrderState::Filled, size)
            }
            (false, _) => (OrderState::Open, Size::ZERO),
        };
        debug!(%symbol, %side, %size, %price, %time_in_force, state = %order_state, order_id = %id, "Sim limit order");

        state.orders.push(SimOrder {
            id: id.clone(),
            symbol: symbol.clone(),
            side,
            order_type: OrderType::Limit,
            size,
            price: Some(price),
            time_in_force: Some(time_in_force),
            reduce_only: false,
            state: order_state,
            filled,
        });
        Ok(id)
    }

    fn do_order_status(&self, order_id: &OrderId, symbol: &Symbol) -> GatewayResult<OrderStatus> {
        let mut state = self.state.lock();
        state.enter(SimOperation::OrderStatus, Some(symbol))?;
        let policy = state.instrument(symbol)?.passive_fill;

        let order = state.order_mut(order_id)?.clone();
        if !order.state.is_live() {
            return Ok(OrderStatus::new(order.state, order.filled));
        }

        let unfilled = order.size - order.filled;
        let fill = match policy {
            PassiveFill::Full => unfilled,
            PassiveFill::Rest => Size::ZERO,
            PassiveFill::Partial(qty) if order.filled.is_zero() => qty.min(unfilled),
            PassiveFill::Partial(_) => Size::ZERO,
        };
        if fill.is_positive() {
            let price = order.price.unwrap_or(Price::ZERO);
            state.apply_fill(symbol, order.side, fill, price);
        }

        let order = state.order_mut(order_id)?;
        order.filled = order.filled + fill;
        order.state = if order.filled == order.size {
            OrderState::Filled
        } else if order.filled.is_positive() {
            OrderState::PartiallyFilled
        } else {
            OrderState::Open
        };
        Ok(OrderStatus::new(order.state, order.filled))
    }

    fn do_cancel(&self, order_id: &OrderId, symbol: &Symbol) -> GatewayResult<()> {
        let mut state = self.state.lock();
        state.enter(SimOperation::Cancel, Some(symbol))?;
        state.check_timestamp(symbol)?;
        let order = state.order_mut(order_id)?.clone();
        if !order.state.is_live() {
            return Err(GatewayError::UnknownOrder(format!(
                "{order_id} is already {}",
                order.state
            )));
        }

        let racing = state
            .instruments
            .get_mut(symbol)
            .and_then(|i| i.fill_on_cancel.take());
        let fill = racing.map_or(Size::ZERO, |qty| qty.min(order.size - order.filled));
        if fill.is_positive() {
            let price = order.price.unwrap_or(Price::ZERO);
            state.apply_fill(symbol, order.side, fill, price);
        }

        let order = state.order_mut(order_id)?;
        order.filled = order.filled + fill;
        order.state = if order.filled == order.size {
            OrderState::Filled
        } else {
            OrderState::Cancelled
        };
        debug!(%symbol, order_id = %order_id, filled = %order.filled, state = %order.state, "Sim cancel");
        Ok(())
    }

    fn do_place_market(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        size: Size,
        reduce_only: bool,
    ) -> GatewayResult<OrderId> {
        let mut state = self.state.lock();
        state.enter(SimOperation::PlaceMarket, Some(symbol))?;
        state.check_timestamp(symbol)?;
        state.check_precision(symbol, size, None)?;

        let size = if reduce_only {
            let current = state.positions.get(symbol).map_or(Size::ZERO, |p| p.size);
            let reducible = match side {
                OrderSide::Buy if current.is_negative() => current.abs(),
                OrderSide::Sell if current.is_positive() => current,
                _ => Size::ZERO,
            };
            if reducible.is_zero() {
                return Err(GatewayError::Rejected(format!(
                    "{symbol}: reduce-only {side} order would increase position {current}"
                )));
            }
            if size > reducible {
                debug!(%symbol, requested = %size, %reducible, "Reduce-only order clipped");
            }
            size.min(reducible)
        } else {
            size
        };

        let instrument = state.instrument(symbol)?;
        let touch = match side {
            OrderSide::Sell => instrument.bid,
            OrderSide::Buy => instrument.ask,
        };
        let mark = state.positions.get(symbol).map(|p| p.mark_price);
        let price = touch.or(mark).ok_or_else(|| {
            GatewayError::Rejected(format!("{symbol}: no liquidity for market order"))
        })?;

        state.apply_fill(symbol, side, size, price);
        let id = OrderId::generate();
        debug!(%symbol, %side, %size, %price, reduce_only, order_id = %id, "Sim market order filled");

        state.orders.push(SimOrder {
            id: id.clone(),
            symbol: symbol.clone(),
            side,
            order_type: OrderType::Market,
            size,
            price: None,
            time_in_force: None,
            reduce_only,
            state: OrderState::Filled,
            filled: size,
        });
        Ok(id)
    }

    fn do_balance(&self) -> GatewayResult<Usd> {
        let mut state = self.state.lock();
        state.enter(SimOperation::Balance, None)?;
        Ok(state.margin_balance())
    }

    fn do_server_time(&self) -> GatewayResult<i64> {
        let mut state = self.state.lock();
        state.enter(SimOperation::ServerTime, None)?;
        Ok(Utc::now().timestamp_millis() + state.server_time_offset_ms)
    }

    fn do_set_time_offset(&self, offset_ms: i64) {
        self.state.lock().client_time_offset_ms = offset_ms;
    }
}

impl Gateway for SimGateway {
    fn open_positions(&self) -> BoxFuture<'_, GatewayResult<Vec<Position>>> {
        Box::pin(async move {
            self.delay().await;
            self.do_open_positions()
        })
    }

    fn quote<'a>(&'a self, symbol: &'a Symbol) -> BoxFuture<'a, GatewayResult<Quote>> {
        Box::pin(async move {
            self.delay().await;
            self.do_quote(symbol)
        })
    }

    fn size_to_precision(&self, symbol: &Symbol, size: Size) -> GatewayResult<Size> {
        let mut state = self.state.lock();
        state.enter(SimOperation::Precision, Some(symbol))?;
        Ok(state.instrument(symbol)?.spec.round_size(size))
    }

    fn price_to_precision(&self, symbol: &Symbol, price: Price) -> GatewayResult<Price> {
        let mut state = self.state.lock();
        state.enter(SimOperation::Precision, Some(symbol))?;
        Ok(state.instrument(symbol)?.spec.round_price(price))
    }

    fn place_limit_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        side: OrderSide,
        size: Size,
        price: Price,
        time_in_force: TimeInForce,
    ) -> BoxFuture<'a, GatewayResult<OrderId>> {
        Box::pin(async move {
            self.delay().await;
            self.do_place_limit(symbol, side, size, price, time_in_force)
        })
    }

    fn order_status<'a>(
        &'a self,
        order_id: &'a OrderId,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, GatewayResult<OrderStatus>> {
        Box::pin(async move {
            self.delay().await;
            self.do_order_status(order_id, symbol)
        })
    }

    fn cancel_order<'a>(
        &'a self,
        order_id: &'a OrderId,
        symbol: &'a Symbol,
    ) -> BoxFuture<'a, GatewayResult<()>> {
        Box::pin(async move {
            self.delay().await;
            self.do_cancel(order_id, symbol)
        })
    }

    fn place_market_order<'a>(
        &'a self,
        symbol: &'a Symbol,
        side: OrderSide,
        size: Size,
        reduce_only: bool,
    ) -> BoxFuture<'a, GatewayResult<OrderId>> {
        Box::pin(async move {
            self.delay().await;
            self.do_place_market(symbol, side, size, reduce_only)
        })
    }

    fn balance(&self) -> BoxFuture<'_, GatewayResult<Usd>> {
        Box::pin(async move {
            self.delay().await;
            self.do_balance()
        })
    }

    fn server_time(&self) -> BoxFuture<'_, GatewayResult<i64>> {
        Box::pin(async move {
            self.delay().await;
            self.do_server_time()
        })
    }

    fn set_time_offset_ms(&self, offset_ms: i64) {
        self.do_set_time_offset(offset_ms);
    }
}
