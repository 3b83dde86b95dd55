//! Single-position close sequence.
//!
//! Closing one position goes through two tiers:
//! 1. A post-only limit order on the passive side of the book (sell at the
//!    ask, buy at the bid), given a fixed grace period to fill.
//! 2. If it has not filled: cancel it, then send a market order for the
//!    unfilled remainder.
//!
//! Each symbol's limit -> cancel -> market steps run strictly in order.
//! Every gateway error is converted into a [`CloseOutcome::Failed`] for
//! that symbol, so a failure never escapes into sibling closes.

use std::fmt;
use std::time::Duration;

use basket_core::{OrderId, OrderSide, OrderType, Position, Price, Size, Symbol, TimeInForce};
use basket_gateway::{DynGateway, GatewayError};
use basket_telemetry::Metrics;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default fill grace period for the passive order: 10 seconds.
pub const DEFAULT_FILL_GRACE: Duration = Duration::from_secs(10);

/// Executor settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorConfig {
    /// How long a passive order may rest before escalating to market.
    pub fill_grace: Duration,
    /// Maximum number of symbols closed at once. `None` = one task per
    /// open position.
    pub max_concurrency: Option<usize>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            fill_grace: DEFAULT_FILL_GRACE,
            max_concurrency: None,
        }
    }
}

/// Step of the close sequence, used to label failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CloseStage {
    Precision,
    Quote,
    PlaceLimit,
    OrderStatus,
    Cancel,
    PlaceMarket,
    /// The close task itself failed (panic or abort).
    Task,
}

impl CloseStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Precision => "precision",
            Self::Quote => "quote",
            Self::PlaceLimit => "place_limit",
            Self::OrderStatus => "order_status",
            Self::Cancel => "cancel",
            Self::PlaceMarket => "place_market",
            Self::Task => "task",
        }
    }
}

impl fmt::Display for CloseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one order submitted during a close attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOrderStatus {
    Pending,
    Filled,
    Cancelled,
    Failed,
}

/// An order submitted while closing a position.
///
/// Owned and mutated only by the executor for the duration of one close
/// attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseOrder {
    pub symbol: Symbol,
    pub side: OrderSide,
    pub size: Size,
    pub order_type: OrderType,
    /// Limit price; `None` for market orders.
    pub price: Option<Price>,
    pub order_id: Option<OrderId>,
    pub status: CloseOrderStatus,
}

impl CloseOrder {
    fn limit(symbol: &Symbol, side: OrderSide, size: Size, price: Price) -> Self {
        Self {
            symbol: symbol.clone(),
            side,
            size,
            order_type: OrderType::Limit,
            price: Some(price),
            order_id: None,
            status: CloseOrderStatus::Pending,
        }
    }

    fn market(symbol: &Symbol, side: OrderSide, size: Size) -> Self {
        Self {
            symbol: symbol.clone(),
            side,
            size,
            order_type: OrderType::Market,
            price: None,
            order_id: None,
            status: CloseOrderStatus::Pending,
        }
    }
}

/// Result of closing one position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseOutcome {
    /// Nothing to close (flat, or below one lot after rounding).
    AlreadyClosed,
    /// The passive limit order filled within the grace period.
    FilledViaLimit,
    /// The market fallback order filled.
    FilledViaMarket,
    /// A gateway call failed; the position may still be open.
    Failed { stage: CloseStage, reason: String },
}

impl CloseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AlreadyClosed => "already_closed",
            Self::FilledViaLimit => "filled_via_limit",
            Self::FilledViaMarket => "filled_via_market",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

impl fmt::Display for CloseOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { stage, reason } => write!(f, "{stage} failed: {reason}"),
            other => f.write_str(other.as_str()),
        }
    }
}

/// Everything that happened while closing one position.
#[derive(Debug, Clone)]
pub struct CloseReport {
    pub symbol: Symbol,
    pub outcome: CloseOutcome,
    /// Orders submitted, in submission order.
    pub orders: Vec<CloseOrder>,
    pub elapsed: Duration,
}

impl CloseReport {
    /// Report for a close task that never produced its own report.
    pub fn task_failed(symbol: Symbol, reason: String) -> Self {
        Self {
            symbol,
            outcome: CloseOutcome::Failed {
                stage: CloseStage::Task,
                reason,
            },
            orders: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }
}

type StepResult<T> = Result<T, (CloseStage, GatewayError)>;

/// Closes single positions through the gateway.
pub struct OrderExecutor {
    gateway: DynGateway,
    config: ExecutorConfig,
}

impl OrderExecutor {
    pub fn new(gateway: DynGateway, config: ExecutorConfig) -> Self {
        Self { gateway, config }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Close one position. Never fails; errors become the outcome.
    pub async fn close(&self, position: &Position) -> CloseReport {
        let started = Instant::now();
        let mut orders = Vec::new();

        let outcome = match self.run(position, &mut orders).await {
            Ok(outcome) => outcome,
            Err((stage, err)) => {
                warn!(
                    symbol = %position.symbol,
                    stage = %stage,
                    error = %err,
                    transient = err.is_transient(),
                    "Close attempt failed"
                );
                Metrics::gateway_error(stage.as_str(), err.class());
                CloseOutcome::Failed {
                    stage,
                    reason: err.to_string(),
                }
            }
        };

        let elapsed = started.elapsed();
        Metrics::close_outcome(
            position.symbol.as_str(),
            outcome.as_str(),
            elapsed.as_secs_f64(),
        );
        info!(
            symbol = %position.symbol,
            outcome = %outcome,
            elapsed_ms = elapsed.as_millis() as u64,
            "Close attempt finished"
        );

        CloseReport {
            symbol: position.symbol.clone(),
            outcome,
            orders,
            elapsed,
        }
    }

    async fn run(
        &self,
        position: &Position,
        orders: &mut Vec<CloseOrder>,
    ) -> StepResult<CloseOutcome> {
        let symbol = &position.symbol;
        let Some(side) = position.closing_side() else {
            debug!(symbol = %symbol, "Position is flat, nothing to close");
            return Ok(CloseOutcome::AlreadyClosed);
        };

        let size = self
            .gateway
            .size_to_precision(symbol, position.close_quantity())
            .map_err(|e| (CloseStage::Precision, e))?;
        if size.is_zero() {
            debug!(
                symbol = %symbol,
                raw_size = %position.close_quantity(),
                "Close quantity rounds to zero, treating as closed"
            );
            return Ok(CloseOutcome::AlreadyClosed);
        }

        let quote = self
            .gateway
            .quote(symbol)
            .await
            .map_err(|e| (CloseStage::Quote, e))?;

        let Some(passive) = quote.passive_price(side) else {
            info!(
                symbol = %symbol,
                %side,
                quote_state = %quote.state(),
                "No passive liquidity, going straight to market"
            );
            return self.market(symbol, side, size, orders).await;
        };
        let price = self
            .gateway
            .price_to_precision(symbol, passive)
            .map_err(|e| (CloseStage::Precision, e))?;

        // Tier 1: post-only limit
        orders.push(CloseOrder::limit(symbol, side, size, price));
        let limit_idx = orders.len() - 1;
        let order_id = match self
            .gateway
            .place_limit_order(symbol, side, size, price, TimeInForce::PostOnly)
            .await
        {
            Ok(id) => id,
            Err(e) => {
                orders[limit_idx].status = CloseOrderStatus::Failed;
                return Err((CloseStage::PlaceLimit, e));
            }
        };
        orders[limit_idx].order_id = Some(order_id.clone());
        info!(
            symbol = %symbol,
            %side,
            %size,
            %price,
            order_id = %order_id,
            grace_ms = self.config.fill_grace.as_millis() as u64,
            "Passive close order placed"
        );

        tokio::time::sleep(self.config.fill_grace).await;

        let status = self
            .gateway
            .order_status(&order_id, symbol)
            .await
            .map_err(|e| (CloseStage::OrderStatus, e))?;

        if status.is_filled() {
            orders[limit_idx].status = CloseOrderStatus::Filled;
            return Ok(CloseOutcome::FilledViaLimit);
        }

        // Tier 2: cancel, then market for the remainder
        let status = if status.state.is_live() {
            if let Err(e) = self.gateway.cancel_order(&order_id, symbol).await {
                orders[limit_idx].status = CloseOrderStatus::Failed;
                return Err((CloseStage::Cancel, e));
            }
            // Fills can land between the status read and the cancel
            let settled = self
                .gateway
                .order_status(&order_id, symbol)
                .await
                .map_err(|e| (CloseStage::OrderStatus, e))?;
            debug!(
                symbol = %symbol,
                order_id = %order_id,
                filled = %settled.filled,
                "Passive close order cancelled"
            );
            settled
        } else {
            debug!(
                symbol = %symbol,
                order_id = %order_id,
                state = %status.state,
                "Passive close order no longer live, skipping cancel"
            );
            status
        };

        if status.is_filled() {
            orders[limit_idx].status = CloseOrderStatus::Filled;
            return Ok(CloseOutcome::FilledViaLimit);
        }
        orders[limit_idx].status = CloseOrderStatus::Cancelled;

        let remaining = self
            .gateway
            .size_to_precision(symbol, size - status.filled)
            .map_err(|e| (CloseStage::Precision, e))?;
        if !remaining.is_positive() {
            debug!(
                symbol = %symbol,
                filled = %status.filled,
                "Remainder rounds to zero after partial fill"
            );
            return Ok(CloseOutcome::FilledViaLimit);
        }

        info!(
            symbol = %symbol,
            filled = %status.filled,
            %remaining,
            "Passive order not filled within grace period, falling back to market"
        );
        self.market(symbol, side, remaining, orders).await
    }

    async fn market(
        &self,
        symbol: &Symbol,
        side: OrderSide,
        size: Size,
        orders: &mut Vec<CloseOrder>,
    ) -> StepResult<CloseOutcome> {
        orders.push(CloseOrder::market(symbol, side, size));
        let idx = orders.len() - 1;
        match self.gateway.place_market_order(symbol, side, size, true).await {
            Ok(order_id) => {
                info!(symbol = %symbol, %side, %size, order_id = %order_id, "Market close order filled");
                orders[idx].order_id = Some(order_id);
                orders[idx].status = CloseOrderStatus::Filled;
                Ok(CloseOutcome::FilledViaMarket)
            }
            Err(e) => {
                orders[idx].status = CloseOrderStatus::Failed;
                Err((CloseStage::PlaceMarket, e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_core::{InstrumentSpec, OrderState, Usd};
    use basket_gateway::{PassiveFill, SimGateway, SimOperation};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn btc() -> Symbol {
        Symbol::new("BTCUSDT")
    }

    fn setup(size: rust_decimal::Decimal) -> (Arc<SimGateway>, OrderExecutor, Position) {
        let sim = Arc::new(SimGateway::with_balance(Usd::new(dec!(1000))));
        sim.add_instrument(
            btc(),
            InstrumentSpec::from_decimals(1, 3),
            Some(Price::new(dec!(60090))),
            Some(Price::new(dec!(60110))),
        );
        sim.open_position(
            btc(),
            Size::new(size),
            Price::new(dec!(60000)),
            Price::new(dec!(60100)),
        );
        let executor = OrderExecutor::new(sim.clone(), ExecutorConfig::default());
        let position = Position::new(btc(), Size::new(size), Usd::ZERO);
        (sim, executor, position)
    }

    #[tokio::test(start_paused = true)]
    async fn test_filled_limit_never_places_market() {
        let (sim, executor, position) = setup(dec!(0.5));

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaLimit);
        assert_eq!(sim.call_count(SimOperation::Cancel), 0);
        assert_eq!(sim.call_count(SimOperation::PlaceMarket), 0);
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].status, CloseOrderStatus::Filled);
        // Closing a long sells at the ask
        assert_eq!(report.orders[0].side, OrderSide::Sell);
        assert_eq!(report.orders[0].price, Some(Price::new(dec!(60110))));
        assert!(sim.position_size(&btc()).is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unfilled_limit_cancels_once_then_market_once() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.set_passive_fill(&btc(), PassiveFill::Rest);

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaMarket);
        assert_eq!(
            sim.calls_for(&btc()),
            vec![
                SimOperation::Precision,
                SimOperation::Quote,
                SimOperation::Precision,
                SimOperation::PlaceLimit,
                SimOperation::OrderStatus,
                SimOperation::Cancel,
                SimOperation::OrderStatus,
                SimOperation::Precision,
                SimOperation::PlaceMarket,
            ]
        );
        assert_eq!(report.orders[0].status, CloseOrderStatus::Cancelled);
        assert_eq!(report.orders[1].order_type, OrderType::Market);
        assert_eq!(report.orders[1].size, Size::new(dec!(0.5)));
        assert!(sim.position_size(&btc()).is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_full_grace_period() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.set_passive_fill(&btc(), PassiveFill::Rest);

        let started = Instant::now();
        executor.close(&position).await;
        assert!(started.elapsed() >= DEFAULT_FILL_GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_fill_markets_remainder() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.set_passive_fill(&btc(), PassiveFill::Partial(Size::new(dec!(0.2))));

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaMarket);
        assert_eq!(report.orders[1].size, Size::new(dec!(0.3)));
        assert!(sim.position_size(&btc()).is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fill_during_cancel_markets_only_the_rest() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.set_passive_fill(&btc(), PassiveFill::Rest);
        sim.set_fill_on_cancel(&btc(), Size::new(dec!(0.3)));

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaMarket);
        assert_eq!(report.orders[1].size, Size::new(dec!(0.2)));
        assert!(sim.position_size(&btc()).is_zero());
        let market = &sim.orders_for(&btc())[1];
        assert!(market.reduce_only);
        assert_eq!(market.filled, Size::new(dec!(0.2)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_fill_during_cancel_skips_market() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.set_passive_fill(&btc(), PassiveFill::Rest);
        sim.set_fill_on_cancel(&btc(), Size::new(dec!(0.5)));

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaLimit);
        assert_eq!(report.orders.len(), 1);
        assert_eq!(report.orders[0].status, CloseOrderStatus::Filled);
        assert_eq!(sim.call_count(SimOperation::PlaceMarket), 0);
        assert!(sim.position_size(&btc()).is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_position_buys_at_bid() {
        let (sim, executor, position) = setup(dec!(-1.25));

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaLimit);
        assert_eq!(report.orders[0].side, OrderSide::Buy);
        assert_eq!(report.orders[0].price, Some(Price::new(dec!(60090))));
        assert!(sim.position_size(&btc()).is_zero());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dust_quantity_is_already_closed() {
        let (sim, executor, _) = setup(dec!(0.0004));
        let position = Position::new(btc(), Size::new(dec!(0.0004)), Usd::ZERO);

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::AlreadyClosed);
        assert_eq!(sim.call_count(SimOperation::PlaceLimit), 0);
        assert_eq!(sim.call_count(SimOperation::PlaceMarket), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_passive_side_goes_straight_to_market() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.set_quote(&btc(), Some(Price::new(dec!(60090))), None);

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaMarket);
        assert_eq!(sim.call_count(SimOperation::PlaceLimit), 0);
        assert_eq!(report.orders.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_failure_skips_market() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.set_passive_fill(&btc(), PassiveFill::Rest);
        sim.fail_next_for(
            SimOperation::Cancel,
            &btc(),
            GatewayError::Rejected("order is being processed".into()),
        );

        let report = executor.close(&position).await;

        assert!(matches!(
            report.outcome,
            CloseOutcome::Failed {
                stage: CloseStage::Cancel,
                ..
            }
        ));
        assert_eq!(sim.call_count(SimOperation::PlaceMarket), 0);
        assert_eq!(sim.position_size(&btc()), Size::new(dec!(0.5)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_post_only_skips_cancel() {
        let (sim, executor, position) = setup(dec!(0.5));
        // Book moves so the ask is at or below the bid: post-only would cross
        sim.set_quote(&btc(), Some(Price::new(dec!(60120))), Some(Price::new(dec!(60110))));

        let report = executor.close(&position).await;

        assert_eq!(report.outcome, CloseOutcome::FilledViaMarket);
        assert_eq!(sim.call_count(SimOperation::Cancel), 0);
        let orders = sim.orders_for(&btc());
        assert_eq!(orders[0].state, OrderState::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_is_reported_not_raised() {
        let (sim, executor, position) = setup(dec!(0.5));
        sim.fail_next_for(
            SimOperation::Quote,
            &btc(),
            GatewayError::RateLimited("429".into()),
        );

        let report = executor.close(&position).await;

        match report.outcome {
            CloseOutcome::Failed { stage, reason } => {
                assert_eq!(stage, CloseStage::Quote);
                assert!(reason.contains("429"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(report.orders.is_empty());
    }
}
