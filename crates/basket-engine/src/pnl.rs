//! Aggregate PnL and take-profit target evaluation.

use basket_core::{TargetSpec, TargetState, Usd};
use basket_gateway::DynGateway;
use basket_telemetry::Metrics;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::{EngineError, EngineResult};

/// Timestamped aggregate PnL, for display history kept elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PnlSample {
    pub at: DateTime<Utc>,
    pub aggregate_pnl: Usd,
}

/// One evaluation of aggregate PnL against the active target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub aggregate_pnl: Usd,
    pub target_pnl: Usd,
    pub balance: Usd,
    pub open_positions: usize,
    pub sample: PnlSample,
}

impl Evaluation {
    /// Threshold check. Inclusive, so exact equality triggers.
    pub fn target_met(&self) -> bool {
        self.aggregate_pnl >= self.target_pnl
    }
}

/// Computes aggregate PnL and the current target from fresh gateway data.
pub struct PnlMonitor {
    gateway: DynGateway,
    target: Mutex<Option<TargetState>>,
    samples: Option<mpsc::Sender<PnlSample>>,
}

impl PnlMonitor {
    pub fn new(gateway: DynGateway) -> Self {
        Self {
            gateway,
            target: Mutex::new(None),
            samples: None,
        }
    }

    /// Emit a [`PnlSample`] to `tx` on every evaluation.
    ///
    /// Samples are dropped when the channel is full.
    pub fn with_sample_sink(mut self, tx: mpsc::Sender<PnlSample>) -> Self {
        self.samples = Some(tx);
        self
    }

    /// Target state from the last successful evaluation.
    pub fn target_state(&self) -> Option<TargetState> {
        *self.target.lock()
    }

    /// Fetch positions and balance, then compare aggregate PnL with the
    /// target derived from `spec`.
    pub async fn evaluate(&self, spec: &TargetSpec) -> EngineResult<Evaluation> {
        let positions = self.gateway.open_positions().await.map_err(|e| {
            Metrics::gateway_error("open_positions", e.class());
            EngineError::Gateway(e)
        })?;
        let balance = self.gateway.balance().await.map_err(|e| {
            Metrics::gateway_error("balance", e.class());
            EngineError::Gateway(e)
        })?;

        let open: Vec<_> = positions.iter().filter(|p| p.is_open()).collect();
        let aggregate_pnl: Usd = open.iter().map(|p| p.unrealized_pnl).sum();
        let target_pnl = self.update_target(spec, balance)?;

        let sample = PnlSample {
            at: Utc::now(),
            aggregate_pnl,
        };
        self.emit(sample);

        Metrics::pnl_evaluated(
            aggregate_pnl.to_f64(),
            target_pnl.to_f64(),
            balance.to_f64(),
            open.len(),
        );
        debug!(
            aggregate_pnl = %aggregate_pnl,
            target_pnl = %target_pnl,
            balance = %balance,
            open_positions = open.len(),
            "PnL evaluated"
        );

        Ok(Evaluation {
            aggregate_pnl,
            target_pnl,
            balance,
            open_positions: open.len(),
            sample,
        })
    }

    /// Select the spec if it changed, otherwise refresh against the new
    /// balance.
    fn update_target(&self, spec: &TargetSpec, balance: Usd) -> EngineResult<Usd> {
        let mut guard = self.target.lock();
        if let Some(state) = guard.as_mut().filter(|s| s.spec() == *spec) {
            if state.refresh(balance) {
                debug!(target_pnl = %state.target_pnl(), "Target recomputed for new balance");
            }
            return Ok(state.target_pnl());
        }

        let state = TargetState::select(*spec, balance)?;
        debug!(
            mode = %spec.mode(),
            target = %spec,
            target_pnl = %state.target_pnl(),
            "Target selected"
        );
        *guard = Some(state);
        Ok(state.target_pnl())
    }

    fn emit(&self, sample: PnlSample) {
        let Some(tx) = &self.samples else {
            return;
        };
        match tx.try_send(sample) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("PnL sample sink full, dropping sample");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("PnL sample sink closed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use basket_core::{Price, Size, Symbol};
    use basket_gateway::{GatewayError, SimGateway, SimOperation};
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    /// Wallet 1000, BTC long +60, ETH short -10.
    fn sim() -> Arc<SimGateway> {
        let sim = Arc::new(SimGateway::with_balance(Usd::new(dec!(1000))));
        sim.open_position(
            "BTCUSDT",
            Size::new(dec!(0.5)),
            Price::new(dec!(60000)),
            Price::new(dec!(60120)),
        );
        sim.open_position(
            "ETHUSDT",
            Size::new(dec!(-1)),
            Price::new(dec!(3000)),
            Price::new(dec!(3010)),
        );
        sim
    }

    #[tokio::test]
    async fn test_aggregate_is_sum_of_unrealized() {
        let monitor = PnlMonitor::new(sim());
        let eval = monitor
            .evaluate(&TargetSpec::FixedAmount(Usd::new(dec!(100))))
            .await
            .unwrap();

        assert_eq!(eval.aggregate_pnl, Usd::new(dec!(50)));
        assert_eq!(eval.target_pnl, Usd::new(dec!(100)));
        assert_eq!(eval.balance, Usd::new(dec!(1050)));
        assert_eq!(eval.open_positions, 2);
        assert!(!eval.target_met());
    }

    #[tokio::test]
    async fn test_no_positions_is_zero_pnl() {
        let monitor = PnlMonitor::new(Arc::new(SimGateway::with_balance(Usd::new(dec!(1000)))));
        let eval = monitor
            .evaluate(&TargetSpec::PercentOfBalance(dec!(10)))
            .await
            .unwrap();
        assert_eq!(eval.aggregate_pnl, Usd::ZERO);
        assert_eq!(eval.target_pnl, Usd::new(dec!(100)));
    }

    #[tokio::test]
    async fn test_boundary_is_inclusive() {
        let sim = sim();
        sim.set_unrealized_pnl(&Symbol::new("BTCUSDT"), Usd::new(dec!(110)));
        let monitor = PnlMonitor::new(sim);
        // BTC +110, ETH -10: exactly 100
        let eval = monitor
            .evaluate(&TargetSpec::FixedAmount(Usd::new(dec!(100))))
            .await
            .unwrap();
        assert_eq!(eval.aggregate_pnl, Usd::new(dec!(100)));
        assert!(eval.target_met());
    }

    #[tokio::test]
    async fn test_percent_target_follows_balance() {
        let sim = sim();
        let monitor = PnlMonitor::new(sim.clone());
        let spec = TargetSpec::PercentOfBalance(dec!(10));

        let first = monitor.evaluate(&spec).await.unwrap();
        assert_eq!(first.target_pnl, Usd::new(dec!(105)));

        sim.set_unrealized_pnl(&Symbol::new("BTCUSDT"), Usd::new(dec!(210)));
        let second = monitor.evaluate(&spec).await.unwrap();
        // Balance 1000 + 210 - 10 = 1200
        assert_eq!(second.target_pnl, Usd::new(dec!(120)));
    }

    #[tokio::test]
    async fn test_spec_switch_recomputes() {
        let monitor = PnlMonitor::new(sim());
        monitor
            .evaluate(&TargetSpec::FixedAmount(Usd::new(dec!(25))))
            .await
            .unwrap();
        let eval = monitor
            .evaluate(&TargetSpec::TargetBalance(Usd::new(dec!(1100))))
            .await
            .unwrap();
        assert_eq!(eval.target_pnl, Usd::new(dec!(50)));
        assert_eq!(
            monitor.target_state().map(|s| s.spec()),
            Some(TargetSpec::TargetBalance(Usd::new(dec!(1100))))
        );
    }

    #[tokio::test]
    async fn test_invalid_spec_is_configuration_error() {
        let monitor = PnlMonitor::new(sim());
        let result = monitor
            .evaluate(&TargetSpec::FixedAmount(Usd::new(dec!(-5))))
            .await;
        assert!(matches!(result, Err(EngineError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_gateway_failure_propagates() {
        let sim = sim();
        sim.fail_next(SimOperation::Balance, GatewayError::Timeout("balance".into()));
        let monitor = PnlMonitor::new(sim);
        let result = monitor
            .evaluate(&TargetSpec::FixedAmount(Usd::new(dec!(100))))
            .await;
        assert!(matches!(result, Err(EngineError::Gateway(GatewayError::Timeout(_)))));
    }

    #[tokio::test]
    async fn test_samples_emitted_and_dropped_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let monitor = PnlMonitor::new(sim()).with_sample_sink(tx);
        let spec = TargetSpec::FixedAmount(Usd::new(dec!(100)));

        monitor.evaluate(&spec).await.unwrap();
        // Channel full: second sample is dropped, evaluation still succeeds
        monitor.evaluate(&spec).await.unwrap();

        let sample = rx.recv().await.unwrap();
        assert_eq!(sample.aggregate_pnl, Usd::new(dec!(50)));
        assert!(rx.try_recv().is_err());
    }
}
