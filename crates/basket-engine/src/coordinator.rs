//! Concurrent liquidation of every open position.
//!
//! One close task per position is spawned and all of them are joined
//! before the outcome is judged. Success is decided by re-fetching the
//! open positions afterwards, not by trusting the per-symbol outcomes.

use std::collections::HashMap;
use std::sync::Arc;

use basket_core::{Position, Size, Symbol, Usd};
use basket_gateway::DynGateway;
use basket_telemetry::Metrics;
use futures_util::future::join_all;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use crate::error::{describe_positions, EngineError, EngineResult};
use crate::executor::{CloseOutcome, CloseReport, ExecutorConfig, OrderExecutor};

/// Verified state of one position after a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionStatus {
    Closed,
    StillOpen { size: Size },
    Error { reason: String },
}

impl PositionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::StillOpen { .. } => "still_open",
            Self::Error { .. } => "error",
        }
    }
}

/// Per-position result of a liquidation run.
#[derive(Debug, Clone)]
pub struct PositionReport {
    pub symbol: Symbol,
    /// Position size when the run started.
    pub initial_size: Size,
    pub close: CloseReport,
    pub status: PositionStatus,
}

/// Outcome of one `close_all` run.
#[derive(Debug, Clone)]
pub struct LiquidationResult {
    pub positions: Vec<PositionReport>,
    /// Positions open after all close attempts finished.
    pub remaining: Vec<Position>,
    /// True iff the verification fetch found no open position.
    pub success: bool,
    /// Margin balance after a successful run.
    pub final_balance: Option<Usd>,
    /// Set when the verification fetch itself failed.
    pub verification_error: Option<String>,
}

impl LiquidationResult {
    pub fn outcome_for(&self, symbol: &Symbol) -> Option<&CloseOutcome> {
        self.positions
            .iter()
            .find(|p| &p.symbol == symbol)
            .map(|p| &p.close.outcome)
    }

    pub fn status_for(&self, symbol: &Symbol) -> Option<&PositionStatus> {
        self.positions
            .iter()
            .find(|p| &p.symbol == symbol)
            .map(|p| &p.status)
    }

    /// `Err(PartialLiquidation)` when anything is left open.
    pub fn ensure_success(&self) -> EngineResult<()> {
        if self.success {
            Ok(())
        } else {
            Err(EngineError::PartialLiquidation {
                remaining: self.remaining.clone(),
            })
        }
    }

    /// Human-readable summary for the notifier.
    pub fn message(&self) -> String {
        if self.success {
            let balance = self
                .final_balance
                .map_or_else(|| "unavailable".to_string(), |b| b.to_string());
            return format!(
                "Auto-close completed. All positions are closed. Final balance: {balance}"
            );
        }

        let mut message = String::from("Auto-close incomplete.");
        if let Some(err) = &self.verification_error {
            message.push_str(&format!(" Could not verify open positions: {err}."));
        }
        if !self.remaining.is_empty() {
            message.push_str(&format!(
                " Still open: {}.",
                describe_positions(&self.remaining)
            ));
        }
        let failures: Vec<String> = self
            .positions
            .iter()
            .filter(|p| p.close.outcome.is_failed())
            .map(|p| format!("{}: {}", p.symbol, p.close.outcome))
            .collect();
        if !failures.is_empty() {
            message.push_str(&format!(" Errors: {}.", failures.join("; ")));
        }
        message
    }
}

/// Fans out close attempts across all open positions.
pub struct LiquidationCoordinator {
    gateway: DynGateway,
    executor: Arc<OrderExecutor>,
    limiter: Option<Arc<Semaphore>>,
}

impl LiquidationCoordinator {
    pub fn new(gateway: DynGateway, config: ExecutorConfig) -> Self {
        let limiter = config
            .max_concurrency
            .filter(|n| *n > 0)
            .map(|n| Arc::new(Semaphore::new(n)));
        Self {
            executor: Arc::new(OrderExecutor::new(gateway.clone(), config)),
            gateway,
            limiter,
        }
    }

    /// Close every open position and verify the result.
    ///
    /// Only the initial position fetch can fail the whole run; everything
    /// after that is reported inside the [`LiquidationResult`].
    pub async fn close_all(&self) -> EngineResult<LiquidationResult> {
        let snapshot: Vec<Position> = self
            .gateway
            .open_positions()
            .await
            .map_err(|e| {
                Metrics::gateway_error("open_positions", e.class());
                Metrics::liquidation_run("error");
                error!(error = %e, "Failed to fetch positions for liquidation");
                EngineError::Gateway(e)
            })?
            .into_iter()
            .filter(Position::is_open)
            .collect();

        info!(
            positions = snapshot.len(),
            symbols = %describe_positions(&snapshot),
            "Liquidation run started"
        );

        let handles: Vec<_> = snapshot
            .iter()
            .cloned()
            .map(|position| {
                let executor = Arc::clone(&self.executor);
                let limiter = self.limiter.clone();
                tokio::spawn(async move {
                    let _permit = match limiter {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };
                    executor.close(&position).await
                })
            })
            .collect();

        let reports: Vec<CloseReport> = join_all(handles)
            .await
            .into_iter()
            .zip(&snapshot)
            .map(|(joined, position)| {
                joined.unwrap_or_else(|e| {
                    error!(symbol = %position.symbol, error = %e, "Close task panicked");
                    CloseReport::task_failed(
                        position.symbol.clone(),
                        format!("close task failed: {e}"),
                    )
                })
            })
            .collect();

        let (remaining, verification_error): (Vec<Position>, Option<String>) =
            match self.gateway.open_positions().await {
                Ok(positions) => (
                    positions.into_iter().filter(Position::is_open).collect(),
                    None,
                ),
                Err(e) => {
                    Metrics::gateway_error("open_positions", e.class());
                    warn!(error = %e, "Failed to re-fetch positions after liquidation");
                    (Vec::new(), Some(e.to_string()))
                }
            };

        let still_open: HashMap<&Symbol, Size> =
            remaining.iter().map(|p| (&p.symbol, p.size)).collect();
        let positions: Vec<PositionReport> = snapshot
            .iter()
            .zip(reports)
            .map(|(position, close)| {
                let status = match (&close.outcome, still_open.get(&position.symbol)) {
                    (CloseOutcome::Failed { .. }, _) => PositionStatus::Error {
                        reason: close.outcome.to_string(),
                    },
                    (_, Some(size)) => PositionStatus::StillOpen { size: *size },
                    (_, None) if verification_error.is_some() => PositionStatus::Error {
                        reason: "not verified".to_string(),
                    },
                    (_, None) => PositionStatus::Closed,
                };
                PositionReport {
                    symbol: position.symbol.clone(),
                    initial_size: position.size,
                    close,
                    status,
                }
            })
            .collect();

        let success = verification_error.is_none() && remaining.is_empty();
        let final_balance = if success {
            match self.gateway.balance().await {
                Ok(balance) => Some(balance),
                Err(e) => {
                    Metrics::gateway_error("balance", e.class());
                    warn!(error = %e, "Failed to fetch final balance");
                    None
                }
            }
        } else {
            None
        };

        Metrics::liquidation_run(if success { "success" } else { "partial" });
        if success {
            info!(
                final_balance = ?final_balance.map(|b| b.to_string()),
                "Liquidation run succeeded, no open positions"
            );
        } else {
            error!(
                remaining = %describe_positions(&remaining),
                verification_error = ?verification_error,
                "Liquidation run left positions open"
            );
        }

        Ok(LiquidationResult {
            positions,
            remaining,
            success,
            final_balance,
            verification_error,
        })
    }
}
