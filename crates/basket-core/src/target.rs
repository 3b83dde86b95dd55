//! Take-profit target modes.
//!
//! The operator picks exactly one target mode. The PnL figure that must be
//! reached (`target_pnl`) is derived from the mode's parameter and the
//! current margin balance.

use crate::{CoreError, Usd};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Discriminant of [`TargetSpec`], used for labels and mode-switch detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetMode {
    FixedAmount,
    PercentOfBalance,
    TargetBalance,
}

impl TargetMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FixedAmount => "fixed_amount",
            Self::PercentOfBalance => "percent_of_balance",
            Self::TargetBalance => "target_balance",
        }
    }
}

impl fmt::Display for TargetMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Take-profit target specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "value", rename_all = "snake_case")]
pub enum TargetSpec {
    /// Close once aggregate PnL reaches a fixed amount.
    FixedAmount(Usd),
    /// Close once aggregate PnL reaches a percentage of the margin balance.
    PercentOfBalance(Decimal),
    /// Close once the margin balance would reach a desired absolute value.
    TargetBalance(Usd),
}

impl TargetSpec {
    pub fn mode(&self) -> TargetMode {
        match self {
            Self::FixedAmount(_) => TargetMode::FixedAmount,
            Self::PercentOfBalance(_) => TargetMode::PercentOfBalance,
            Self::TargetBalance(_) => TargetMode::TargetBalance,
        }
    }

    /// Whether the target moves with the margin balance.
    pub fn depends_on_balance(&self) -> bool {
        !matches!(self, Self::FixedAmount(_))
    }

    /// Reject parameters that can never describe a take-profit.
    ///
    /// - FixedAmount: amount > 0
    /// - PercentOfBalance: 0 < percent <= 100
    /// - TargetBalance: desired balance > 0
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Self::FixedAmount(amount) if !amount.is_positive() => Err(CoreError::InvalidTarget(
                format!("fixed target must be positive, got {amount}"),
            )),
            Self::PercentOfBalance(pct) if *pct <= Decimal::ZERO || *pct > Decimal::ONE_HUNDRED => {
                Err(CoreError::InvalidTarget(format!(
                    "percent of balance must be in (0, 100], got {pct}"
                )))
            }
            Self::TargetBalance(balance) if !balance.is_positive() => {
                Err(CoreError::InvalidTarget(format!(
                    "target balance must be positive, got {balance}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// PnL required to hit this target given the current margin balance.
    ///
    /// Pure: depends only on the spec parameter and `margin_balance`.
    /// A TargetBalance already below the balance yields a negative target,
    /// which is met immediately.
    pub fn target_pnl(&self, margin_balance: Usd) -> Usd {
        match self {
            Self::FixedAmount(amount) => *amount,
            Self::PercentOfBalance(pct) => margin_balance.percent(*pct),
            Self::TargetBalance(desired) => *desired - margin_balance,
        }
    }
}

impl fmt::Display for TargetSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FixedAmount(amount) => write!(f, "fixed {amount}"),
            Self::PercentOfBalance(pct) => write!(f, "{pct}% of balance"),
            Self::TargetBalance(balance) => write!(f, "balance {balance}"),
        }
    }
}

/// Active target spec together with its derived PnL target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetState {
    spec: TargetSpec,
    target_pnl: Usd,
    /// Balance the current `target_pnl` was computed from.
    balance: Usd,
}

impl TargetState {
    /// Select a target spec and compute its PnL target.
    pub fn select(spec: TargetSpec, margin_balance: Usd) -> Result<Self, CoreError> {
        spec.validate()?;
        Ok(Self {
            spec,
            target_pnl: spec.target_pnl(margin_balance),
            balance: margin_balance,
        })
    }

    /// Switch to another spec. Always recomputes, even if only the
    /// parameter changed.
    pub fn switch(&mut self, spec: TargetSpec, margin_balance: Usd) -> Result<(), CoreError> {
        *self = Self::select(spec, margin_balance)?;
        Ok(())
    }

    /// Recompute after a balance change.
    ///
    /// Returns true if the derived target changed.
    pub fn refresh(&mut self, margin_balance: Usd) -> bool {
        self.balance = margin_balance;
        let next = self.spec.target_pnl(margin_balance);
        let changed = next != self.target_pnl;
        self.target_pnl = next;
        changed
    }

    pub fn spec(&self) -> TargetSpec {
        self.spec
    }

    pub fn target_pnl(&self) -> Usd {
        self.target_pnl
    }

    pub fn balance(&self) -> Usd {
        self.balance
    }
}
