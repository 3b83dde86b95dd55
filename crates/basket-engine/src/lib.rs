//! Liquidation engine for basket-close.
//!
//! Components, leaves first:
//! - `OrderExecutor`: closes one position (post-only limit, then market)
//! - `LiquidationCoordinator`: closes every open position concurrently and
//!   verifies the result
//! - `PnlMonitor`: aggregate PnL against the active take-profit target
//! - `ThresholdController`: polling state machine that triggers liquidation
//!   at most once
//! - `Notifier`: plain-text sink for status and result messages

pub mod controller;
pub mod coordinator;
pub mod error;
pub mod executor;
pub mod notifier;
pub mod pnl;

pub use controller::{
    ControllerState, MonitorSettings, NotificationSettings, SettingsHandle, ThresholdController,
    TriggerLatch, DEFAULT_NOTIFICATION_INTERVAL, DEFAULT_POLL_INTERVAL,
    MAX_NOTIFICATION_INTERVAL, MIN_NOTIFICATION_INTERVAL,
};
pub use coordinator::{LiquidationCoordinator, LiquidationResult, PositionReport, PositionStatus};
pub use error::{EngineError, EngineResult};
pub use executor::{
    CloseOrder, CloseOrderStatus, CloseOutcome, CloseReport, CloseStage, ExecutorConfig,
    OrderExecutor, DEFAULT_FILL_GRACE,
};
pub use notifier::{DynNotifier, LogNotifier, Notifier, RecordingNotifier};
pub use pnl::{Evaluation, PnlMonitor, PnlSample};
