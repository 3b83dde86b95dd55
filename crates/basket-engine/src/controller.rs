//! Take-profit decision loop.
//!
//! State machine: `Idle -> Monitoring -> Triggering -> Done`.
//!
//! - `Idle`: auto-close disabled, no polling.
//! - `Monitoring`: every poll interval, evaluate aggregate PnL and compare
//!   `aggregate_pnl >= target_pnl`. Periodic status messages go to the
//!   notifier.
//! - `Triggering`: a single liquidation run is in flight.
//! - `Done`: the run finished and was reported. No polling until the
//!   operator disables and re-enables auto-close, or calls `restart`.
//!
//! The liquidation trigger is latched: at most one run per arming, even
//! if cycles overlap.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use basket_core::TargetSpec;
use basket_gateway::{ClockSync, DynGateway};
use basket_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::coordinator::{LiquidationCoordinator, LiquidationResult};
use crate::error::{EngineError, EngineResult};
use crate::executor::ExecutorConfig;
use crate::notifier::DynNotifier;
use crate::pnl::{Evaluation, PnlMonitor, PnlSample};

/// Default polling interval: 5 seconds.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Default status notification interval: 30 seconds.
pub const DEFAULT_NOTIFICATION_INTERVAL: Duration = Duration::from_secs(30);

/// Allowed status notification interval range.
pub const MIN_NOTIFICATION_INTERVAL: Duration = Duration::from_secs(5);
pub const MAX_NOTIFICATION_INTERVAL: Duration = Duration::from_secs(3600);

// ============================================================================
// Settings
// ============================================================================

/// Periodic status message settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotificationSettings {
    pub enabled: bool,
    pub interval: Duration,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_NOTIFICATION_INTERVAL,
        }
    }
}

/// Operator configuration read by the controller once per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Auto-close enabled.
    pub enabled: bool,
    pub target: TargetSpec,
    pub poll_interval: Duration,
    pub notifications: NotificationSettings,
}

impl MonitorSettings {
    /// Disabled settings with default intervals.
    pub fn new(target: TargetSpec) -> Self {
        Self {
            enabled: false,
            target,
            poll_interval: DEFAULT_POLL_INTERVAL,
            notifications: NotificationSettings::default(),
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.target.validate()?;
        if self.poll_interval.is_zero() {
            return Err(EngineError::Configuration(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        let interval = self.notifications.interval;
        if !(MIN_NOTIFICATION_INTERVAL..=MAX_NOTIFICATION_INTERVAL).contains(&interval) {
            return Err(EngineError::Configuration(format!(
                "notification interval must be within {}..={} seconds, got {}",
                MIN_NOTIFICATION_INTERVAL.as_secs(),
                MAX_NOTIFICATION_INTERVAL.as_secs(),
                interval.as_secs()
            )));
        }
        Ok(())
    }
}

/// Process-wide holder of [`MonitorSettings`].
///
/// Cloning shares the same settings. Writers go through `update`, which
/// refuses invalid settings.
#[derive(Debug, Clone)]
pub struct SettingsHandle {
    inner: Arc<RwLock<MonitorSettings>>,
}

impl SettingsHandle {
    /// Wrap initial settings. Not validated here; the controller validates
    /// before it starts monitoring.
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    pub fn snapshot(&self) -> MonitorSettings {
        *self.inner.read()
    }

    /// Replace the settings. Invalid settings are rejected and the previous
    /// ones stay in effect.
    pub fn update(&self, settings: MonitorSettings) -> EngineResult<()> {
        settings.validate()?;
        let mut guard = self.inner.write();
        if *guard != settings {
            info!(
                enabled = settings.enabled,
                target = %settings.target,
                poll_interval_ms = settings.poll_interval.as_millis() as u64,
                notifications = settings.notifications.enabled,
                "Monitor settings updated"
            );
        }
        *guard = settings;
        Ok(())
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.inner.write().enabled = enabled;
    }
}

// ============================================================================
// TriggerLatch
// ============================================================================

/// One-shot liquidation trigger.
///
/// Once fired, stays fired until `reset`.
#[derive(Debug, Default)]
pub struct TriggerLatch {
    fired: AtomicBool,
}

impl TriggerLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the latch. Returns true only for the caller that fired it.
    #[must_use]
    pub fn try_fire(&self) -> bool {
        self.fired
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    #[must_use]
    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.fired.store(false, Ordering::SeqCst);
    }
}

// ============================================================================
// ThresholdController
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ControllerState {
    Idle,
    Monitoring,
    Triggering,
    Done,
}

impl ControllerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Monitoring => "monitoring",
            Self::Triggering => "triggering",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
struct ControllerInner {
    state: ControllerState,
    /// When the last status message was sent (or monitoring started).
    last_status_at: Instant,
    /// Set while consecutive evaluations fail; the failure is notified once.
    evaluation_failing: bool,
    /// Last configuration error reported, to avoid repeating it every cycle.
    rejected_config: Option<String>,
    last_result: Option<LiquidationResult>,
}

/// Polls PnL and triggers liquidation once the target is reached.
pub struct ThresholdController {
    gateway: DynGateway,
    monitor: PnlMonitor,
    coordinator: LiquidationCoordinator,
    notifier: DynNotifier,
    settings: SettingsHandle,
    clock: Arc<ClockSync>,
    latch: TriggerLatch,
    inner: Mutex<ControllerInner>,
}

impl ThresholdController {
    pub fn new(gateway: DynGateway, settings: SettingsHandle, notifier: DynNotifier) -> Self {
        Self {
            monitor: PnlMonitor::new(gateway.clone()),
            coordinator: LiquidationCoordinator::new(gateway.clone(), ExecutorConfig::default()),
            gateway,
            notifier,
            settings,
            clock: Arc::new(ClockSync::default()),
            latch: TriggerLatch::new(),
            inner: Mutex::new(ControllerInner {
                state: ControllerState::Idle,
                last_status_at: Instant::now(),
                evaluation_failing: false,
                rejected_config: None,
                last_result: None,
            }),
        }
    }

    pub fn with_executor_config(mut self, config: ExecutorConfig) -> Self {
        self.coordinator = LiquidationCoordinator::new(self.gateway.clone(), config);
        self
    }

    pub fn with_clock(mut self, clock: Arc<ClockSync>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_sample_sink(mut self, tx: mpsc::Sender<PnlSample>) -> Self {
        self.monitor = PnlMonitor::new(self.gateway.clone()).with_sample_sink(tx);
        self
    }

    pub fn state(&self) -> ControllerState {
        self.inner.lock().state
    }

    pub fn settings(&self) -> &SettingsHandle {
        &self.settings
    }

    /// Result of the last completed liquidation run.
    pub fn last_result(&self) -> Option<LiquidationResult> {
        self.inner.lock().last_result.clone()
    }

    /// Re-arm after `Done`: back to `Idle` with the trigger latch reset.
    pub fn restart(&self) -> EngineResult<()> {
        let state = self.state();
        match state {
            ControllerState::Done | ControllerState::Idle => {
                self.latch.reset();
                self.transition(ControllerState::Idle);
                Ok(())
            }
            _ => Err(EngineError::InvalidState(format!(
                "cannot restart while {state}"
            ))),
        }
    }

    /// Poll on the configured interval until `cancel` fires.
    ///
    /// Cancellation is observed between cycles only; a liquidation run in
    /// progress always runs to completion.
    pub async fn run(&self, cancel: CancellationToken) -> ControllerState {
        let mut period = self.settings.snapshot().poll_interval;
        let mut ticker = poll_ticker(period, Instant::now());
        Metrics::controller_state_set(self.state().as_str());
        info!(poll_interval_ms = period.as_millis() as u64, "Threshold controller started");

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(state = %self.state(), "Threshold controller stopping");
                    break;
                }
                _ = ticker.tick() => {}
            }

            self.step().await;

            let next = self.settings.snapshot().poll_interval;
            if next != period {
                debug!(
                    from_ms = period.as_millis() as u64,
                    to_ms = next.as_millis() as u64,
                    "Poll interval changed"
                );
                period = next;
                ticker = poll_ticker(period, Instant::now() + period);
            }
        }

        self.state()
    }

    /// One controller cycle against a fresh settings snapshot.
    pub async fn step(&self) -> ControllerState {
        let settings = self.settings.snapshot();

        match self.state() {
            ControllerState::Idle => {
                if settings.enabled && self.start_monitoring(&settings).await {
                    self.poll(&settings).await;
                }
            }
            ControllerState::Monitoring => {
                if settings.enabled {
                    self.poll(&settings).await;
                } else {
                    info!("Auto-close disabled, monitoring stopped");
                    self.transition(ControllerState::Idle);
                }
            }
            ControllerState::Triggering => {
                debug!("Liquidation run in flight, skipping cycle");
            }
            ControllerState::Done => {
                if !settings.enabled {
                    info!("Auto-close disabled after completed run, re-arming");
                    self.latch.reset();
                    self.transition(ControllerState::Idle);
                }
            }
        }

        self.state()
    }

    /// Settings must be valid and resolve to a positive target PnL at the
    /// current margin balance.
    async fn check_startable(&self, settings: &MonitorSettings) -> EngineResult<()> {
        settings.validate()?;
        let balance = self.gateway.balance().await?;
        let target_pnl = settings.target.target_pnl(balance);
        if !target_pnl.is_positive() {
            return Err(EngineError::Configuration(format!(
                "target PnL must be positive, got {target_pnl} at margin balance {balance}"
            )));
        }
        Ok(())
    }

    async fn start_monitoring(&self, settings: &MonitorSettings) -> bool {
        if let Err(e) = self.check_startable(settings).await {
            let reason = e.to_string();
            let is_new = {
                let mut inner = self.inner.lock();
                let is_new = inner.rejected_config.as_deref() != Some(reason.as_str());
                inner.rejected_config = Some(reason.clone());
                is_new
            };
            if is_new {
                error!(error = %reason, "Auto-close not started");
                self.notify("error", &format!("Auto-close not started: {reason}"));
            }
            return false;
        }

        {
            let mut inner = self.inner.lock();
            inner.rejected_config = None;
            inner.evaluation_failing = false;
            inner.last_status_at = Instant::now();
        }
        info!(
            target = %settings.target,
            poll_interval_ms = settings.poll_interval.as_millis() as u64,
            "Auto-close monitoring started"
        );
        self.transition(ControllerState::Monitoring);
        true
    }

    async fn poll(&self, settings: &MonitorSettings) {
        Metrics::poll_cycle();

        if let Err(e) = self.clock.ensure_fresh(self.gateway.as_ref()).await {
            Metrics::gateway_error("server_time", e.class());
            warn!(error = %e, "Clock sync failed, continuing with previous offset");
        }

        let evaluation = match self.monitor.evaluate(&settings.target).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                let first = !std::mem::replace(&mut self.inner.lock().evaluation_failing, true);
                warn!(error = %e, "PnL evaluation failed");
                if first {
                    self.notify("error", &format!("PnL evaluation failed: {e}"));
                }
                return;
            }
        };
        if std::mem::replace(&mut self.inner.lock().evaluation_failing, false) {
            info!("PnL evaluation recovered");
        }

        if evaluation.target_met() {
            self.trigger(&evaluation).await;
        } else {
            self.maybe_send_status(&settings.notifications, &evaluation);
        }
    }

    fn maybe_send_status(&self, notifications: &NotificationSettings, evaluation: &Evaluation) {
        if !notifications.enabled {
            return;
        }
        let now = Instant::now();
        {
            let mut inner = self.inner.lock();
            if now.duration_since(inner.last_status_at) < notifications.interval {
                return;
            }
            inner.last_status_at = now;
        }
        self.notify(
            "status",
            &format!(
                "PnL status: total PnL {}, target {}, balance {}",
                evaluation.aggregate_pnl, evaluation.target_pnl, evaluation.balance
            ),
        );
    }

    async fn trigger(&self, evaluation: &Evaluation) {
        if !self.latch.try_fire() {
            debug!("Liquidation already triggered, ignoring");
            return;
        }
        self.transition(ControllerState::Triggering);
        info!(
            aggregate_pnl = %evaluation.aggregate_pnl,
            target_pnl = %evaluation.target_pnl,
            "Take-profit target reached, closing all positions"
        );
        self.notify(
            "result",
            &format!(
                "Target reached: total PnL {} >= target {}. Closing all positions.",
                evaluation.aggregate_pnl, evaluation.target_pnl
            ),
        );

        if let Err(e) = self.clock.ensure_fresh(self.gateway.as_ref()).await {
            Metrics::gateway_error("server_time", e.class());
            warn!(error = %e, "Clock sync before liquidation failed");
        }

        let message = match self.coordinator.close_all().await {
            Ok(result) => {
                let message = result.message();
                if let Err(e) = result.ensure_success() {
                    error!(error = %e, "Auto-close incomplete");
                }
                self.inner.lock().last_result = Some(result);
                message
            }
            Err(e) => {
                error!(error = %e, "Auto-close failed");
                format!("Auto-close failed: {e}")
            }
        };
        self.notify("result", &message);
        self.transition(ControllerState::Done);
    }

    fn transition(&self, next: ControllerState) {
        let prev = std::mem::replace(&mut self.inner.lock().state, next);
        if prev != next {
            info!(from = %prev, to = %next, "Controller state changed");
            Metrics::controller_state_set(next.as_str());
        }
    }

    fn notify(&self, kind: &str, text: &str) {
        Metrics::notification_sent(kind);
        self.notifier.notify(text);
    }
}

fn poll_ticker(period: Duration, start: Instant) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(start, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}
