//! Application configuration.
//!
//! Loaded from TOML. Every section except `[target]` has defaults, so a
//! minimal file only names the take-profit target.

use std::path::Path;
use std::time::Duration;

use basket_core::{InstrumentSpec, Price, Size, TargetSpec, Usd};
use basket_engine::{
    ExecutorConfig, MonitorSettings, NotificationSettings, MAX_NOTIFICATION_INTERVAL,
    MIN_NOTIFICATION_INTERVAL,
};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::{AppError, AppResult};

/// Monitor loop configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    /// Auto-close enabled.
    #[serde(default)]
    pub enabled: bool,
    /// PnL polling interval in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How often the config file is checked for changes, in milliseconds.
    #[serde(default = "default_config_reload_interval_ms")]
    pub config_reload_interval_ms: u64,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}

fn default_config_reload_interval_ms() -> u64 {
    5_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            poll_interval_ms: default_poll_interval_ms(),
            config_reload_interval_ms: default_config_reload_interval_ms(),
        }
    }
}

/// Periodic status message configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Seconds between status messages (5..=3600).
    #[serde(default = "default_notification_interval_secs")]
    pub interval_secs: u64,
}

fn default_notification_interval_secs() -> u64 {
    30
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_secs: default_notification_interval_secs(),
        }
    }
}

/// Close order configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorSection {
    /// How long a post-only close order may rest before the market
    /// fallback, in milliseconds.
    #[serde(default = "default_fill_grace_ms")]
    pub fill_grace_ms: u64,
    /// Maximum number of symbols closed at once. Unset = no cap.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
}

fn default_fill_grace_ms() -> u64 {
    10_000
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            fill_grace_ms: default_fill_grace_ms(),
            max_concurrency: None,
        }
    }
}

/// Exchange session configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Server clock offset refresh interval in seconds.
    #[serde(default = "default_clock_sync_interval_secs")]
    pub clock_sync_interval_secs: u64,
}

fn default_clock_sync_interval_secs() -> u64 {
    300
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            clock_sync_interval_secs: default_clock_sync_interval_secs(),
        }
    }
}

/// One position held by the dry-run exchange at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct SimPositionConfig {
    pub symbol: String,
    /// Signed size: positive = long, negative = short.
    pub size: Size,
    pub entry_price: Price,
    pub mark_price: Price,
    #[serde(default = "default_tick_size")]
    pub tick_size: Price,
    #[serde(default = "default_lot_size")]
    pub lot_size: Size,
    /// Whether a resting post-only close order gets filled. When false the
    /// close falls back to a market order.
    #[serde(default = "default_fills_passively")]
    pub fills_passively: bool,
}

fn default_tick_size() -> Price {
    Price::new(Decimal::new(1, 2))
}

fn default_lot_size() -> Size {
    Size::new(Decimal::new(1, 3))
}

fn default_fills_passively() -> bool {
    true
}

impl SimPositionConfig {
    pub fn instrument_spec(&self) -> AppResult<InstrumentSpec> {
        InstrumentSpec::new(self.tick_size, self.lot_size)
            .map_err(|e| AppError::Config(format!("{}: {e}", self.symbol)))
    }
}

/// Dry-run exchange state.
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Wallet balance before unrealized PnL.
    #[serde(default = "default_sim_balance")]
    pub balance: Usd,
    #[serde(default)]
    pub positions: Vec<SimPositionConfig>,
}

fn default_sim_balance() -> Usd {
    Usd::new(Decimal::new(1_000, 0))
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            balance: default_sim_balance(),
            positions: Vec::new(),
        }
    }
}

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Take-profit target: `mode` plus `value`.
    pub target: TargetSpec,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl AppConfig {
    /// Load and validate a configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::parse(&content)
    }

    /// Parse and validate TOML content.
    pub fn parse(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.monitor.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "monitor.poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if self.monitor.config_reload_interval_ms == 0 {
            return Err(AppError::Config(
                "monitor.config_reload_interval_ms must be greater than zero".to_string(),
            ));
        }
        let interval = self.notifications.interval_secs;
        let range = MIN_NOTIFICATION_INTERVAL.as_secs()..=MAX_NOTIFICATION_INTERVAL.as_secs();
        if !range.contains(&interval) {
            return Err(AppError::Config(format!(
                "notifications.interval_secs must be within {}..={}, got {interval}",
                range.start(),
                range.end()
            )));
        }
        if self.session.clock_sync_interval_secs == 0 {
            return Err(AppError::Config(
                "session.clock_sync_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.executor.max_concurrency == Some(0) {
            return Err(AppError::Config(
                "executor.max_concurrency must be at least 1".to_string(),
            ));
        }
        self.target
            .validate()
            .map_err(|e| AppError::Config(format!("target: {e}")))?;

        for position in &self.simulation.positions {
            if position.symbol.is_empty() {
                return Err(AppError::Config(
                    "simulation position with empty symbol".to_string(),
                ));
            }
            position.instrument_spec()?;
        }
        Ok(())
    }

    /// Settings pushed into the controller's settings holder.
    pub fn monitor_settings(&self) -> MonitorSettings {
        MonitorSettings {
            enabled: self.monitor.enabled,
            target: self.target,
            poll_interval: self.poll_interval(),
            notifications: NotificationSettings {
                enabled: self.notifications.enabled,
                interval: Duration::from_secs(self.notifications.interval_secs),
            },
        }
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            fill_grace: Duration::from_millis(self.executor.fill_grace_ms),
            max_concurrency: self.executor.max_concurrency,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.poll_interval_ms)
    }

    pub fn config_reload_interval(&self) -> Duration {
        Duration::from_millis(self.monitor.config_reload_interval_ms)
    }

    pub fn clock_sync_interval(&self) -> Duration {
        Duration::from_secs(self.session.clock_sync_interval_secs)
    }
}
