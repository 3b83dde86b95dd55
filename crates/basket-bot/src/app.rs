//! Main application logic.
//!
//! Builds the dry-run gateway from configuration, wires the threshold
//! controller, and runs it until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;

use basket_core::Symbol;
use basket_engine::{
    ControllerState, DynNotifier, LogNotifier, SettingsHandle, ThresholdController,
};
use basket_gateway::{ClockSync, PassiveFill, SimGateway};
use basket_telemetry::Metrics;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::AppResult;
use crate::reload::ConfigReloader;

/// Main application.
pub struct Application {
    config: AppConfig,
    config_path: Option<PathBuf>,
    gateway: Arc<SimGateway>,
    settings: SettingsHandle,
    notifier: DynNotifier,
    cancel: CancellationToken,
}

impl Application {
    /// Create a new application from validated configuration.
    pub fn new(config: AppConfig) -> AppResult<Self> {
        config.validate()?;
        let gateway = Arc::new(build_gateway(&config)?);
        let settings = SettingsHandle::new(config.monitor_settings());

        Ok(Self {
            config,
            config_path: None,
            gateway,
            settings,
            notifier: Arc::new(LogNotifier),
            cancel: CancellationToken::new(),
        })
    }

    /// Watch `path` for configuration changes while running.
    pub fn with_config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    pub fn with_notifier(mut self, notifier: DynNotifier) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gateway(&self) -> Arc<SimGateway> {
        self.gateway.clone()
    }

    pub fn settings(&self) -> SettingsHandle {
        self.settings.clone()
    }

    /// Token that stops the application at the next cycle boundary.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Controller wired to this application's gateway, settings and
    /// notifier.
    pub fn controller(&self) -> ThresholdController {
        ThresholdController::new(
            self.gateway.clone(),
            self.settings.clone(),
            self.notifier.clone(),
        )
        .with_executor_config(self.config.executor_config())
        .with_clock(Arc::new(ClockSync::new(self.config.clock_sync_interval())))
    }

    /// Run until Ctrl-C or the cancel token fires.
    pub async fn run(self) -> AppResult<ControllerState> {
        info!(
            enabled = self.config.monitor.enabled,
            target = %self.config.target,
            poll_interval_ms = self.config.monitor.poll_interval_ms,
            "Starting application"
        );

        let controller = self.controller();

        let reload_handle = self.config_path.clone().map(|path| {
            let reloader =
                ConfigReloader::new(path, self.settings.clone(), self.notifier.clone());
            tokio::spawn(reloader.run(self.config.config_reload_interval(), self.cancel.clone()))
        });

        let signal_cancel = self.cancel.clone();
        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Shutdown signal received"),
                Err(e) => warn!(error = %e, "Failed to listen for shutdown signal"),
            }
            signal_cancel.cancel();
        });

        let final_state = controller.run(self.cancel.clone()).await;

        // Cleanup
        self.cancel.cancel();
        signal_handle.abort();
        if let Some(handle) = reload_handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Config reloader task failed");
            }
        }

        info!(state = %final_state, "Shutting down");
        match Metrics::gather_text() {
            Ok(text) => debug!(metrics = %text, "Final metrics"),
            Err(e) => warn!(error = %e, "Failed to render metrics"),
        }

        Ok(final_state)
    }
}

/// Dry-run exchange seeded from the `[simulation]` section. Each book is
/// one tick either side of the mark price.
pub fn build_gateway(config: &AppConfig) -> AppResult<SimGateway> {
    let gateway = SimGateway::with_balance(config.simulation.balance);

    for position in &config.simulation.positions {
        let spec = position.instrument_spec()?;
        let bid = position.mark_price - spec.tick_size;
        let ask = position.mark_price + spec.tick_size;
        let symbol = Symbol::new(position.symbol.clone());

        gateway.add_instrument(symbol.clone(), spec, Some(bid), Some(ask));
        if !position.fills_passively {
            gateway.set_passive_fill(&symbol, PassiveFill::Rest);
        }
        gateway.open_position(
            symbol.clone(),
            position.size,
            position.entry_price,
            position.mark_price,
        );
        debug!(
            symbol = %symbol,
            size = %position.size,
            bid = %bid,
            ask = %ask,
            "Simulated position opened"
        );
    }

    if config.simulation.positions.is_empty() {
        warn!("Simulation has no open positions");
    }
    Ok(gateway)
}
