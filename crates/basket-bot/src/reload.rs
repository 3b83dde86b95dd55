//! Configuration hot reload.
//!
//! Polls the config file's modification time. A changed file is parsed and
//! validated, then its monitor section replaces the running settings. A
//! broken edit is reported and ignored; the previous settings stay.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use basket_engine::{DynNotifier, SettingsHandle};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

pub struct ConfigReloader {
    path: PathBuf,
    settings: SettingsHandle,
    notifier: DynNotifier,
    last_modified: Option<SystemTime>,
}

impl ConfigReloader {
    /// The file's current modification time counts as already applied.
    pub fn new(path: impl Into<PathBuf>, settings: SettingsHandle, notifier: DynNotifier) -> Self {
        let path = path.into();
        let last_modified = modified(&path).ok();
        Self {
            path,
            settings,
            notifier,
            last_modified,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Apply the file if it changed since the last check.
    ///
    /// Returns `Ok(true)` when new settings were applied. A rejected file is
    /// not retried until it changes again.
    pub fn check(&mut self) -> AppResult<bool> {
        let modified = modified(&self.path)?;
        if self.last_modified == Some(modified) {
            return Ok(false);
        }
        self.last_modified = Some(modified);

        let applied = AppConfig::from_file(&self.path)
            .and_then(|config| {
                self.settings
                    .update(config.monitor_settings())
                    .map_err(AppError::from)
            });
        match applied {
            Ok(()) => {
                info!(path = %self.path.display(), "Configuration reloaded");
                Ok(true)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Configuration change rejected");
                self.notifier.notify(&format!("Configuration change ignored: {e}"));
                Err(e)
            }
        }
    }

    /// Check every `interval` until `cancel` fires.
    pub async fn run(mut self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!(
            path = %self.path.display(),
            interval_ms = interval.as_millis() as u64,
            "Config reloader started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if let Err(e) = self.check() {
                debug!(error = %e, "Config reload check failed");
            }
        }
    }
}

fn modified(path: &Path) -> std::io::Result<SystemTime> {
    std::fs::metadata(path)?.modified()
}
