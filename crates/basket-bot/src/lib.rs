//! Take-profit auto-close bot.
//!
//! Wires the liquidation engine to its surroundings:
//! - TOML configuration with defaults and validation
//! - Hot reload of the monitor settings while running
//! - Dry-run gateway built from the `[simulation]` section
//! - Ctrl-C shutdown at the next controller cycle boundary

pub mod app;
pub mod config;
pub mod error;
pub mod reload;

pub use app::Application;
pub use config::AppConfig;
pub use error::{AppError, AppResult};
pub use reload::ConfigReloader;
