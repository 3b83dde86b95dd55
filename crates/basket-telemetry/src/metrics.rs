//! Prometheus metrics for basket-close.
//!
//! Covers:
//! - Aggregate PnL, target and margin balance
//! - Controller state and polling cycles
//! - Liquidation runs and per-symbol close outcomes
//! - Gateway errors by class
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A failure means duplicate metric
//! names, which is a programming error caught on first access.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_counter, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntCounter,
    TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Aggregate unrealized PnL across open positions (USD).
pub static AGGREGATE_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "basket_aggregate_pnl_usd",
        "Aggregate unrealized PnL across open positions in USD"
    )
    .unwrap()
});

/// PnL required to trigger liquidation (USD).
pub static TARGET_PNL: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("basket_target_pnl_usd", "Current take-profit target PnL in USD").unwrap()
});

/// Margin balance (USD).
pub static MARGIN_BALANCE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("basket_margin_balance_usd", "Margin balance in USD").unwrap()
});

/// Number of open positions at the last evaluation.
pub static OPEN_POSITIONS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("basket_open_positions", "Open positions at last evaluation").unwrap()
});

/// Controller state (1 = active, 0 = inactive).
/// Labels: state (idle/monitoring/triggering/done)
pub static CONTROLLER_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "basket_controller_state",
        "Threshold controller state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total polling cycles.
pub static POLL_CYCLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!("basket_poll_cycles_total", "Total monitoring poll cycles").unwrap()
});

/// Total liquidation runs.
/// Labels: result (success/partial/error)
pub static LIQUIDATION_RUNS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "basket_liquidation_runs_total",
        "Total liquidation runs",
        &["result"]
    )
    .unwrap()
});

/// Per-symbol close outcomes.
/// Labels: symbol, outcome (already_closed/filled_via_limit/filled_via_market/failed)
pub static CLOSE_OUTCOMES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "basket_close_outcomes_total",
        "Per-symbol close outcomes",
        &["symbol", "outcome"]
    )
    .unwrap()
});

/// Time to close one position, in seconds.
pub static CLOSE_DURATION_SECONDS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "basket_close_duration_seconds",
        "Time to close one position in seconds",
        &["outcome"],
        vec![0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 11.0, 15.0, 30.0, 60.0]
    )
    .unwrap()
});

/// Gateway errors.
/// Labels: operation, class (transient/rejection)
pub static GATEWAY_ERRORS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "basket_gateway_errors_total",
        "Gateway errors by operation and class",
        &["operation", "class"]
    )
    .unwrap()
});

/// Notifications sent.
/// Labels: kind (status/result/error)
pub static NOTIFICATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "basket_notifications_total",
        "Notifications sent",
        &["kind"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record the latest PnL evaluation.
    pub fn pnl_evaluated(aggregate_pnl: f64, target_pnl: f64, balance: f64, open_positions: usize) {
        AGGREGATE_PNL.set(aggregate_pnl);
        TARGET_PNL.set(target_pnl);
        MARGIN_BALANCE.set(balance);
        OPEN_POSITIONS.set(open_positions as f64);
    }

    /// Set controller state. Only the active state is 1.
    pub fn controller_state_set(state: &str) {
        for s in ["idle", "monitoring", "triggering", "done"] {
            CONTROLLER_STATE.with_label_values(&[s]).set(0.0);
        }
        CONTROLLER_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn poll_cycle() {
        POLL_CYCLES_TOTAL.inc();
    }

    pub fn liquidation_run(result: &str) {
        LIQUIDATION_RUNS_TOTAL.with_label_values(&[result]).inc();
    }

    /// Record one position's close outcome and how long it took.
    pub fn close_outcome(symbol: &str, outcome: &str, duration_secs: f64) {
        CLOSE_OUTCOMES_TOTAL
            .with_label_values(&[symbol, outcome])
            .inc();
        CLOSE_DURATION_SECONDS
            .with_label_values(&[outcome])
            .observe(duration_secs);
    }

    pub fn gateway_error(operation: &str, class: &str) {
        GATEWAY_ERRORS_TOTAL
            .with_label_values(&[operation, class])
            .inc();
    }

    pub fn notification_sent(kind: &str) {
        NOTIFICATIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
