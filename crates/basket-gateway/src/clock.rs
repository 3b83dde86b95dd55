//! Session-level clock synchronisation.
//!
//! Signed exchange requests carry a timestamp that must fall inside the
//! exchange's receive window. The offset between exchange and local time
//! is measured once per session and refreshed periodically, rather than
//! before every single request.

use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::error::GatewayResult;
use crate::gateway::Gateway;

/// Default refresh interval: 5 minutes.
pub const DEFAULT_CLOCK_SYNC_INTERVAL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Copy)]
struct ClockSample {
    offset_ms: i64,
    synced_at: Instant,
}

/// Tracks `server_time - local_time` for one gateway session.
#[derive(Debug)]
pub struct ClockSync {
    interval: Duration,
    sample: Mutex<Option<ClockSample>>,
}

impl ClockSync {
    /// Create a clock sync that refreshes at most once per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            sample: Mutex::new(None),
        }
    }

    /// Last measured offset in milliseconds, if any.
    pub fn offset_ms(&self) -> Option<i64> {
        (*self.sample.lock()).map(|s| s.offset_ms)
    }

    /// Check whether the offset needs to be measured again.
    pub fn is_stale(&self) -> bool {
        match *self.sample.lock() {
            Some(sample) => sample.synced_at.elapsed() >= self.interval,
            None => true,
        }
    }

    /// Refresh the offset if it is older than the interval.
    ///
    /// Returns the current offset in milliseconds.
    pub async fn ensure_fresh(&self, gateway: &dyn Gateway) -> GatewayResult<i64> {
        if !self.is_stale() {
            let offset = self.offset_ms().unwrap_or(0);
            debug!(offset_ms = offset, "Clock offset still fresh");
            return Ok(offset);
        }
        self.sync(gateway).await
    }

    /// Measure the offset now, regardless of age, and hand it to the
    /// gateway for request timestamps.
    pub async fn sync(&self, gateway: &dyn Gateway) -> GatewayResult<i64> {
        let local_before = Utc::now().timestamp_millis();
        let server_ms = gateway.server_time().await?;
        let local_after = Utc::now().timestamp_millis();

        // Midpoint of the request compensates for one-way latency
        let local_ms = local_before + (local_after - local_before) / 2;
        let offset_ms = server_ms - local_ms;

        *self.sample.lock() = Some(ClockSample {
            offset_ms,
            synced_at: Instant::now(),
        });
        gateway.set_time_offset_ms(offset_ms);
        info!(offset_ms, "Clock synchronized with exchange");
        Ok(offset_ms)
    }
}

impl Default for ClockSync {
    fn default() -> Self {
        Self::new(DEFAULT_CLOCK_SYNC_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimGateway, SimOperation};
    use crate::GatewayError;
    use basket_core::{InstrumentSpec, OrderSide, Price, Size, Symbol};
    use rust_decimal_macros::dec;

    #[tokio::test(start_paused = true)]
    async fn test_sync_refreshes_only_when_stale() {
        let gateway = SimGateway::new();
        gateway.set_server_time_offset_ms(1_500);
        let clock = ClockSync::new(Duration::from_secs(60));

        assert!(clock.is_stale());
        let offset = clock.ensure_fresh(&gateway).await.unwrap();
        assert!((1_400..=1_600).contains(&offset));
        assert_eq!(gateway.call_count(SimOperation::ServerTime), 1);

        // Within the interval: no new request
        tokio::time::advance(Duration::from_secs(30)).await;
        clock.ensure_fresh(&gateway).await.unwrap();
        assert_eq!(gateway.call_count(SimOperation::ServerTime), 1);

        // After the interval: refreshed
        tokio::time::advance(Duration::from_secs(31)).await;
        assert!(clock.is_stale());
        clock.ensure_fresh(&gateway).await.unwrap();
        assert_eq!(gateway.call_count(SimOperation::ServerTime), 2);
    }

    #[tokio::test]
    async fn test_offset_applied_to_signed_requests() {
        let gateway = SimGateway::new();
        gateway.add_instrument(
            "BTCUSDT",
            InstrumentSpec::default(),
            Some(Price::new(dec!(100))),
            Some(Price::new(dec!(101))),
        );
        let btc = Symbol::new("BTCUSDT");
        gateway.open_position(
            btc.clone(),
            Size::new(dec!(1)),
            Price::new(dec!(90)),
            Price::new(dec!(100)),
        );
        // Exchange clock 20 s ahead: unsynced requests fall outside the window
        gateway.set_server_time_offset_ms(20_000);

        let unsynced = gateway
            .place_market_order(&btc, OrderSide::Sell, Size::new(dec!(1)), true)
            .await;
        assert!(matches!(unsynced, Err(GatewayError::Rejected(_))));

        let clock = ClockSync::default();
        let offset = clock.sync(&gateway).await.unwrap();
        assert_eq!(gateway.time_offset_ms(), offset);
        assert!((19_900..=20_100).contains(&offset));

        gateway
            .place_market_order(&btc, OrderSide::Sell, Size::new(dec!(1)), true)
            .await
            .unwrap();
        assert!(gateway.position_size(&btc).is_zero());
    }

    #[tokio::test]
    async fn test_sync_failure_keeps_previous_offset() {
        let gateway = SimGateway::new();
        let clock = ClockSync::new(Duration::ZERO);

        clock.sync(&gateway).await.unwrap();
        let before = clock.offset_ms();
        assert!(before.is_some());

        gateway.fail_next(
            SimOperation::ServerTime,
            GatewayError::Network("connection reset".into()),
        );
        assert!(clock.sync(&gateway).await.is_err());
        assert_eq!(clock.offset_ms(), before);
    }
}
