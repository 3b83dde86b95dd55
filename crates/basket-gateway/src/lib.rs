//! Exchange gateway for the basket-close liquidation engine.
//!
//! - `Gateway`: capability interface the engine calls
//! - `GatewayError`: transient vs rejection error taxonomy
//! - `ClockSync`: session-level clock offset with periodic refresh
//! - `SimGateway`: in-memory exchange for dry runs and tests

pub mod clock;
pub mod error;
pub mod gateway;
pub mod sim;

pub use clock::{ClockSync, DEFAULT_CLOCK_SYNC_INTERVAL};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{BoxFuture, DynGateway, Gateway};
pub use sim::{PassiveFill, SimCall, SimGateway, SimOperation, SimOrder};
