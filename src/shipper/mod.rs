//! Sinks that deliver formatted metric strings.
//!
//! Both shippers follow the same lifecycle: `connect`, `start`, any number of
//! `ship` calls, then `stop`. Stopping closes the input; whatever was already
//! queued is still delivered before the shipper reports finished.

pub mod influx;
pub mod statsd;

pub use influx::{InfluxConfig, InfluxHandle, InfluxShipper, Precision};
pub use statsd::{StatsdConfig, StatsdHandle, StatsdShipper, Transport};

use async_trait::async_trait;

use crate::error::ShipError;

/// The submit side of a shipper, shared by every event bound to it.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Ship: Send + Sync {
    /// Queues one metric. Fails once the shipper has been asked to stop.
    async fn ship(&self, metric: String) -> Result<(), ShipError>;

    /// `"influx"` or `"statsd"`, used in log lines.
    fn kind(&self) -> &'static str;
}
