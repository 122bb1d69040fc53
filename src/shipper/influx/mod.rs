//! Batching shipper for the influx HTTP write API.
//!
//! Metrics go into one bounded queue that every writer reads from. Each writer
//! owns its batch buffer and its HTTP client, and flushes when the batch is
//! full or when the flush interval has passed since its last flush.

mod writer;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use self::writer::InfluxWriter;
use super::Ship;
use crate::error::{ConnectError, ShipError};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;
pub const DEFAULT_FLUSH_JITTER: Duration = Duration::from_millis(200);

/// Timestamp precision passed to `/write` and used for timestamped metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    H,
    M,
    #[default]
    S,
    Ms,
    U,
    Ns,
}

impl Precision {
    pub const NAMES: [&'static str; 6] = ["h", "m", "s", "ms", "u", "ns"];

    pub fn as_str(&self) -> &'static str {
        match self {
            Precision::H => "h",
            Precision::M => "m",
            Precision::S => "s",
            Precision::Ms => "ms",
            Precision::U => "u",
            Precision::Ns => "ns",
        }
    }

    /// Epoch offset of `now` expressed in this precision.
    pub fn timestamp(&self, now: DateTime<Utc>) -> i64 {
        match self {
            Precision::H => now.timestamp() / 3600,
            Precision::M => now.timestamp() / 60,
            Precision::S => now.timestamp(),
            Precision::Ms => now.timestamp_millis(),
            Precision::U => now.timestamp_micros(),
            Precision::Ns => now
                .timestamp_nanos_opt()
                .unwrap_or_else(|| now.timestamp_micros().saturating_mul(1000)),
        }
    }
}

impl FromStr for Precision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "h" => Ok(Precision::H),
            "m" => Ok(Precision::M),
            "s" => Ok(Precision::S),
            "ms" => Ok(Precision::Ms),
            "u" => Ok(Precision::U),
            "ns" => Ok(Precision::Ns),
            other => Err(format!(
                "invalid precision {other:?}, expected one of {}",
                Precision::NAMES.join(", ")
            )),
        }
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub id: String,
    /// Base URL, `http[s]://host[:port]`.
    pub address: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub precision: Precision,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub writers: usize,
    pub http_timeout: Duration,
    pub queue_capacity: usize,
    /// Upper bound of the random sleep before each write request.
    pub flush_jitter: Duration,
}

impl InfluxConfig {
    pub fn new(id: impl Into<String>, address: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            database: database.into(),
            username: String::new(),
            password: String::new(),
            precision: Precision::default(),
            batch_size: 100,
            flush_interval: Duration::from_secs(10),
            writers: 1,
            http_timeout: Duration::from_secs(5),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            flush_jitter: DEFAULT_FLUSH_JITTER,
        }
    }

    /// Basic auth is only sent when both halves are set.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if self.username.is_empty() || self.password.is_empty() {
            None
        } else {
            Some((&self.username, &self.password))
        }
    }
}

pub struct InfluxShipper {
    config: Arc<InfluxConfig>,
    queue_tx: flume::Sender<String>,
    queue_rx: Option<flume::Receiver<String>>,
    closed: CancellationToken,
    rng: fastrand::Rng,
    connected: Vec<InfluxWriter>,
    running: Vec<JoinHandle<()>>,
    finished: bool,
}

impl InfluxShipper {
    pub fn new(config: InfluxConfig) -> Self {
        Self::with_rng(config, fastrand::Rng::new())
    }

    pub fn with_rng(config: InfluxConfig, rng: fastrand::Rng) -> Self {
        let (queue_tx, queue_rx) = flume::bounded(config.queue_capacity.max(1));
        Self {
            config: Arc::new(config),
            queue_tx,
            queue_rx: Some(queue_rx),
            closed: CancellationToken::new(),
            rng,
            connected: Vec::new(),
            running: Vec::new(),
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &InfluxConfig {
        &self.config
    }

    /// Pings the server once per writer, in writer order. The first failure
    /// stops the shipper and is returned.
    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.closed.is_cancelled() {
            return Err(ConnectError::Stopped(self.config.id.clone()));
        }
        for writer_id in 1..=self.config.writers.max(1) {
            let writer = match InfluxWriter::new(writer_id, self.config.clone(), self.rng.fork()) {
                Ok(writer) => writer,
                Err(e) => {
                    self.stop().await;
                    return Err(e);
                }
            };
            if let Err(e) = writer.connect().await {
                error!(connection_id = %self.config.id, writer = writer_id, "Influx connect failed: {}", e);
                self.stop().await;
                return Err(e);
            }
            self.connected.push(writer);
        }
        info!(
            connection_id = %self.config.id,
            writers = self.connected.len(),
            "Connected to influx at {}",
            self.config.address
        );
        Ok(())
    }

    /// Spawns every connected writer onto the shared queue.
    pub fn start(&mut self) -> Result<(), ConnectError> {
        if self.closed.is_cancelled() {
            return Err(ConnectError::Stopped(self.config.id.clone()));
        }
        if self.connected.is_empty() {
            return Err(ConnectError::NotConnected(self.config.id.clone()));
        }
        let Some(queue) = self.queue_rx.take() else {
            return Err(ConnectError::Stopped(self.config.id.clone()));
        };
        for writer in self.connected.drain(..) {
            self.running
                .push(tokio::spawn(writer.run(queue.clone(), self.closed.clone())));
        }
        info!(connection_id = %self.config.id, writers = self.running.len(), "Influx shipper started");
        Ok(())
    }

    pub fn handle(&self) -> InfluxHandle {
        InfluxHandle {
            id: Arc::from(self.config.id.as_str()),
            queue: self.queue_tx.clone(),
            closed: self.closed.clone(),
            precision: self.config.precision,
            timestamped: false,
        }
    }

    /// Handle whose metrics get a send-time timestamp appended.
    pub fn timestamped_handle(&self) -> InfluxHandle {
        InfluxHandle {
            timestamped: true,
            ..self.handle()
        }
    }

    pub async fn ship(&self, metric: String) -> Result<(), ShipError> {
        self.handle().ship(metric).await
    }

    pub async fn ship_with_timestamp(&self, metric: String) -> Result<(), ShipError> {
        self.timestamped_handle().ship(metric).await
    }

    /// Closes the input, waits for every writer to drain and flush, then
    /// marks the shipper finished. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.finished {
            return;
        }
        self.closed.cancel();
        self.queue_rx.take();
        self.connected.clear();
        for writer in self.running.drain(..) {
            if let Err(e) = writer.await {
                warn!(connection_id = %self.config.id, "Influx writer ended abnormally: {}", e);
            }
        }
        self.finished = true;
        info!(connection_id = %self.config.id, "Influx shipper finished");
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for InfluxShipper {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

/// Cloneable submit side of an [`InfluxShipper`].
#[derive(Clone)]
pub struct InfluxHandle {
    id: Arc<str>,
    queue: flume::Sender<String>,
    closed: CancellationToken,
    precision: Precision,
    timestamped: bool,
}

impl InfluxHandle {
    pub fn is_timestamped(&self) -> bool {
        self.timestamped
    }
}

#[async_trait]
impl Ship for InfluxHandle {
    async fn ship(&self, metric: String) -> Result<(), ShipError> {
        if self.closed.is_cancelled() {
            return Err(ShipError::Stopped(self.id.to_string()));
        }
        let metric = if self.timestamped {
            format!("{} {}", metric, self.precision.timestamp(Utc::now()))
        } else {
            metric
        };
        self.queue
            .send_async(metric)
            .await
            .map_err(|_| ShipError::Stopped(self.id.to_string()))
    }

    fn kind(&self) -> &'static str {
        "influx"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn precision_timestamps() {
        let now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(Precision::S.timestamp(now), 1_704_067_200);
        assert_eq!(Precision::M.timestamp(now), 1_704_067_200 / 60);
        assert_eq!(Precision::H.timestamp(now), 1_704_067_200 / 3600);
        assert_eq!(Precision::Ms.timestamp(now), 1_704_067_200_000);
        assert_eq!(Precision::U.timestamp(now), 1_704_067_200_000_000);
        assert_eq!(Precision::Ns.timestamp(now), 1_704_067_200_000_000_000);
    }

    #[test]
    fn precision_parses_all_names() {
        for name in Precision::NAMES {
            assert_eq!(name.parse::<Precision>().unwrap().as_str(), name);
        }
        assert!("days".parse::<Precision>().is_err());
    }

    #[test]
    fn credentials_need_both_halves() {
        let mut config = InfluxConfig::new("db", "http://localhost:8086", "metrics");
        assert!(config.credentials().is_none());
        config.username = "user".to_string();
        assert!(config.credentials().is_none());
        config.password = "pass".to_string();
        assert_eq!(config.credentials(), Some(("user", "pass")));
    }

    #[tokio::test]
    async fn timestamped_handle_appends_precision_timestamp() {
        let shipper = InfluxShipper::new(InfluxConfig::new("db", "http://localhost:8086", "metrics"));
        shipper.ship_with_timestamp("cpu idle=1".to_string()).await.unwrap();
        let queued = shipper.queue_rx.as_ref().unwrap().try_recv().unwrap();
        let (line, stamp) = queued.rsplit_once(' ').unwrap();
        assert_eq!(line, "cpu idle=1");
        assert!(stamp.parse::<i64>().unwrap() > 1_700_000_000);
    }
}
