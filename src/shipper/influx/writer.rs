use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use super::InfluxConfig;
use crate::error::ConnectError;

/// One consumer of the shared influx queue.
pub(super) struct InfluxWriter {
    id: usize,
    config: Arc<InfluxConfig>,
    client: Client,
    ping_url: String,
    write_url: String,
    rng: fastrand::Rng,
    batch: Vec<String>,
    last_flush: Instant,
}

impl InfluxWriter {
    pub(super) fn new(id: usize, config: Arc<InfluxConfig>, rng: fastrand::Rng) -> Result<Self, ConnectError> {
        // Load test targets routinely run with self signed certificates.
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(config.http_timeout)
            .connect_timeout(config.http_timeout)
            .pool_max_idle_per_host(10)
            .build()
            .map_err(|source| ConnectError::Client {
                id: config.id.clone(),
                source,
            })?;

        let base = config.address.trim_end_matches('/');
        Ok(Self {
            id,
            ping_url: format!("{base}/ping"),
            write_url: format!("{base}/write"),
            client,
            rng,
            batch: Vec::with_capacity(config.batch_size),
            last_flush: Instant::now(),
            config,
        })
    }

    pub(super) async fn connect(&self) -> Result<(), ConnectError> {
        let response = self
            .client
            .get(&self.ping_url)
            .send()
            .await
            .map_err(|source| ConnectError::Ping {
                id: self.config.id.clone(),
                writer: self.id,
                url: self.ping_url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectError::BadStatus {
                id: self.config.id.clone(),
                writer: self.id,
                url: self.ping_url.clone(),
                status: status.as_u16(),
            });
        }
        debug!(connection_id = %self.config.id, writer = self.id, "Ping ok");
        Ok(())
    }

    pub(super) async fn run(mut self, queue: flume::Receiver<String>, closed: CancellationToken) {
        let flush_interval = self.config.flush_interval.max(Duration::from_millis(1));
        self.last_flush = Instant::now();
        let mut ticker = time::interval(flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                received = queue.recv_async() => match received {
                    Ok(metric) => self.push(metric).await,
                    Err(_) => break,
                },
                _ = closed.cancelled() => {
                    while let Ok(metric) = queue.try_recv() {
                        self.push(metric).await;
                    }
                    break;
                }
                _ = ticker.tick() => {
                    if !self.batch.is_empty() && self.last_flush.elapsed() >= flush_interval {
                        self.flush().await;
                    }
                }
            }
        }

        if !self.batch.is_empty() {
            self.flush().await;
        }
        debug!(connection_id = %self.config.id, writer = self.id, "Influx writer finished");
    }

    async fn push(&mut self, metric: String) {
        self.batch.push(metric);
        if self.batch.len() >= self.config.batch_size.max(1) {
            self.flush().await;
        }
    }

    /// Sends the current batch. Failures are logged and the batch is dropped.
    async fn flush(&mut self) {
        let jitter_ms = self.config.flush_jitter.as_millis() as u64;
        if jitter_ms > 0 {
            time::sleep(Duration::from_millis(self.rng.u64(0..jitter_ms))).await;
        }

        let count = self.batch.len();
        let body = merge_metrics(&self.batch);
        self.batch.clear();
        self.last_flush = Instant::now();

        let mut request = self
            .client
            .post(&self.write_url)
            .query(&[
                ("db", self.config.database.as_str()),
                ("precision", self.config.precision.as_str()),
            ])
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(body);
        if let Some((username, password)) = self.config.credentials() {
            request = request.basic_auth(username, Some(password));
        }

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                trace!(connection_id = %self.config.id, writer = self.id, count, "Flushed batch");
            }
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                error!(
                    connection_id = %self.config.id,
                    writer = self.id,
                    count,
                    "Influx write rejected with {}: {}",
                    status,
                    text.trim()
                );
            }
            Err(e) => {
                error!(connection_id = %self.config.id, writer = self.id, count, "Influx write failed: {}", e);
            }
        }
    }
}

fn merge_metrics(batch: &[String]) -> String {
    batch.join("\n")
}
