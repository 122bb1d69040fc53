//! Streaming shipper for statsd over TCP or UDP.
//!
//! No batching: the single consumer writes every metric to the socket as soon
//! as it comes off the queue. Submission never waits; a full queue drops the
//! metric.

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::Ship;
use crate::error::{ConnectError, ShipError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    #[default]
    Udp,
}

impl Transport {
    pub const NAMES: [&'static str; 2] = ["tcp", "udp"];
}

impl FromStr for Transport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" => Ok(Transport::Tcp),
            "udp" => Ok(Transport::Udp),
            other => Err(format!("invalid transport {other:?}, expected tcp or udp")),
        }
    }
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Tcp => f.write_str("tcp"),
            Transport::Udp => f.write_str("udp"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatsdConfig {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub transport: Transport,
    pub queue_depth: usize,
}

impl StatsdConfig {
    pub fn new(id: impl Into<String>, host: impl Into<String>, port: u16, transport: Transport) -> Self {
        Self {
            id: id.into(),
            host: host.into(),
            port,
            transport,
            queue_depth: 1000,
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

enum Connection {
    Tcp(TcpStream),
    Udp(UdpSocket),
}

impl Connection {
    async fn dial(config: &StatsdConfig) -> io::Result<Self> {
        let address = config.address();
        match config.transport {
            Transport::Tcp => Ok(Connection::Tcp(TcpStream::connect(&address).await?)),
            Transport::Udp => {
                let target = tokio::net::lookup_host(&address).await?.next().ok_or_else(|| {
                    io::Error::new(io::ErrorKind::NotFound, format!("{address} did not resolve"))
                })?;
                let local: SocketAddr = if target.is_ipv4() {
                    ([0, 0, 0, 0], 0).into()
                } else {
                    ([0u16; 8], 0).into()
                };
                let socket = UdpSocket::bind(local).await?;
                socket.connect(target).await?;
                Ok(Connection::Udp(socket))
            }
        }
    }

    async fn write(&mut self, metric: &str) -> io::Result<()> {
        let line = format!("{metric}\n");
        match self {
            Connection::Tcp(stream) => stream.write_all(line.as_bytes()).await,
            Connection::Udp(socket) => socket.send(line.as_bytes()).await.map(|_| ()),
        }
    }

    async fn close(self) {
        if let Connection::Tcp(mut stream) = self {
            if let Err(e) = stream.shutdown().await {
                debug!("Statsd tcp shutdown failed: {}", e);
            }
        }
    }
}

pub struct StatsdShipper {
    config: StatsdConfig,
    queue_tx: mpsc::Sender<String>,
    queue_rx: Option<mpsc::Receiver<String>>,
    connection: Option<Connection>,
    closed: CancellationToken,
    consumer: Option<JoinHandle<()>>,
    finished: bool,
}

impl StatsdShipper {
    pub fn new(config: StatsdConfig) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_depth.max(1));
        Self {
            config,
            queue_tx,
            queue_rx: Some(queue_rx),
            connection: None,
            closed: CancellationToken::new(),
            consumer: None,
            finished: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn config(&self) -> &StatsdConfig {
        &self.config
    }

    pub async fn connect(&mut self) -> Result<(), ConnectError> {
        if self.closed.is_cancelled() {
            return Err(ConnectError::Stopped(self.config.id.clone()));
        }
        let connection = Connection::dial(&self.config)
            .await
            .map_err(|source| ConnectError::Dial {
                id: self.config.id.clone(),
                transport: self.config.transport.to_string(),
                address: self.config.address(),
                source,
            })?;
        self.connection = Some(connection);
        info!(
            connection_id = %self.config.id,
            "Connected to statsd at {} {}",
            self.config.transport,
            self.config.address()
        );
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), ConnectError> {
        if self.closed.is_cancelled() {
            return Err(ConnectError::Stopped(self.config.id.clone()));
        }
        let Some(connection) = self.connection.take() else {
            return Err(ConnectError::NotConnected(self.config.id.clone()));
        };
        let Some(queue) = self.queue_rx.take() else {
            return Err(ConnectError::Stopped(self.config.id.clone()));
        };
        self.consumer = Some(tokio::spawn(consume(
            self.config.id.clone(),
            queue,
            connection,
            self.closed.clone(),
        )));
        Ok(())
    }

    pub fn handle(&self) -> StatsdHandle {
        StatsdHandle {
            id: Arc::from(self.config.id.as_str()),
            queue: self.queue_tx.clone(),
            closed: self.closed.clone(),
        }
    }

    pub async fn ship(&self, metric: String) -> Result<(), ShipError> {
        self.handle().ship(metric).await
    }

    /// Closes the input and waits for the consumer to drain the queue and
    /// close the connection. Safe to call more than once.
    pub async fn stop(&mut self) {
        if self.finished {
            return;
        }
        self.closed.cancel();
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                warn!(connection_id = %self.config.id, "Statsd consumer ended abnormally: {}", e);
            }
        }
        self.queue_rx.take();
        if let Some(connection) = self.connection.take() {
            connection.close().await;
        }
        self.finished = true;
        info!(connection_id = %self.config.id, "Statsd shipper finished");
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl Drop for StatsdShipper {
    fn drop(&mut self) {
        self.closed.cancel();
    }
}

async fn consume(
    id: String,
    mut queue: mpsc::Receiver<String>,
    mut connection: Connection,
    closed: CancellationToken,
) {
    loop {
        tokio::select! {
            received = queue.recv() => match received {
                Some(metric) => send(&id, &mut connection, &metric).await,
                None => break,
            },
            _ = closed.cancelled() => break,
        }
    }

    queue.close();
    while let Some(metric) = queue.recv().await {
        send(&id, &mut connection, &metric).await;
    }
    connection.close().await;
    debug!(connection_id = %id, "Statsd consumer finished");
}

async fn send(id: &str, connection: &mut Connection, metric: &str) {
    if let Err(e) = connection.write(metric).await {
        error!(connection_id = %id, "Failed to send statsd metric: {}", e);
    }
}

/// Cloneable submit side of a [`StatsdShipper`].
#[derive(Clone)]
pub struct StatsdHandle {
    id: Arc<str>,
    queue: mpsc::Sender<String>,
    closed: CancellationToken,
}

#[async_trait]
impl Ship for StatsdHandle {
    async fn ship(&self, metric: String) -> Result<(), ShipError> {
        if self.closed.is_cancelled() {
            return Err(ShipError::Stopped(self.id.to_string()));
        }
        match self.queue.try_send(metric) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(metric)) => {
                error!(connection_id = %self.id, "Statsd queue is full, dropping {}", metric);
                Ok(())
            }
            Err(TrySendError::Closed(_)) => Err(ShipError::Stopped(self.id.to_string())),
        }
    }

    fn kind(&self) -> &'static str {
        "statsd"
    }
}
