//! Shared helpers for the integration tests
//!
//! - a fake influx server that records every ping and write
//! - listeners that accept connections and never answer
//! - polling helpers with generous deadlines
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;

#[derive(Debug, Clone)]
pub struct RecordedWrite {
    pub query: HashMap<String, String>,
    pub body: String,
    pub authorization: Option<String>,
    pub content_type: Option<String>,
}

#[derive(Clone)]
pub struct FakeInflux {
    pub address: String,
    pings: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<RecordedWrite>>>,
    ping_status: StatusCode,
}

impl FakeInflux {
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.writes.lock().unwrap().clone()
    }

    /// Every line received so far, in arrival order.
    pub fn lines(&self) -> Vec<String> {
        self.writes()
            .iter()
            .flat_map(|w| w.body.lines().map(str::to_string).collect::<Vec<_>>())
            .collect()
    }

    pub async fn wait_for_writes(&self, count: usize) -> Vec<RecordedWrite> {
        wait_until(|| self.writes.lock().unwrap().len() >= count).await;
        self.writes()
    }
}

/// Starts a fake influx on a random local port. `/ping` answers with
/// `ping_status`, `/write` always answers 204.
pub async fn spawn_fake_influx(ping_status: StatusCode) -> FakeInflux {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = format!("http://{}", listener.local_addr().unwrap());
    let fake = FakeInflux {
        address,
        pings: Arc::new(AtomicUsize::new(0)),
        writes: Arc::new(Mutex::new(Vec::new())),
        ping_status,
    };

    let app = Router::new()
        .route("/ping", get(ping))
        .route("/write", post(write))
        .with_state(fake.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    fake
}

async fn ping(State(fake): State<FakeInflux>) -> StatusCode {
    fake.pings.fetch_add(1, Ordering::SeqCst);
    fake.ping_status
}

async fn write(
    State(fake): State<FakeInflux>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: String,
) -> StatusCode {
    let header_value = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    fake.writes.lock().unwrap().push(RecordedWrite {
        query,
        authorization: header_value(header::AUTHORIZATION),
        content_type: header_value(header::CONTENT_TYPE),
        body,
    });
    StatusCode::NO_CONTENT
}

/// An address where nothing is listening.
pub async fn closed_address() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{address}")
}

/// Accepts connections and holds them open without ever answering.
pub async fn silent_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });
    format!("http://{address}")
}

/// Polls `done` every 5ms for up to five seconds.
pub async fn wait_until(mut done: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !done() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
