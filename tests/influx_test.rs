mod common;

use std::time::Duration;

use axum::http::StatusCode;
use teller::error::{ConnectError, ShipError};
use teller::shipper::{InfluxConfig, InfluxShipper, Precision, Ship};

use common::{closed_address, silent_server, spawn_fake_influx};

fn config(address: &str, batch_size: usize) -> InfluxConfig {
    let mut config = InfluxConfig::new("influx_test", address, "teller");
    config.batch_size = batch_size;
    config.flush_interval = Duration::from_secs(60);
    config.flush_jitter = Duration::ZERO;
    config.http_timeout = Duration::from_secs(2);
    config.precision = Precision::Ms;
    config
}

#[tokio::test]
async fn test_full_batch_flushes_once() {
    // Purpose: a full batch is written in one request
    // Validates:
    // - body is the newline joined batch in submission order
    // - db and precision are passed on the query string
    // - no auth header without credentials
    let fake = spawn_fake_influx(StatusCode::NO_CONTENT).await;
    let mut shipper = InfluxShipper::new(config(&fake.address, 3));
    shipper.connect().await.unwrap();
    shipper.start().unwrap();

    for metric in ["a", "b", "c"] {
        shipper.ship(metric.to_string()).await.unwrap();
    }
    let writes = fake.wait_for_writes(1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let writes_after = fake.writes();
    assert_eq!(writes_after.len(), 1);
    assert_eq!(writes[0].body, "a\nb\nc");
    assert_eq!(writes[0].query.get("db").map(String::as_str), Some("teller"));
    assert_eq!(writes[0].query.get("precision").map(String::as_str), Some("ms"));
    assert_eq!(
        writes[0].content_type.as_deref(),
        Some("application/x-www-form-urlencoded")
    );
    assert!(writes[0].authorization.is_none());

    shipper.stop().await;
    assert_eq!(fake.writes().len(), 1);
}

#[tokio::test]
async fn test_stop_flushes_partial_batch() {
    // Purpose: stopping with fewer than batch_size metrics queued
    // Validates:
    // - exactly one final flush with the queued metrics
    // - the shipper reports finished once stop returns
    let fake = spawn_fake_influx(StatusCode::NO_CONTENT).await;
    let mut shipper = InfluxShipper::new(config(&fake.address, 10));
    shipper.connect().await.unwrap();
    shipper.start().unwrap();

    shipper.ship("x".to_string()).await.unwrap();
    shipper.ship("y".to_string()).await.unwrap();
    assert!(!shipper.is_finished());
    shipper.stop().await;

    assert!(shipper.is_finished());
    let writes = fake.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].body, "x\ny");
}

#[tokio::test]
async fn test_flush_interval_flushes_small_batches() {
    let fake = spawn_fake_influx(StatusCode::NO_CONTENT).await;
    let mut config = config(&fake.address, 100);
    config.flush_interval = Duration::from_millis(50);
    let mut shipper = InfluxShipper::new(config);
    shipper.connect().await.unwrap();
    shipper.start().unwrap();

    shipper.ship("slow".to_string()).await.unwrap();
    let writes = fake.wait_for_writes(1).await;
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].body, "slow");

    shipper.stop().await;
    assert_eq!(fake.writes().len(), 1);
}

#[tokio::test]
async fn test_ship_after_stop_fails() {
    // Purpose: submissions after stop are rejected and never delivered
    let fake = spawn_fake_influx(StatusCode::NO_CONTENT).await;
    let mut shipper = InfluxShipper::new(config(&fake.address, 1));
    shipper.connect().await.unwrap();
    shipper.start().unwrap();
    let handle = shipper.handle();

    shipper.stop().await;
    shipper.stop().await;

    assert_eq!(
        shipper.ship("late".to_string()).await,
        Err(ShipError::Stopped("influx_test".to_string()))
    );
    assert!(handle.ship("late".to_string()).await.is_err());
    assert!(fake.writes().is_empty());
}

#[tokio::test]
async fn test_multiple_writers_share_the_queue() {
    // Purpose: N writers ping in order and together deliver every metric once
    let fake = spawn_fake_influx(StatusCode::NO_CONTENT).await;
    let mut config = config(&fake.address, 5);
    config.writers = 3;
    let mut shipper = InfluxShipper::new(config);
    shipper.connect().await.unwrap();
    assert_eq!(fake.pings(), 3);
    shipper.start().unwrap();

    for i in 0..50 {
        shipper.ship(format!("m{i}")).await.unwrap();
    }
    shipper.stop().await;

    let mut lines = fake.lines();
    lines.sort();
    let mut expected: Vec<String> = (0..50).map(|i| format!("m{i}")).collect();
    expected.sort();
    assert_eq!(lines, expected);
}

#[tokio::test]
async fn test_basic_auth_sent_with_credentials() {
    let fake = spawn_fake_influx(StatusCode::NO_CONTENT).await;
    let mut config = config(&fake.address, 1);
    config.username = "user".to_string();
    config.password = "pass".to_string();
    let mut shipper = InfluxShipper::new(config);
    shipper.connect().await.unwrap();
    shipper.start().unwrap();

    shipper.ship("auth".to_string()).await.unwrap();
    let writes = fake.wait_for_writes(1).await;
    // base64("user:pass")
    assert_eq!(writes[0].authorization.as_deref(), Some("Basic dXNlcjpwYXNz"));
    shipper.stop().await;
}

#[tokio::test]
async fn test_bad_ping_status_fails_connect() {
    // Purpose: a non success ping aborts connect and leaves the shipper stopped
    let fake = spawn_fake_influx(StatusCode::SERVICE_UNAVAILABLE).await;
    let mut config = config(&fake.address, 1);
    config.writers = 3;
    let mut shipper = InfluxShipper::new(config);

    let err = shipper.connect().await.unwrap_err();
    assert!(matches!(err, ConnectError::BadStatus { writer: 1, status: 503, .. }));
    assert_eq!(fake.pings(), 1);
    assert!(shipper.is_finished());
    assert!(shipper.ship("nope".to_string()).await.is_err());
    assert!(shipper.start().is_err());
}

#[tokio::test]
async fn test_unreachable_server_fails_connect() {
    let address = closed_address().await;
    let mut shipper = InfluxShipper::new(config(&address, 1));
    assert!(matches!(
        shipper.connect().await,
        Err(ConnectError::Ping { .. })
    ));
}

#[tokio::test]
async fn test_ping_times_out() {
    let address = silent_server().await;
    let mut config = config(&address, 1);
    config.http_timeout = Duration::from_millis(100);
    let mut shipper = InfluxShipper::new(config);

    let result = tokio::time::timeout(Duration::from_secs(5), shipper.connect())
        .await
        .expect("connect should time out on its own");
    assert!(matches!(result, Err(ConnectError::Ping { .. })));
}

#[tokio::test]
async fn test_start_requires_connect() {
    let mut shipper = InfluxShipper::new(config("http://localhost:1", 1));
    assert!(matches!(shipper.start(), Err(ConnectError::NotConnected(_))));
}
