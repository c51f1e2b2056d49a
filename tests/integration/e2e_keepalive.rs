//! Keepalive emission: an idle client session keeps the connection warm
//! with 8-byte keepalive frames at the configured interval.

use std::time::Duration;

use wirecall::{Client, ClientConfig, Context};
use wirecall_testkit::{MockRpcServer, Responder};

/// Scenario: heartbeat_interval = 200 ms, one second idle. At least three
/// keepalives must arrive, and the session still serves calls afterwards.
#[tokio::test]
async fn idle_session_emits_keepalives() {
    let mock = MockRpcServer::start(Responder::Echo).await.unwrap();
    let client = Client::new(ClientConfig {
        heartbeat_interval: Duration::from_millis(200),
        ..ClientConfig::new(mock.local_addr())
    });

    // First call establishes the session.
    let (status, _) = client.invoke("echo", &Context::new(), b"warmup").await;
    assert!(status.is_ok(), "status: {status}");

    tokio::time::sleep(Duration::from_millis(1100)).await;

    let count = mock.keepalive_count();
    assert!(count >= 3, "expected at least 3 keepalives, saw {count}");

    let (status, payload) = client.invoke("echo", &Context::new(), b"after idle").await;
    assert!(status.is_ok(), "status after idle: {status}");
    assert_eq!(&payload[..], b"after idle");

    client.stop().await;
}

/// Traffic resets the idle timer: a busy session sends few or no
/// keepalives.
#[tokio::test]
async fn busy_session_stays_quiet() {
    let mock = MockRpcServer::start(Responder::Echo).await.unwrap();
    let client = Client::new(ClientConfig {
        heartbeat_interval: Duration::from_millis(200),
        ..ClientConfig::new(mock.local_addr())
    });

    // Call every 50 ms for a second; the 200 ms idle timer never expires.
    for i in 0u32..20 {
        let (status, _) = client
            .invoke("echo", &Context::new(), &i.to_le_bytes())
            .await;
        assert!(status.is_ok());
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    // Allow one stray keepalive for scheduler hiccups on loaded machines.
    let count = mock.keepalive_count();
    assert!(count <= 1, "busy session must not heartbeat, saw {count}");

    client.stop().await;
}
