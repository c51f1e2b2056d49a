//! Connection loss and recovery: the client transparently replaces a dead
//! session on the next call.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use wirecall::{Client, ClientConfig, Context, Server, ServerConfig, Service, Status, StatusCode};

fn echo_service() -> Service {
    let mut svc = Service::new();
    svc.register_raw("echo", |_ctx, payload| {
        Box::pin(async move { (Status::ok(), payload.to_vec()) })
    });
    svc
}

async fn start_server_at(addr: SocketAddr) -> Arc<Server> {
    let server = Server::new(ServerConfig {
        listen_endpoint: addr,
        ..ServerConfig::default()
    });
    server.register_service(echo_service()).unwrap();
    server.start().await.unwrap();
    server
}

/// Scenario: call, restart the server, call again; the second call succeeds
/// over a fresh session without any explicit reconnect.
#[tokio::test]
async fn client_reconnects_after_server_restart() {
    let server1 = start_server_at("127.0.0.1:0".parse().unwrap()).await;
    let addr = server1.local_addr().unwrap();
    let client = Client::new(ClientConfig::new(addr));

    let (status, payload) = client.invoke("echo", &Context::new(), b"first").await;
    assert!(status.is_ok(), "status: {status}");
    assert_eq!(&payload[..], b"first");

    server1.stop();
    // Let the client's session observe the close.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let server2 = start_server_at(addr).await;

    let (status, payload) = client.invoke("echo", &Context::new(), b"second").await;
    assert!(status.is_ok(), "status after restart: {status}");
    assert_eq!(&payload[..], b"second");

    client.stop().await;
    server2.stop();
}

/// While the server is down a call fails locally; once it is back, the same
/// client recovers.
#[tokio::test]
async fn call_fails_while_down_then_recovers() {
    let server1 = start_server_at("127.0.0.1:0".parse().unwrap()).await;
    let addr = server1.local_addr().unwrap();
    let client = Client::new(ClientConfig::new(addr));

    let (status, _) = client.invoke("echo", &Context::new(), b"warmup").await;
    assert!(status.is_ok());

    server1.stop();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (status, _) = client.invoke("echo", &Context::new(), b"into the void").await;
    assert_eq!(status.ret(), StatusCode::Unknown, "status: {status}");

    let server2 = start_server_at(addr).await;
    let (status, payload) = client.invoke("echo", &Context::new(), b"back").await;
    assert!(status.is_ok(), "status after recovery: {status}");
    assert_eq!(&payload[..], b"back");

    client.stop().await;
    server2.stop();
}
