//! Error-path scenarios: unknown functions, parse failures, handler
//! panics, user-level errors, oversize responses.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wirecall::{Client, ClientConfig, Context, Server, ServerConfig, Service, Status, StatusCode};
use wirecall_testkit::{MockRpcServer, Responder};

async fn start_server(svc: Service) -> Arc<Server> {
    let server = Server::new(ServerConfig {
        listen_endpoint: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    });
    server.register_service(svc).unwrap();
    server.start().await.unwrap();
    server
}

fn client_for(server: &Server) -> Client {
    Client::new(ClientConfig::new(server.local_addr().unwrap()))
}

#[derive(Debug, Serialize, Deserialize)]
struct StrictReq {
    number: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct StrictRsp {
    doubled: u64,
}

/// Scenario: the invoked name has no registration.
#[tokio::test]
async fn unknown_function_returns_not_found() {
    let server = start_server(Service::new()).await;
    let client = client_for(&server);

    let mut ctx = Context::new();
    ctx.set_timeout(Duration::from_secs(1));
    let (status, payload) = client.invoke("nonexistent", &ctx, b"x").await;

    assert_eq!(status.ret(), StatusCode::NotFound);
    assert!(payload.is_empty());

    client.stop().await;
    server.stop();
}

/// Scenario: the payload does not decode to the handler's request type;
/// the handler must not run.
#[tokio::test]
async fn undecodable_payload_returns_parse_failed() {
    static INVOKED: AtomicBool = AtomicBool::new(false);

    let mut svc = Service::new();
    svc.register("double", |_ctx, req: StrictReq| async move {
        INVOKED.store(true, Ordering::SeqCst);
        (
            Status::ok(),
            StrictRsp {
                doubled: req.number * 2,
            },
        )
    });
    let server = start_server(svc).await;
    let client = client_for(&server);

    let (status, payload) = client
        .invoke("double", &Context::new(), b"\xff\xfe not json")
        .await;

    assert_eq!(status.ret(), StatusCode::SvrParseReqFailed);
    assert!(payload.is_empty());
    assert!(!INVOKED.load(Ordering::SeqCst), "handler must not be invoked");

    client.stop().await;
    server.stop();
}

/// A panicking handler is reported as UNKNOWN with the panic text, and the
/// session keeps serving other calls.
#[tokio::test]
async fn handler_panic_reports_unknown() {
    let mut svc = Service::new();
    svc.register_raw("explode", |_ctx, _payload| {
        Box::pin(async move { panic!("boom: handler bug") })
    });
    svc.register_raw("echo", |_ctx, payload| {
        Box::pin(async move { (Status::ok(), payload.to_vec()) })
    });
    let server = start_server(svc).await;
    let client = client_for(&server);

    let (status, _) = client.invoke("explode", &Context::new(), b"").await;
    assert_eq!(status.ret(), StatusCode::Unknown);
    assert!(
        status.func_ret_msg().contains("boom"),
        "panic text should be carried: {status}"
    );

    // Same session still works.
    let (status, payload) = client.invoke("echo", &Context::new(), b"still alive").await;
    assert!(status.is_ok());
    assert_eq!(&payload[..], b"still alive");

    client.stop().await;
    server.stop();
}

/// A user-level error passes through untouched: framework code stays OK.
#[tokio::test]
async fn user_error_passes_through() {
    let mut svc = Service::new();
    svc.register("login", |_ctx, _req: StrictReq| async move {
        (Status::app(42, "bad credentials"), StrictRsp { doubled: 0 })
    });
    let server = start_server(svc).await;
    let client = client_for(&server);

    let (status, rsp): (_, Option<StrictRsp>) =
        client.call("login", &Context::new(), &StrictReq { number: 1 }).await;

    assert!(!status.is_ok());
    assert_eq!(status.ret(), StatusCode::Ok);
    assert_eq!(status.func_ret(), 42);
    assert_eq!(status.func_ret_msg(), "bad credentials");
    assert_eq!(rsp.unwrap().doubled, 0);

    client.stop().await;
    server.stop();
}

/// Scenario: the peer replies with a frame above the client's receive cap;
/// the session closes with a framing error and the pending call observes
/// UNKNOWN.
#[tokio::test]
async fn oversize_response_fails_the_call_with_unknown() {
    let mock = MockRpcServer::start(Responder::Blob(2048)).await.unwrap();
    let client = Client::new(ClientConfig {
        max_recv_size: 1024,
        ..ClientConfig::new(mock.local_addr())
    });

    let mut ctx = Context::new();
    ctx.set_timeout(Duration::from_secs(5));
    let (status, payload) = client.invoke("echo", &ctx, b"small request").await;

    assert_eq!(status.ret(), StatusCode::Unknown);
    assert!(payload.is_empty());

    client.stop().await;
}

/// A later call after a framing failure transparently uses a new session.
#[tokio::test]
async fn session_recovers_after_oversize_failure() {
    let mock = MockRpcServer::start(Responder::Blob(2048)).await.unwrap();
    let client = Client::new(ClientConfig {
        max_recv_size: 4096,
        ..ClientConfig::new(mock.local_addr())
    });

    // First warm up a healthy session, then break it from a second client
    // configured with a tiny cap against the same mock.
    let (status, payload) = client.invoke("blob", &Context::new(), b"x").await;
    assert!(status.is_ok());
    assert_eq!(payload.len(), 2048);

    let strict = Client::new(ClientConfig {
        max_recv_size: 64,
        ..ClientConfig::new(mock.local_addr())
    });
    let (status, _) = strict.invoke("blob", &Context::new(), b"x").await;
    assert_eq!(status.ret(), StatusCode::Unknown);

    // The strict client reconnects on the next call and fails the same way,
    // proving the dead session was replaced rather than reused.
    let (status, _) = strict.invoke("blob", &Context::new(), b"x").await;
    assert_eq!(status.ret(), StatusCode::Unknown);

    client.stop().await;
    strict.stop().await;
}
