//! Happy-path round trips and wire-level framing assertions.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use wirecall::{Client, ClientConfig, Context, Server, ServerConfig, Service, Status, StatusCode};
use wirecall_testkit::{MockRpcClient, MockRpcServer, Responder};

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

fn echo_service() -> Service {
    let mut svc = Service::new();
    svc.register_raw("echo", |_ctx, payload| {
        Box::pin(async move { (Status::ok(), payload.to_vec()) })
    });
    svc
}

async fn start_server(services: Vec<Service>) -> Arc<Server> {
    let server = Server::new(ServerConfig {
        listen_endpoint: "127.0.0.1:0".parse().unwrap(),
        ..ServerConfig::default()
    });
    for svc in services {
        server.register_service(svc).unwrap();
    }
    server.start().await.unwrap();
    server
}

fn client_for(server: &Server) -> Client {
    Client::new(ClientConfig::new(server.local_addr().unwrap()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// Scenario: echo with payload 0x01 0x02 0x03 and a 1 s deadline.
#[tokio::test]
async fn echo_round_trip() {
    let server = start_server(vec![echo_service()]).await;
    let client = client_for(&server);

    let mut ctx = Context::new();
    ctx.set_timeout(Duration::from_secs(1));
    let (status, payload) = client.invoke("echo", &ctx, &[0x01, 0x02, 0x03]).await;

    assert!(status.is_ok(), "status: {status}");
    assert_eq!(&payload[..], &[0x01, 0x02, 0x03]);

    client.stop().await;
    server.stop();
}

/// The request frame on the wire starts with the magic bytes and carries a
/// consistent length pair.
#[tokio::test]
async fn request_frame_begins_with_magic() {
    let mock = MockRpcServer::start(Responder::Echo).await.unwrap();
    let client = Client::new(ClientConfig::new(mock.local_addr()));

    let (status, _) = client.invoke("echo", &Context::new(), b"ping").await;
    assert!(status.is_ok());

    let heads = mock.request_heads();
    assert_eq!(heads.len(), 1);
    let head = heads[0];
    assert_eq!(head[0], 0x59); // 'Y'
    assert_eq!(head[1], 0x54); // 'T'
    let header_len = u16::from_le_bytes([head[2], head[3]]) as u32;
    let body_len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
    assert_eq!(body_len, header_len + 4, "payload is 4 bytes");

    client.stop().await;
}

/// The response head's req_id is copied verbatim from the request.
#[tokio::test]
async fn response_req_id_matches_request() {
    let server = start_server(vec![echo_service()]).await;
    let mut raw = MockRpcClient::connect(server.local_addr().unwrap())
        .await
        .unwrap();

    let (raw_head, rsp_head, payload) = raw.call(7777, "echo", b"abc").await.unwrap();
    assert_eq!(&raw_head[..2], b"YT");
    assert_eq!(rsp_head.req_id, 7777);
    assert_eq!(rsp_head.ret_code, 0);
    assert_eq!(payload, b"abc");

    server.stop();
}

/// Keepalive frames reach the server without producing any dispatch or
/// response.
#[tokio::test]
async fn keepalives_produce_no_response() {
    let server = start_server(vec![echo_service()]).await;
    let mut raw = MockRpcClient::connect(server.local_addr().unwrap())
        .await
        .unwrap();

    raw.send_keepalive().await.unwrap();
    raw.send_keepalive().await.unwrap();
    raw.send_keepalive().await.unwrap();

    // The only frame that ever comes back is the echo response.
    let (_, rsp_head, payload) = raw.call(1, "echo", b"after-keepalives").await.unwrap();
    assert_eq!(rsp_head.req_id, 1);
    assert_eq!(payload, b"after-keepalives");

    let extra = tokio::time::timeout(Duration::from_millis(200), raw.recv_response()).await;
    assert!(extra.is_err(), "keepalives must not generate replies");

    server.stop();
}

/// Keepalives interleaved into the response stream are skipped by the
/// client without disturbing correlation.
#[tokio::test]
async fn client_skips_interleaved_keepalives() {
    let mock = MockRpcServer::start(Responder::KeepaliveThenEcho).await.unwrap();
    let client = Client::new(ClientConfig::new(mock.local_addr()));

    let (status, payload) = client.invoke("echo", &Context::new(), b"payload").await;
    assert!(status.is_ok(), "status: {status}");
    assert_eq!(&payload[..], b"payload");

    client.stop().await;
}

// ---------------------------------------------------------------------------
// Typed layer
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct LoginReq {
    msg: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginRsp {
    msg: String,
}

#[tokio::test]
async fn typed_call_round_trip() {
    let mut svc = Service::new();
    svc.register("login", |_ctx, req: LoginReq| async move {
        (
            Status::ok(),
            LoginRsp {
                msg: format!("echo {}", req.msg),
            },
        )
    });
    let server = start_server(vec![svc]).await;
    let client = client_for(&server);

    let mut ctx = Context::new();
    ctx.set_timeout(Duration::from_secs(3));
    let (status, rsp): (_, Option<LoginRsp>) = client
        .call(
            "login",
            &ctx,
            &LoginReq {
                msg: "test msg".to_owned(),
            },
        )
        .await;

    assert!(status.is_ok(), "status: {status}");
    assert_eq!(rsp.unwrap().msg, "echo test msg");
    assert_eq!(status.ret(), StatusCode::Ok);

    client.stop().await;
    server.stop();
}

/// Context kv attachments arrive verbatim at the handler.
#[tokio::test]
async fn context_kv_reaches_the_handler() {
    let mut svc = Service::new();
    svc.register_raw("whoami", |ctx, _payload| {
        Box::pin(async move {
            let caller = ctx.value("caller").unwrap_or("nobody").to_owned();
            (Status::ok(), caller.into_bytes())
        })
    });
    let server = start_server(vec![svc]).await;
    let client = client_for(&server);

    let mut ctx = Context::new();
    ctx.set_value("caller", "integration-suite");
    let (status, payload) = client.invoke("whoami", &ctx, b"").await;

    assert!(status.is_ok());
    assert_eq!(&payload[..], b"integration-suite");

    client.stop().await;
    server.stop();
}
