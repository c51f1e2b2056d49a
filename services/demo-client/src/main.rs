// demo-client: drives the demo-server's login function in a loop and logs
// each status and response.

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use wirecall::{Client, ClientConfig, Context};

#[derive(Debug, Serialize, Deserialize)]
struct LoginReq {
    msg: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginRsp {
    code: i32,
    msg: String,
}

fn validate_socket_addr(value: &str) -> Result<SocketAddr, String> {
    value
        .parse::<SocketAddr>()
        .map_err(|_| "Invalid Socket Address".to_owned())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let matches = Command::new("wirecall demo client")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Calls the wirecall demo service")
        .arg(
            Arg::new("server")
                .help("The socket address of the server. Eg. 127.0.0.1:55399")
                .value_name("server_addr")
                .value_parser(validate_socket_addr)
                .default_value("127.0.0.1:55399"),
        )
        .arg(
            Arg::new("count")
                .long("count")
                .help("Number of calls to make")
                .value_parser(clap::value_parser!(u32))
                .default_value("10"),
        )
        .arg(
            Arg::new("timeout-ms")
                .long("timeout-ms")
                .help("Per-call timeout in milliseconds")
                .value_parser(clap::value_parser!(u64))
                .default_value("3000"),
        )
        .get_matches();

    let server = *matches.get_one::<SocketAddr>("server").unwrap();
    let count = *matches.get_one::<u32>("count").unwrap();
    let timeout_ms = *matches.get_one::<u64>("timeout-ms").unwrap();

    info!(%server, count, "demo-client starting");
    let client = Client::new(ClientConfig::new(server));

    for i in 0..count {
        let mut ctx = Context::new();
        ctx.set_timeout(Duration::from_millis(timeout_ms));

        let req = LoginReq {
            msg: format!("test msg {}", i),
        };
        let (status, rsp): (_, Option<LoginRsp>) = client.call("login", &ctx, &req).await;

        if status.is_ok() {
            let rsp = rsp.expect("ok status carries a response");
            info!(call = i, code = rsp.code, msg = %rsp.msg, "login ok");
        } else {
            warn!(call = i, status = %status, "login failed");
        }
    }

    client.stop().await;
}
