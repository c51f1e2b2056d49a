// demo-server: a wirecall RPC server exposing a small login/logout demo
// service. Drive it with demo-client.

mod config;

use std::net::SocketAddr;
use std::path::Path;

use clap::{Arg, Command};
use serde::{Deserialize, Serialize};
use tracing::{error, info};
use wirecall::{Server, ServerConfig, Service, Status};

#[derive(Debug, Serialize, Deserialize)]
struct LoginReq {
    msg: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct LoginRsp {
    code: i32,
    msg: String,
}

fn demo_service() -> Service {
    let mut svc = Service::new();
    svc.register("login", |_ctx, req: LoginReq| async move {
        (
            Status::ok(),
            LoginRsp {
                code: 0,
                msg: format!("echo {}", req.msg),
            },
        )
    });
    svc.register("logout", |_ctx, req: LoginReq| async move {
        (
            Status::ok(),
            LoginRsp {
                code: 0,
                msg: format!("echo {}", req.msg),
            },
        )
    });
    svc
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "demo-server starting");

    let matches = Command::new("wirecall demo server")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Serves the wirecall demo service")
        .arg(
            Arg::new("config")
                .long("config")
                .help("Path to a TOML config file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .help("Bind address, overrides the config file. Eg. 0.0.0.0:55399")
                .value_name("ADDR"),
        )
        .get_matches();

    let mut cfg = match matches.get_one::<String>("config") {
        Some(path) => match config::load_config_from_path(Path::new(path)) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("FATAL: failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => ServerConfig::default(),
    };
    if let Some(listen) = matches.get_one::<String>("listen") {
        cfg.listen_endpoint = match listen.parse::<SocketAddr>() {
            Ok(addr) => addr,
            Err(_) => {
                eprintln!("FATAL: invalid listen address '{}'", listen);
                std::process::exit(1);
            }
        };
    }

    let server = Server::new(cfg);
    if let Err(e) = server.register_service(demo_service()) {
        error!(error = %e, "service registration failed");
        std::process::exit(1);
    }
    if let Err(e) = server.start().await {
        error!(error = %e, "server start failed");
        std::process::exit(1);
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("ctrl-c received, shutting down"),
        Err(e) => error!(error = %e, "signal listener failed, shutting down"),
    }
    server.stop();
}
