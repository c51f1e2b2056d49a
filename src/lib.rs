//! wirecall: bidirectional unary RPC over a single multiplexed TCP
//! connection.
//!
//! One [`Client`] holds one long-lived session to one server endpoint and
//! multiplexes any number of concurrent calls over it; a [`Server`] accepts
//! sessions and dispatches registered functions concurrently. Frames are
//! length-prefixed with a fixed 8-byte head, and every call resolves to a
//! [`Status`] plus opaque response bytes (or a typed message through the
//! serde-based convenience layer).
//!
//! ```no_run
//! use std::time::Duration;
//! use wirecall::{Client, ClientConfig, Context};
//!
//! # async fn demo() {
//! let client = Client::new(ClientConfig::new("127.0.0.1:55399".parse().unwrap()));
//! let mut ctx = Context::new();
//! ctx.set_timeout(Duration::from_secs(3));
//! let (status, rsp) = client.invoke("echo", &ctx, b"ping").await;
//! assert!(status.is_ok());
//! assert_eq!(&rsp[..], b"ping");
//! # }
//! ```

pub mod buffer;
pub mod client;
pub mod context;
pub mod server;
pub mod service;
mod session;

pub use client::{Client, ClientConfig};
pub use context::{Context, DoneCode};
pub use server::{Server, ServerConfig, ServerError};
pub use service::Service;
pub use wirecall_protocol::{Status, StatusCode};

// The protocol crate is part of the public API surface (frame constants,
// structured heads) for anyone speaking the wire format directly.
pub use wirecall_protocol as protocol;

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &std::sync::Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}
