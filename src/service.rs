//! Function registration: a [`Service`] bundles named handlers for a server.
//!
//! Handlers are stored in byte-level form: `(ctx, payload) -> (Status, rsp
//! bytes)`. [`Service::register`] layers typed request/response messages on
//! top, so a handler written against its own serde types never sees the
//! wire; [`Service::register_raw`] exposes the byte-level form directly.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use wirecall_protocol::{Status, StatusCode};

use crate::context::Context;

/// Boxed handler future resolving to the reply status and payload bytes.
pub type HandlerFuture = Pin<Box<dyn Future<Output = (Status, Vec<u8>)> + Send>>;

/// A registered handler in byte-level form.
pub(crate) type HandlerFn = Arc<dyn Fn(Arc<Context>, Bytes) -> HandlerFuture + Send + Sync>;

/// A named bundle of RPC functions, registered with a server before start.
#[derive(Default)]
pub struct Service {
    // Kept as a list, not a map: duplicate names must survive until the
    // server's start-time merge so they can be rejected there.
    funcs: Vec<(String, HandlerFn)>,
}

impl Service {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a typed handler for `func_name`.
    ///
    /// The wrapper deserializes the request before invoking the handler
    /// (`SVR_PARSE_REQ_FAILED` without invoking it when that fails) and
    /// serializes the returned response (`SVR_SERIALIZE_RSP_FAILED` on
    /// failure, with an empty payload).
    pub fn register<Req, Rsp, F, Fut>(&mut self, func_name: impl Into<String>, handler: F)
    where
        Req: DeserializeOwned + Send + 'static,
        Rsp: Serialize + Send + 'static,
        F: Fn(Arc<Context>, Req) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = (Status, Rsp)> + Send + 'static,
    {
        let handler = Arc::new(handler);
        self.register_raw(func_name, move |ctx, payload: Bytes| {
            let handler = handler.clone();
            Box::pin(async move {
                let req: Req = match serde_json::from_slice(&payload) {
                    Ok(req) => req,
                    Err(_) => return (Status::new(StatusCode::SvrParseReqFailed), Vec::new()),
                };
                let (status, rsp) = handler.as_ref()(ctx, req).await;
                match serde_json::to_vec(&rsp) {
                    Ok(bytes) => (status, bytes),
                    Err(_) => (Status::new(StatusCode::SvrSerializeRspFailed), Vec::new()),
                }
            }) as HandlerFuture
        });
    }

    /// Register a handler operating directly on payload bytes.
    pub fn register_raw<F>(&mut self, func_name: impl Into<String>, handler: F)
    where
        F: Fn(Arc<Context>, Bytes) -> HandlerFuture + Send + Sync + 'static,
    {
        self.funcs.push((func_name.into(), Arc::new(handler)));
    }

    pub fn is_empty(&self) -> bool {
        self.funcs.is_empty()
    }

    pub(crate) fn into_entries(self) -> Vec<(String, HandlerFn)> {
        self.funcs
    }
}
