//! RPC client: one endpoint, at most one live session at a time.
//!
//! Every call is multiplexed over the client's single TCP session, matched
//! to its response by a monotonically assigned request id. When the session
//! is lost, the next call transparently establishes a fresh one; request ids
//! keep counting across reconnects so an id is never reused.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};
use wirecall_protocol::{DEFAULT_MAX_RECV_SIZE, ReqHead, RspHead, Status, StatusCode};

use crate::buffer::BufferVec;
use crate::context::{Context, DoneCode};
use crate::lock;
use crate::session::{FrameReader, SessionError, encode_frame, send_loop};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Client configuration. Built with [`ClientConfig::new`]; fields below
/// their documented floors are clamped when the client is constructed.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// TCP endpoint of the server.
    pub server_endpoint: SocketAddr,
    /// Idle period after which the session emits a keepalive frame.
    /// Clamped to >= 100 ms.
    pub heartbeat_interval: Duration,
    /// Hard cap on a single inbound frame's body length.
    pub max_recv_size: usize,
}

impl ClientConfig {
    pub fn new(server_endpoint: SocketAddr) -> Self {
        Self {
            server_endpoint,
            heartbeat_interval: Duration::from_secs(60),
            max_recv_size: DEFAULT_MAX_RECV_SIZE,
        }
    }

    fn validated(mut self) -> Self {
        const MIN_HEARTBEAT: Duration = Duration::from_millis(100);
        if self.heartbeat_interval < MIN_HEARTBEAT {
            self.heartbeat_interval = MIN_HEARTBEAT;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct Client {
    cfg: ClientConfig,
    running: AtomicBool,
    req_id: AtomicU32,
    /// Current session, (re)created under this lock so only one connect is
    /// ever in flight.
    session: tokio::sync::Mutex<Option<Arc<Session>>>,
}

impl Client {
    pub fn new(cfg: ClientConfig) -> Self {
        Self {
            cfg: cfg.validated(),
            running: AtomicBool::new(true),
            req_id: AtomicU32::new(0),
            session: tokio::sync::Mutex::new(None),
        }
    }

    pub fn cfg(&self) -> &ClientConfig {
        &self.cfg
    }

    /// Invoke `func_name` with an opaque request payload.
    ///
    /// Resolves with exactly one of: the server's reply, a local `TIMEOUT`
    /// when the context deadline fires first, `CANCELLED` when the context
    /// is done, or `UNKNOWN` when the session fails underneath the call.
    pub async fn invoke(&self, func_name: &str, ctx: &Context, req: &[u8]) -> (Status, Bytes) {
        if ctx.is_done() {
            return (Status::new(StatusCode::Cancelled), Bytes::new());
        }
        if !self.running.load(Ordering::Acquire) {
            return (Status::new(StatusCode::CliIsNotRunning), Bytes::new());
        }

        let req_id = self.req_id.fetch_add(1, Ordering::Relaxed) + 1;
        let head = ReqHead {
            req_id,
            func: func_name.to_owned(),
            deadline_ms: ctx.deadline_unix_ms(),
            context_kv: ctx.kv().clone(),
        };
        let frame = match encode_frame(&head, req) {
            Ok(frame) => frame,
            Err(e) => {
                return (
                    Status::with_msg(StatusCode::Unknown, format!("serialize request head: {e}")),
                    Bytes::new(),
                );
            }
        };

        let session = match self.ensure_session().await {
            Ok(session) => session,
            Err(status) => return (status, Bytes::new()),
        };
        session.invoke(req_id, frame, ctx, func_name).await
    }

    /// Typed convenience over [`Client::invoke`]: serialize the request,
    /// invoke, parse the response.
    pub async fn call<Req, Rsp>(
        &self,
        func_name: &str,
        ctx: &Context,
        req: &Req,
    ) -> (Status, Option<Rsp>)
    where
        Req: Serialize,
        Rsp: DeserializeOwned,
    {
        let Ok(req_bytes) = serde_json::to_vec(req) else {
            return (Status::new(StatusCode::CliSerializeReqFailed), None);
        };
        let (status, payload) = self.invoke(func_name, ctx, &req_bytes).await;
        if status.ret() != StatusCode::Ok {
            return (status, None);
        }
        match serde_json::from_slice(&payload) {
            Ok(rsp) => (status, Some(rsp)),
            Err(_) => (Status::new(StatusCode::CliParseRspFailed), None),
        }
    }

    /// Idempotent teardown: stops the current session and fails every call
    /// issued afterwards with `CLI_IS_NOT_RUNNING`.
    pub async fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let session = self.session.lock().await.take();
        if let Some(session) = session {
            session.stop();
        }
    }

    /// Snapshot the current session, connecting a fresh one if it is absent
    /// or no longer running.
    async fn ensure_session(&self) -> Result<Arc<Session>, Status> {
        let mut guard = self.session.lock().await;
        if !self.running.load(Ordering::Acquire) {
            return Err(Status::new(StatusCode::CliIsNotRunning));
        }
        if let Some(session) = guard.as_ref() {
            if session.is_running() {
                return Ok(session.clone());
            }
        }
        match Session::connect(&self.cfg).await {
            Ok(session) => {
                *guard = Some(session.clone());
                Ok(session)
            }
            Err(e) => Err(Status::with_msg(
                StatusCode::Unknown,
                format!("connect {}: {e}", self.cfg.server_endpoint),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// A delivered reply, handed from the recv loop to the awaiting caller.
struct Reply {
    status: Status,
    payload: Bytes,
}

struct Session {
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    send_tx: mpsc::UnboundedSender<BufferVec>,
    /// Outstanding calls by request id. Completing the oneshot is the one
    /// and only wake signal a waiter gets from this side.
    outstanding: std::sync::Mutex<HashMap<u32, oneshot::Sender<Reply>>>,
}

impl Session {
    async fn connect(cfg: &ClientConfig) -> io::Result<Arc<Self>> {
        let stream = TcpStream::connect(cfg.server_endpoint).await?;
        let (rd, wr) = stream.into_split();
        debug!(endpoint = %cfg.server_endpoint, "client session connected");

        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let session = Arc::new(Self {
            running: AtomicBool::new(true),
            shutdown_tx,
            send_tx,
            outstanding: std::sync::Mutex::new(HashMap::new()),
        });

        let sender = session.clone();
        let heartbeat = cfg.heartbeat_interval;
        tokio::spawn(async move {
            if let Err(e) = send_loop(wr, send_rx, Some(heartbeat), sender.subscribe()).await {
                debug!(error = %e, "client session send loop ended");
            }
            sender.stop();
        });

        let receiver = session.clone();
        let max_recv_size = cfg.max_recv_size;
        tokio::spawn(async move {
            if let Err(e) = receiver.recv_loop(rd, max_recv_size).await {
                warn!(error = %e, "client session recv loop ended");
            }
            receiver.stop();
        });

        Ok(session)
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Idempotent: the first caller wakes the socket tasks and fails every
    /// outstanding call with `UNKNOWN`.
    fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let waiters: Vec<_> = lock(&self.outstanding).drain().collect();
        for (_, reply_tx) in waiters {
            let _ = reply_tx.send(Reply {
                status: Status::with_msg(StatusCode::Unknown, "session stopped"),
                payload: Bytes::new(),
            });
        }
    }

    /// Register the call, hand the frame to the send queue, then wait for
    /// whichever edge fires first: reply, context cancellation, deadline.
    async fn invoke(
        self: &Arc<Self>,
        req_id: u32,
        frame: BufferVec,
        ctx: &Context,
        func_name: &str,
    ) -> (Status, Bytes) {
        let (reply_tx, reply_rx) = oneshot::channel();
        lock(&self.outstanding).insert(req_id, reply_tx);

        // The entry above exists before any byte leaves, so a response can
        // never beat its own registration.
        if self.send_tx.send(frame).is_err() {
            lock(&self.outstanding).remove(&req_id);
            return (
                Status::with_msg(StatusCode::Unknown, "session stopped"),
                Bytes::new(),
            );
        }

        tokio::select! {
            biased;
            reply = reply_rx => match reply {
                Ok(reply) => (reply.status, reply.payload),
                Err(_) => (Status::new(StatusCode::Unknown), Bytes::new()),
            },
            () = ctx.done_signal() => {
                lock(&self.outstanding).remove(&req_id);
                (Status::new(StatusCode::Cancelled), Bytes::new())
            }
            () = deadline_sleep(ctx.deadline()) => {
                lock(&self.outstanding).remove(&req_id);
                ctx.done(DoneCode::Timeout, format!("call {func_name} timeout"));
                (Status::new(StatusCode::Timeout), Bytes::new())
            }
        }
    }

    async fn recv_loop(
        self: &Arc<Self>,
        mut rd: tokio::net::tcp::OwnedReadHalf,
        max_recv_size: usize,
    ) -> Result<(), SessionError> {
        let mut reader = FrameReader::new(max_recv_size);
        let mut shutdown = self.subscribe();
        loop {
            // Covers a stop() that landed before the subscription above.
            if *shutdown.borrow() {
                return Ok(());
            }
            while let Some(frame) = reader.pop_frame()? {
                if frame.head.is_keepalive() {
                    continue;
                }
                self.deliver(&frame);
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return Ok(());
                    }
                }
                read = reader.fill(&mut rd) => {
                    read?;
                }
            }
        }
    }

    /// Correlate one response frame with its waiter.
    fn deliver(&self, frame: &crate::session::Frame) {
        let head: RspHead = match serde_json::from_slice(&frame.header()) {
            Ok(head) => head,
            Err(e) => {
                warn!(error = %e, "undecodable response head, frame dropped");
                return;
            }
        };
        match lock(&self.outstanding).remove(&head.req_id) {
            Some(reply_tx) => {
                // Err means the waiter resolved through another edge and is
                // gone; the reply is dropped, matching timeout semantics.
                let _ = reply_tx.send(Reply {
                    status: Status::from_parts(head.ret_code, head.func_ret_code, head.func_ret_msg),
                    payload: frame.payload(),
                });
            }
            None => {
                debug!(req_id = head.req_id, "response with no outstanding call, dropped");
            }
        }
    }
}

/// Sleeps until the deadline; pends forever when there is none.
async fn deadline_sleep(deadline: Option<SystemTime>) {
    match deadline {
        Some(deadline) => {
            let remaining = deadline
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO);
            tokio::time::sleep(remaining).await;
        }
        None => std::future::pending().await,
    }
}
