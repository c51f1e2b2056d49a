//! RPC server: TCP acceptor, session pool, and request dispatch.
//!
//! Each accepted connection becomes a session running the shared send/recv
//! loops plus an idle supervisor. Decoded requests are dispatched as their
//! own tasks so one slow handler never blocks the session's socket; replies
//! are serialized into fresh buffers and queued back onto the session.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use wirecall_protocol::{DEFAULT_MAX_RECV_SIZE, ReqHead, RspHead, StatusCode};

use crate::context::Context;
use crate::lock;
use crate::service::{HandlerFn, Service};
use crate::session::{Frame, FrameReader, SessionError, encode_frame, send_loop};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Server configuration. Fields below their documented floors are clamped
/// when the server is constructed.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// TCP bind address.
    pub listen_endpoint: SocketAddr,
    /// Cap on concurrently accepted sessions.
    pub max_session_num: usize,
    /// Accept-throttle and session-reaper tick. Clamped to >= 100 ms.
    pub mgr_timer_dt: Duration,
    /// A session that sees no frame for this long is closed.
    /// Clamped to >= 10 s.
    pub max_no_data_duration: Duration,
    /// Hard cap on a single inbound frame's body length.
    pub max_recv_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_endpoint: SocketAddr::from(([0, 0, 0, 0], 55399)),
            max_session_num: 1_000_000,
            mgr_timer_dt: Duration::from_secs(10),
            max_no_data_duration: Duration::from_secs(300),
            max_recv_size: DEFAULT_MAX_RECV_SIZE,
        }
    }
}

impl ServerConfig {
    fn validated(mut self) -> Self {
        const MIN_MGR_DT: Duration = Duration::from_millis(100);
        const MIN_NO_DATA: Duration = Duration::from_secs(10);
        if self.max_session_num < 1 {
            self.max_session_num = 1;
        }
        if self.mgr_timer_dt < MIN_MGR_DT {
            self.mgr_timer_dt = MIN_MGR_DT;
        }
        if self.max_no_data_duration < MIN_NO_DATA {
            self.max_no_data_duration = MIN_NO_DATA;
        }
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("server already started")]
    AlreadyStarted,
    #[error("cannot register a service after start")]
    RegisterAfterStart,
    #[error("duplicate function registration: {0}")]
    DuplicateFunction(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

pub struct Server {
    cfg: ServerConfig,
    started: AtomicBool,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    pending_services: std::sync::Mutex<Vec<Service>>,
    sessions: std::sync::Mutex<Vec<Arc<Session>>>,
    local_addr: OnceLock<SocketAddr>,
}

impl Server {
    pub fn new(cfg: ServerConfig) -> Arc<Self> {
        Arc::new(Self {
            cfg: cfg.validated(),
            started: AtomicBool::new(false),
            running: AtomicBool::new(true),
            shutdown_tx: watch::channel(false).0,
            pending_services: std::sync::Mutex::new(Vec::new()),
            sessions: std::sync::Mutex::new(Vec::new()),
            local_addr: OnceLock::new(),
        })
    }

    pub fn cfg(&self) -> &ServerConfig {
        &self.cfg
    }

    /// The bound address, available once `start` has returned. Useful when
    /// binding to port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr.get().copied()
    }

    /// Queue a service's functions for the dispatch table.
    /// Must be called before [`Server::start`].
    pub fn register_service(&self, service: Service) -> Result<(), ServerError> {
        if self.started.load(Ordering::Acquire) {
            return Err(ServerError::RegisterAfterStart);
        }
        lock(&self.pending_services).push(service);
        Ok(())
    }

    /// Bind the listener and spawn the accept and reaper loops.
    ///
    /// The function table is frozen here; duplicate registrations are a
    /// configuration error and fail the start.
    pub async fn start(self: &Arc<Self>) -> Result<(), ServerError> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(ServerError::AlreadyStarted);
        }

        let mut funcs = HashMap::new();
        let services: Vec<Service> = lock(&self.pending_services).drain(..).collect();
        for service in services {
            for (name, handler) in service.into_entries() {
                if funcs.insert(name.clone(), handler).is_some() {
                    return Err(ServerError::DuplicateFunction(name));
                }
            }
        }
        let funcs = Arc::new(funcs);

        let listener = TcpListener::bind(self.cfg.listen_endpoint).await?;
        let addr = listener.local_addr()?;
        let _ = self.local_addr.set(addr);
        info!(%addr, funcs = funcs.len(), "server listening");

        tokio::spawn(self.clone().accept_loop(listener, funcs));
        tokio::spawn(self.clone().reaper_loop());
        Ok(())
    }

    /// Idempotent teardown: closes the acceptor and stops every session.
    pub fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
        let sessions: Vec<_> = lock(&self.sessions).drain(..).collect();
        for session in sessions {
            session.stop();
        }
        info!("server stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    async fn accept_loop(
        self: Arc<Self>,
        listener: TcpListener,
        funcs: Arc<HashMap<String, HandlerFn>>,
    ) {
        let mut shutdown = self.shutdown_tx.subscribe();
        let session_cfg = Arc::new(SessionCfg {
            max_no_data_duration: self.cfg.max_no_data_duration,
            max_recv_size: self.cfg.max_recv_size,
        });

        while self.is_running() {
            // At the session cap, retry after a management tick.
            if lock(&self.sessions).len() >= self.cfg.max_session_num {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {}
                    () = tokio::time::sleep(self.cfg.mgr_timer_dt) => {}
                }
                continue;
            }

            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let session =
                            Session::spawn(stream, peer, session_cfg.clone(), funcs.clone());
                        lock(&self.sessions).push(session);
                        debug!(%peer, "session accepted");
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                },
            }
        }
        debug!("accept loop exited");
    }

    /// Periodically drop sessions whose tasks have ended.
    async fn reaper_loop(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();
        while self.is_running() {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.cfg.mgr_timer_dt) => {
                    let mut sessions = lock(&self.sessions);
                    let before = sessions.len();
                    sessions.retain(|s| s.is_running());
                    let reaped = before - sessions.len();
                    drop(sessions);
                    if reaped > 0 {
                        debug!(reaped, "dead sessions reaped");
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct SessionCfg {
    max_no_data_duration: Duration,
    max_recv_size: usize,
}

struct Session {
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    send_tx: mpsc::UnboundedSender<crate::buffer::BufferVec>,
    /// Set by the recv loop on every frame; the idle supervisor clears it
    /// each tick and closes the session when it stays clear.
    tick_has_data: AtomicBool,
    peer: SocketAddr,
}

impl Session {
    fn spawn(
        stream: TcpStream,
        peer: SocketAddr,
        cfg: Arc<SessionCfg>,
        funcs: Arc<HashMap<String, HandlerFn>>,
    ) -> Arc<Self> {
        let (rd, wr) = stream.into_split();
        let (send_tx, send_rx) = mpsc::unbounded_channel();
        let session = Arc::new(Self {
            running: AtomicBool::new(true),
            shutdown_tx: watch::channel(false).0,
            send_tx,
            tick_has_data: AtomicBool::new(false),
            peer,
        });

        let sender = session.clone();
        tokio::spawn(async move {
            let shutdown = sender.shutdown_tx.subscribe();
            if let Err(e) = send_loop(wr, send_rx, None, shutdown).await {
                debug!(peer = %sender.peer, error = %e, "server session send loop ended");
            }
            sender.stop();
        });

        let receiver = session.clone();
        let recv_cfg = cfg.clone();
        tokio::spawn(async move {
            if let Err(e) = receiver.recv_loop(rd, recv_cfg, funcs).await {
                debug!(peer = %receiver.peer, error = %e, "server session recv loop ended");
            }
            receiver.stop();
        });

        let supervisor = session.clone();
        tokio::spawn(async move {
            supervisor.idle_supervisor(cfg.max_no_data_duration).await;
            supervisor.stop();
        });

        session
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn stop(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let _ = self.shutdown_tx.send(true);
    }

    async fn recv_loop(
        self: &Arc<Self>,
        mut rd: tokio::net::tcp::OwnedReadHalf,
        cfg: Arc<SessionCfg>,
        funcs: Arc<HashMap<String, HandlerFn>>,
    ) -> Result<(), SessionError> {
        let mut reader = FrameReader::new(cfg.max_recv_size);
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            // Covers a stop() that landed before the subscription above.
            if *shutdown.borrow() {
                return Ok(());
            }
            while let Some(frame) = reader.pop_frame()? {
                self.tick_has_data.store(true, Ordering::Relaxed);
                if frame.head.is_keepalive() {
                    continue;
                }
                // Handlers run on the general executor, never on the
                // session's socket tasks.
                tokio::spawn(dispatch(self.clone(), funcs.clone(), frame));
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

    /// Close the session after a full interval with no inbound frame.
    async fn idle_supervisor(&self, max_no_data: Duration) {
        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                () = tokio::time::sleep(max_no_data) => {
                    if !self.tick_has_data.swap(false, Ordering::Relaxed) {
                        info!(
                            peer = %self.peer,
                            timeout_ms = max_no_data.as_millis() as u64,
                            "session idle, closing"
                        );
                        return;
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// Handle one decoded request frame: look up the function, run the handler,
/// and queue the reply onto the session.
async fn dispatch(
    session: Arc<Session>,
    funcs: Arc<HashMap<String, HandlerFn>>,
    frame: Frame,
) {
    let head: ReqHead = match serde_json::from_slice(&frame.header()) {
        Ok(head) => head,
        Err(e) => {
            warn!(peer = %session.peer, error = %e, "undecodable request head, frame dropped");
            return;
        }
    };

    let mut rsp_head = RspHead {
        req_id: head.req_id,
        ret_code: StatusCode::Ok as i32,
        func_ret_code: 0,
        func_ret_msg: String::new(),
    };
    let mut rsp_payload = Vec::new();

    match funcs.get(&head.func) {
        None => {
            debug!(func = %head.func, "function not registered");
            rsp_head.ret_code = StatusCode::NotFound as i32;
        }
        Some(handler) => {
            let ctx = Arc::new(Context::from_wire(head.deadline_ms, head.context_kv));
            if ctx.timeout().is_some_and(|t| t.is_zero()) {
                // Deadline already passed in transit; the caller has given
                // up, skip the handler.
                rsp_head.ret_code = StatusCode::Timeout as i32;
            } else {
                // Spawned so a handler panic is contained by the join.
                let fut = handler.as_ref()(ctx, frame.payload());
                match tokio::spawn(fut).await {
                    Ok((status, payload)) => {
                        rsp_head.ret_code = status.ret() as i32;
                        rsp_head.func_ret_code = status.func_ret();
                        rsp_head.func_ret_msg = status.func_ret_msg().to_owned();
                        rsp_payload = payload;
                    }
                    Err(e) => {
                        warn!(func = %head.func, "handler panicked");
                        rsp_head.ret_code = StatusCode::Unknown as i32;
                        rsp_head.func_ret_msg = panic_message(e);
                    }
                }
            }
        }
    }

    match encode_frame(&rsp_head, &rsp_payload) {
        Ok(buf) => {
            // A send error means the session is stopping; the reply is
            // dropped with it.
            let _ = session.send_tx.send(buf);
        }
        Err(e) => {
            error!(req_id = head.req_id, error = %e, "serialize response head failed");
        }
    }
}

fn panic_message(e: JoinError) -> String {
    match e.try_into_panic() {
        Ok(panic) => {
            if let Some(s) = panic.downcast_ref::<&str>() {
                (*s).to_owned()
            } else if let Some(s) = panic.downcast_ref::<String>() {
                s.clone()
            } else {
                "handler panicked".to_owned()
            }
        }
        Err(_) => "handler cancelled".to_owned(),
    }
}
