use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::debug;
use wirecall_protocol::{FRAME_HEAD_SIZE, FrameHead, ReqHead, RspHead};

/// How the mock server answers request frames.
#[derive(Debug, Clone, Copy)]
pub enum Responder {
    /// Reply `OK` with the request payload echoed back.
    Echo,
    /// Reply `OK` with a zero-filled payload of this many bytes,
    /// regardless of the request.
    Blob(usize),
    /// Send one keepalive frame, then echo. Exercises peers that must skip
    /// keepalives interleaved with responses.
    KeepaliveThenEcho,
}

/// A TCP server speaking raw wirecall frames.
///
/// Accepts any number of connections; every request frame is answered per
/// the configured [`Responder`]. Keepalive frames are counted and the fixed
/// head of every received request is captured for wire-level assertions.
pub struct MockRpcServer {
    local_addr: SocketAddr,
    keepalives: Arc<AtomicUsize>,
    request_heads: Arc<Mutex<Vec<[u8; FRAME_HEAD_SIZE]>>>,
}

impl MockRpcServer {
    pub async fn start(responder: Responder) -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let local_addr = listener.local_addr()?;
        let keepalives = Arc::new(AtomicUsize::new(0));
        let request_heads = Arc::new(Mutex::new(Vec::new()));

        let ka = keepalives.clone();
        let heads = request_heads.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "mock server accepted");
                        tokio::spawn(serve_conn(stream, responder, ka.clone(), heads.clone()));
                    }
                    Err(e) => {
                        debug!(error = %e, "mock server accept failed");
                        break;
                    }
                }
            }
        });

        Ok(Self {
            local_addr,
            keepalives,
            request_heads,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Keepalive frames received so far, across all connections.
    pub fn keepalive_count(&self) -> usize {
        self.keepalives.load(Ordering::SeqCst)
    }

    /// Fixed heads of every request frame received so far.
    pub fn request_heads(&self) -> Vec<[u8; FRAME_HEAD_SIZE]> {
        self.request_heads.lock().unwrap().clone()
    }
}

async fn serve_conn(
    mut stream: TcpStream,
    responder: Responder,
    keepalives: Arc<AtomicUsize>,
    request_heads: Arc<Mutex<Vec<[u8; FRAME_HEAD_SIZE]>>>,
) {
    loop {
        let mut head_buf = [0u8; FRAME_HEAD_SIZE];
        if stream.read_exact(&mut head_buf).await.is_err() {
            return;
        }
        let head = match FrameHead::decode(&head_buf) {
            Ok(head) => head,
            Err(e) => {
                debug!(error = %e, "mock server got a bad head, closing");
                return;
            }
        };
        if head.is_keepalive() {
            keepalives.fetch_add(1, Ordering::SeqCst);
            continue;
        }

        let mut body = vec![0u8; head.body_len as usize];
        if stream.read_exact(&mut body).await.is_err() {
            return;
        }
        request_heads.lock().unwrap().push(head_buf);

        let req_head: ReqHead = match serde_json::from_slice(&body[..head.header_len as usize]) {
            Ok(h) => h,
            Err(e) => {
                debug!(error = %e, "mock server could not parse a request head");
                return;
            }
        };
        let req_payload = &body[head.header_len as usize..];

        let rsp_head = RspHead {
            req_id: req_head.req_id,
            ret_code: 0,
            func_ret_code: 0,
            func_ret_msg: String::new(),
        };
        let rsp_payload = match responder {
            Responder::Echo => req_payload.to_vec(),
            Responder::Blob(n) => vec![0u8; n],
            Responder::KeepaliveThenEcho => {
                if stream.write_all(&wirecall_protocol::KEEPALIVE_FRAME).await.is_err() {
                    return;
                }
                req_payload.to_vec()
            }
        };
        if write_frame(&mut stream, &rsp_head, &rsp_payload).await.is_err() {
            return;
        }
    }
}

async fn write_frame(
    stream: &mut TcpStream,
    head: &RspHead,
    payload: &[u8],
) -> io::Result<()> {
    let head_bytes = serde_json::to_vec(head).map_err(io::Error::other)?;
    let frame_head = FrameHead::new(
        head_bytes.len() as u16,
        (head_bytes.len() + payload.len()) as u32,
    );
    stream.write_all(&frame_head.encode()).await?;
    stream.write_all(&head_bytes).await?;
    stream.write_all(payload).await?;
    Ok(())
}
