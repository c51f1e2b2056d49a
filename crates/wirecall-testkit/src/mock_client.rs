use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use wirecall_protocol::{
    FRAME_HEAD_SIZE, FrameHead, KEEPALIVE_FRAME, NO_DEADLINE_MS, ReqHead, RspHead,
};

/// A TCP client speaking raw wirecall frames, for driving a real server
/// from tests without the client runtime in between.
pub struct MockRpcClient {
    stream: TcpStream,
}

impl MockRpcClient {
    pub async fn connect(addr: SocketAddr) -> io::Result<Self> {
        Ok(Self {
            stream: TcpStream::connect(addr).await?,
        })
    }

    /// Send one 8-byte keepalive frame.
    pub async fn send_keepalive(&mut self) -> io::Result<()> {
        self.stream.write_all(&KEEPALIVE_FRAME).await
    }

    /// Send arbitrary bytes, framing correctness included.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Send a request frame for `func` and wait for the next response frame.
    ///
    /// Returns the raw fixed head of the response (for wire assertions),
    /// the parsed response head, and the response payload.
    pub async fn call(
        &mut self,
        req_id: u32,
        func: &str,
        payload: &[u8],
    ) -> io::Result<([u8; FRAME_HEAD_SIZE], RspHead, Vec<u8>)> {
        self.send_request(req_id, func, payload).await?;
        self.recv_response().await
    }

    /// Send a request frame without waiting for anything.
    pub async fn send_request(
        &mut self,
        req_id: u32,
        func: &str,
        payload: &[u8],
    ) -> io::Result<()> {
        self.send_request_with_deadline(req_id, func, NO_DEADLINE_MS, payload)
            .await
    }

    /// Like [`MockRpcClient::send_request`] with an explicit wire deadline.
    pub async fn send_request_with_deadline(
        &mut self,
        req_id: u32,
        func: &str,
        deadline_ms: i64,
        payload: &[u8],
    ) -> io::Result<()> {
        let head = ReqHead {
            req_id,
            func: func.to_owned(),
            deadline_ms,
            context_kv: BTreeMap::new(),
        };
        let head_bytes = serde_json::to_vec(&head).map_err(io::Error::other)?;
        let frame_head = FrameHead::new(
            head_bytes.len() as u16,
            (head_bytes.len() + payload.len()) as u32,
        );
        self.stream.write_all(&frame_head.encode()).await?;
        self.stream.write_all(&head_bytes).await?;
        self.stream.write_all(payload).await
    }

    /// Read frames until a non-keepalive arrives and parse it as a response.
    pub async fn recv_response(
        &mut self,
    ) -> io::Result<([u8; FRAME_HEAD_SIZE], RspHead, Vec<u8>)> {
        loop {
            let mut head_buf = [0u8; FRAME_HEAD_SIZE];
            self.stream.read_exact(&mut head_buf).await?;
            let head = FrameHead::decode(&head_buf).map_err(io::Error::other)?;
            if head.is_keepalive() {
                continue;
            }
            let mut body = vec![0u8; head.body_len as usize];
            self.stream.read_exact(&mut body).await?;

            let rsp_head: RspHead = serde_json::from_slice(&body[..head.header_len as usize])
                .map_err(io::Error::other)?;
            let payload = body[head.header_len as usize..].to_vec();
            return Ok((head_buf, rsp_head, payload));
        }
    }
}
