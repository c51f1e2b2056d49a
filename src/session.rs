//! Transport machinery shared by the client and server sessions.
//!
//! Both sides of a connection run the same two socket tasks: a send loop
//! draining an unbounded queue of [`BufferVec`]s with gather-writes, and a
//! recv loop slicing frames out of an adaptive read buffer. What differs —
//! connection establishment, correlation vs dispatch, who emits keepalives —
//! stays in `client.rs` and `server.rs`.

use std::io::{self, IoSlice};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tracing::debug;
use wirecall_protocol::{FRAME_HEAD_SIZE, FrameError, FrameHead, KEEPALIVE_FRAME};

use crate::buffer::{BufferVec, FrameWriter};

#[derive(Debug, thiserror::Error)]
pub(crate) enum SessionError {
    #[error("socket: {0}")]
    Io(#[from] io::Error),
    #[error("framing: {0}")]
    Frame(#[from] FrameError),
    #[error("peer closed the connection")]
    PeerClosed,
}

// ---------------------------------------------------------------------------
// Frame assembly
// ---------------------------------------------------------------------------

/// Serialize `head` (and `payload`) into a ready-to-send [`BufferVec`]:
/// reserved 8-byte prefix, structured head, payload, lengths patched in.
pub(crate) fn encode_frame<H: Serialize>(
    head: &H,
    payload: &[u8],
) -> Result<BufferVec, serde_json::Error> {
    let mut buf = BufferVec::new();
    let mut w = FrameWriter::new(&mut buf);
    w.init_head(FRAME_HEAD_SIZE);

    serde_json::to_writer(&mut w, head)?;
    let header_len = (w.byte_count() - FRAME_HEAD_SIZE) as u16;

    // The payload is already opaque bytes; io::Write into the chunk tails.
    // Writing to a FrameWriter cannot fail.
    let _ = io::Write::write_all(&mut w, payload);
    let body_len = (w.byte_count() - FRAME_HEAD_SIZE) as u32;

    w.patch_head(&FrameHead::new(header_len, body_len).encode());
    w.finish();
    Ok(buf)
}

/// One complete inbound frame, backed by a refcounted slice of the read
/// buffer so the recv loop can keep reading while this frame is processed.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    pub head: FrameHead,
    bytes: Bytes,
}

impl Frame {
    /// The serialized structured head.
    pub fn header(&self) -> Bytes {
        self.bytes
            .slice(FRAME_HEAD_SIZE..FRAME_HEAD_SIZE + self.head.header_len as usize)
    }

    /// The opaque payload after the structured head.
    pub fn payload(&self) -> Bytes {
        self.bytes
            .slice(FRAME_HEAD_SIZE + self.head.header_len as usize..)
    }
}

/// Adaptive frame reassembly over a byte stream.
///
/// The read buffer starts at 256 bytes, doubles when reads fill it, halves
/// when under-utilised, and grows to fit any single frame up to
/// `max_recv_size`; a frame beyond the cap is a fatal framing error.
pub(crate) struct FrameReader {
    buf: BytesMut,
    cap: usize,
    max_recv_size: usize,
}

impl FrameReader {
    const MIN_CAP: usize = 256;

    pub fn new(max_recv_size: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(Self::MIN_CAP),
            cap: Self::MIN_CAP,
            max_recv_size,
        }
    }

    /// Read once from `rd` into the buffer, then adjust the target capacity
    /// for the next read based on how full this one ran.
    pub async fn fill<R: AsyncRead + Unpin>(&mut self, rd: &mut R) -> Result<usize, SessionError> {
        let want = self.cap.saturating_sub(self.buf.len()).max(FRAME_HEAD_SIZE);
        self.buf.reserve(want);
        let n = rd.read_buf(&mut self.buf).await?;
        if n == 0 {
            return Err(SessionError::PeerClosed);
        }

        let total = self.buf.len();
        if total < self.cap / 2 {
            self.cap = (self.cap / 2).max(Self::MIN_CAP);
        } else if total >= self.cap {
            self.cap = (self.cap * 2).min(self.max_recv_size.max(Self::MIN_CAP));
        }
        Ok(n)
    }

    /// Slice the next complete frame off the front of the buffer, if any.
    ///
    /// Returns `Ok(None)` when more bytes are needed; raises the capacity
    /// target first so the pending frame will fit on the next read.
    pub fn pop_frame(&mut self) -> Result<Option<Frame>, FrameError> {
        if self.buf.len() < FRAME_HEAD_SIZE {
            return Ok(None);
        }
        let head = FrameHead::decode(&self.buf[..FRAME_HEAD_SIZE])?;
        let frame_len = FRAME_HEAD_SIZE + head.body_len as usize;
        if frame_len > self.max_recv_size {
            return Err(FrameError::Oversize {
                body_len: u64::from(head.body_len),
                max: self.max_recv_size as u64,
            });
        }
        if self.buf.len() < frame_len {
            self.cap = self.cap.max(frame_len);
            return Ok(None);
        }
        let bytes = self.buf.split_to(frame_len).freeze();
        Ok(Some(Frame { head, bytes }))
    }
}

// ---------------------------------------------------------------------------
// Send loop
// ---------------------------------------------------------------------------

/// Write every chunk of `buf` with as few syscalls as the socket allows.
async fn write_buffer_vec<W: AsyncWrite + Unpin>(
    wr: &mut W,
    buf: &BufferVec,
) -> io::Result<()> {
    let mut slices: Vec<IoSlice<'_>> = buf
        .chunks()
        .iter()
        .filter(|c| !c.is_empty())
        .map(|c| IoSlice::new(c))
        .collect();
    let mut rest = &mut slices[..];
    while !rest.is_empty() {
        let n = wr.write_vectored(rest).await?;
        if n == 0 {
            return Err(io::ErrorKind::WriteZero.into());
        }
        IoSlice::advance_slices(&mut rest, n);
    }
    Ok(())
}

/// Drain the send queue until shutdown, gather-writing everything queued in
/// one pass. With `keepalive` set (client side), an idle period of that
/// length emits one keepalive frame; without it (server side) the loop just
/// parks until woken by a new buffer or shutdown.
pub(crate) async fn send_loop<W: AsyncWrite + Unpin>(
    mut wr: W,
    mut rx: mpsc::UnboundedReceiver<BufferVec>,
    keepalive: Option<Duration>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SessionError> {
    let mut pending = BufferVec::new();
    loop {
        // A shutdown signalled before we subscribed would never trigger
        // changed(); the flag check covers that window.
        if *shutdown.borrow() {
            return Ok(());
        }
        // Coalesce everything currently queued into one gather-write.
        while let Ok(more) = rx.try_recv() {
            pending.merge_from(more);
        }
        if !pending.is_empty() {
            let mut local = BufferVec::new();
            local.swap(&mut pending);
            write_buffer_vec(&mut wr, &local).await?;
            debug!(bytes = local.total_len(), "frames written");
            continue;
        }

        tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            queued = rx.recv() => match queued {
                Some(buf) => pending.merge_from(buf),
                None => return Ok(()),
            },
            () = idle_tick(keepalive) => {
                wr.write_all(&KEEPALIVE_FRAME).await?;
                debug!("keepalive written");
            }
        }
    }
}

/// Completes after the keepalive interval, or never on the server side.
async fn idle_tick(keepalive: Option<Duration>) {
    match keepalive {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}
