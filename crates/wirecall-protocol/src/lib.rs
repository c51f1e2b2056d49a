// wirecall-protocol: wire-level types for the wirecall RPC protocol.
//
// Everything whose layout is visible on the wire lives in this crate: the
// fixed 8-byte frame head, the structured request/response heads carried
// inside each frame, and the status taxonomy returned with every reply.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Fixed frame head
// ---------------------------------------------------------------------------

/// Every frame starts with these two bytes.
pub const FRAME_MAGIC: [u8; 2] = *b"YT";

/// Size of the fixed frame head:
/// `| 2 byte magic | 2 byte header_len (LE) | 4 byte body_len (LE) |`.
pub const FRAME_HEAD_SIZE: usize = 8;

/// A complete keepalive frame: fixed head with `body_len == 0`, nothing else.
pub const KEEPALIVE_FRAME: [u8; FRAME_HEAD_SIZE] = [b'Y', b'T', 0, 0, 0, 0, 0, 0];

/// Default cap on a single frame's `body_len` (10 MiB).
pub const DEFAULT_MAX_RECV_SIZE: usize = 10 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid frame magic: {0:#04x} {1:#04x}")]
    BadMagic(u8, u8),
    #[error("frame body of {body_len} bytes exceeds the {max} byte receive cap")]
    Oversize { body_len: u64, max: u64 },
    #[error("header_len {header_len} exceeds body_len {body_len}")]
    HeaderOverrun { header_len: u16, body_len: u32 },
}

/// The decoded fixed head of one frame.
///
/// `body_len` counts the structured header plus the payload; the payload
/// length is therefore `body_len - header_len`. A head with `body_len == 0`
/// is a keepalive and carries nothing after the fixed head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHead {
    pub header_len: u16,
    pub body_len: u32,
}

impl FrameHead {
    pub fn new(header_len: u16, body_len: u32) -> Self {
        Self {
            header_len,
            body_len,
        }
    }

    pub fn is_keepalive(&self) -> bool {
        self.body_len == 0
    }

    pub fn encode(&self) -> [u8; FRAME_HEAD_SIZE] {
        let mut buf = [0u8; FRAME_HEAD_SIZE];
        buf[0..2].copy_from_slice(&FRAME_MAGIC);
        buf[2..4].copy_from_slice(&self.header_len.to_le_bytes());
        buf[4..8].copy_from_slice(&self.body_len.to_le_bytes());
        buf
    }

    /// Decode a fixed head from the first [`FRAME_HEAD_SIZE`] bytes of `buf`.
    ///
    /// Callers must hand in at least [`FRAME_HEAD_SIZE`] bytes. Only the
    /// magic and the `header_len <= body_len` relation are validated here;
    /// the receive-size cap is the session's concern.
    pub fn decode(buf: &[u8]) -> Result<Self, FrameError> {
        assert!(buf.len() >= FRAME_HEAD_SIZE);
        if buf[0..2] != FRAME_MAGIC {
            return Err(FrameError::BadMagic(buf[0], buf[1]));
        }
        let header_len = u16::from_le_bytes([buf[2], buf[3]]);
        let body_len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if u32::from(header_len) > body_len {
            return Err(FrameError::HeaderOverrun {
                header_len,
                body_len,
            });
        }
        Ok(Self {
            header_len,
            body_len,
        })
    }
}

// ---------------------------------------------------------------------------
// Structured heads
// ---------------------------------------------------------------------------

/// Sentinel for "no deadline" in [`ReqHead::deadline_ms`].
pub const NO_DEADLINE_MS: i64 = i64::MAX;

/// Structured request head, serialized immediately after the fixed head.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReqHead {
    pub req_id: u32,
    pub func: String,
    /// Absolute call deadline as unix milliseconds; [`NO_DEADLINE_MS`] when
    /// the caller set none.
    pub deadline_ms: i64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context_kv: BTreeMap<String, String>,
}

/// Structured response head. `req_id` is copied verbatim from the request;
/// it is the only correlation between the two directions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RspHead {
    pub req_id: u32,
    #[serde(default)]
    pub ret_code: i32,
    #[serde(default)]
    pub func_ret_code: i32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub func_ret_msg: String,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Framework-level return codes carried in [`RspHead::ret_code`].
///
/// The discriminants are wire values; do not reorder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum StatusCode {
    Ok = 0,
    Unknown = 1,
    Timeout = 2,
    Cancelled = 3,
    CtxDone = 4,

    // server side
    NotImplemented = 5,
    NotFound = 6,
    SvrParseReqFailed = 7,
    SvrSerializeRspFailed = 8,

    // client side
    CliSerializeReqFailed = 9,
    CliParseRspFailed = 10,
    CliIsNotRunning = 11,
}

impl StatusCode {
    /// Decode a wire value; anything out of range degrades to `Unknown`.
    pub fn from_i32(v: i32) -> Self {
        match v {
            0 => Self::Ok,
            2 => Self::Timeout,
            3 => Self::Cancelled,
            4 => Self::CtxDone,
            5 => Self::NotImplemented,
            6 => Self::NotFound,
            7 => Self::SvrParseReqFailed,
            8 => Self::SvrSerializeRspFailed,
            9 => Self::CliSerializeReqFailed,
            10 => Self::CliParseRspFailed,
            11 => Self::CliIsNotRunning,
            _ => Self::Unknown,
        }
    }
}

/// Result triple of one call: framework code, user code, user message.
///
/// The framework never interprets the user code or message; they are
/// pass-throughs between handler and caller.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Status {
    ret: StatusCode,
    func_ret: i32,
    func_ret_msg: String,
}

impl Default for StatusCode {
    fn default() -> Self {
        Self::Ok
    }
}

impl Status {
    /// A plain framework-level status with no user payload.
    pub fn new(ret: StatusCode) -> Self {
        Self {
            ret,
            func_ret: 0,
            func_ret_msg: String::new(),
        }
    }

    /// `OK` at the framework level, carrying a user code and message.
    pub fn app(func_ret: i32, func_ret_msg: impl Into<String>) -> Self {
        Self {
            ret: StatusCode::Ok,
            func_ret,
            func_ret_msg: func_ret_msg.into(),
        }
    }

    pub fn ok() -> Self {
        Self::new(StatusCode::Ok)
    }

    pub fn with_msg(ret: StatusCode, func_ret_msg: impl Into<String>) -> Self {
        Self {
            ret,
            func_ret: 0,
            func_ret_msg: func_ret_msg.into(),
        }
    }

    pub fn from_parts(ret_code: i32, func_ret: i32, func_ret_msg: String) -> Self {
        Self {
            ret: StatusCode::from_i32(ret_code),
            func_ret,
            func_ret_msg,
        }
    }

    pub fn ret(&self) -> StatusCode {
        self.ret
    }

    pub fn func_ret(&self) -> i32 {
        self.func_ret
    }

    pub fn func_ret_msg(&self) -> &str {
        &self.func_ret_msg
    }

    /// True iff the framework code is `Ok` and the user code is 0.
    pub fn is_ok(&self) -> bool {
        self.ret() == StatusCode::Ok && self.func_ret == 0
    }
}

impl From<StatusCode> for Status {
    fn from(ret: StatusCode) -> Self {
        Self::new(ret)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ret: {:?}, func ret: {}, func ret msg: {}",
            self.ret(),
            self.func_ret,
            self.func_ret_msg
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
