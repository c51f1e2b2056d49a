//! Per-call metadata: deadline, key/value attachments, done state.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;
use wirecall_protocol::NO_DEADLINE_MS;

/// Why a [`Context`] was marked done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DoneCode {
    #[default]
    Unknown,
    Timeout,
    Cancel,
    CallFailed,
}

#[derive(Debug)]
struct DoneReason {
    code: DoneCode,
    info: String,
}

/// Mutable before the call starts, read-only to the handler afterwards.
///
/// The deadline and kv attachments are set through `&mut self` while the
/// caller still exclusively owns the context; once it is shared with an
/// in-flight call only the done state changes, and that transition is
/// atomic, idempotent, and observable from any thread.
#[derive(Debug)]
pub struct Context {
    deadline: Option<SystemTime>,
    kv: BTreeMap<String, String>,
    done: OnceLock<DoneReason>,
    done_tx: watch::Sender<bool>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    pub fn new() -> Self {
        Self {
            deadline: None,
            kv: BTreeMap::new(),
            done: OnceLock::new(),
            done_tx: watch::channel(false).0,
        }
    }

    // -- deadline ----------------------------------------------------------

    pub fn set_deadline(&mut self, deadline: SystemTime) {
        self.deadline = Some(deadline);
    }

    /// Sugar for `set_deadline(now + timeout)`.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.set_deadline(SystemTime::now() + timeout);
    }

    pub fn deadline(&self) -> Option<SystemTime> {
        self.deadline
    }

    /// Remaining time until the deadline; `None` when no deadline is set,
    /// zero when it has already passed.
    pub fn timeout(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.duration_since(SystemTime::now()).unwrap_or(Duration::ZERO))
    }

    /// Deadline as unix milliseconds for the request head.
    pub(crate) fn deadline_unix_ms(&self) -> i64 {
        match self.deadline {
            None => NO_DEADLINE_MS,
            Some(d) => d
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| i64::try_from(d.as_millis()).unwrap_or(NO_DEADLINE_MS)),
        }
    }

    /// Rebuild a context from a request head's deadline field.
    pub(crate) fn from_wire(deadline_ms: i64, kv: BTreeMap<String, String>) -> Self {
        let mut ctx = Self::new();
        if deadline_ms != NO_DEADLINE_MS && deadline_ms >= 0 {
            ctx.set_deadline(UNIX_EPOCH + Duration::from_millis(deadline_ms as u64));
        }
        ctx.kv = kv;
        ctx
    }

    // -- kv attachments ----------------------------------------------------

    pub fn set_value(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.kv.insert(key.into(), value.into());
    }

    pub fn value(&self, key: &str) -> Option<&str> {
        self.kv.get(key).map(String::as_str)
    }

    pub fn kv(&self) -> &BTreeMap<String, String> {
        &self.kv
    }

    // -- done state --------------------------------------------------------

    /// Mark the context done. Thread-safe and idempotent: only the first
    /// caller's code and info are recorded.
    pub fn done(&self, code: DoneCode, info: impl Into<String>) {
        if self
            .done
            .set(DoneReason {
                code,
                info: info.into(),
            })
            .is_ok()
        {
            self.done_tx.send_replace(true);
        }
    }

    pub fn cancel(&self, info: impl Into<String>) {
        self.done(DoneCode::Cancel, info);
    }

    pub fn fail(&self, info: impl Into<String>) {
        self.done(DoneCode::CallFailed, info);
    }

    pub fn is_done(&self) -> bool {
        self.done.get().is_some()
    }

    pub fn code(&self) -> DoneCode {
        self.done.get().map(|r| r.code).unwrap_or_default()
    }

    pub fn done_info(&self) -> &str {
        self.done.get().map_or("", |r| r.info.as_str())
    }

    /// Resolve once the context is marked done. Resolves immediately if it
    /// already is; used as an extra wake edge while a call is in flight.
    pub async fn done_signal(&self) {
        let mut rx = self.done_tx.subscribe();
        if *rx.borrow() {
            return;
        }
        // send_replace always follows the OnceLock set, so changed() cannot
        // miss a done() that lands after the borrow above.
        let _ = rx.changed().await;
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "is done: {}, code: {:?}, done info: {}, timeout: {}",
            self.is_done(),
            self.code(),
            self.done_info(),
            self.timeout()
                .map_or_else(|| "none".to_owned(), |t| format!("{}ms", t.as_millis())),
        )?;
        for (k, v) in &self.kv {
            write!(f, ", {k}={v}")?;
        }
        Ok(())
    }
}
