use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::types::{ChangeEvent, NotifyFilter};

pub type SessionId = u64;

/// Opaque, fully-marshalled response payload. The core never interprets
/// its bytes — only the caller-supplied `ResponseBuilder` produces them
/// and the caller-supplied `SmbSession` consumes them.
#[derive(Debug, Clone)]
pub struct ResponsePacket(pub Vec<u8>);

/// The identity a `NotifyRequest` dispatches to. The core only ever holds
/// a `Weak` reference — a disconnected session is simply skipped, never
/// kept alive by a pending watch.
pub trait SmbSession: Send + Sync {
    /// Non-blocking; returns whether the packet was sent immediately
    /// (`true`) or queued by the session for later delivery (`false`).
    fn send_async_response(&self, packet: ResponsePacket) -> bool;
    fn is_connected(&self) -> bool;
    fn id(&self) -> SessionId;
}

/// Builds the wire response for a notification, given the triggering
/// event (`None` for the overflow "enumerate directory" signal) and the
/// request it's being built for.
pub trait ResponseBuilder: Send + Sync {
    fn build_notification_response(
        &self,
        event: Option<&ChangeEvent>,
        request: &NotifyRequest,
    ) -> ResponsePacket;
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// One outstanding client watch.
pub struct NotifyRequest {
    id: u64,
    session: Weak<dyn SmbSession>,
    session_id: SessionId,
    request_id: u64,
    watch_path: String,
    filter: NotifyFilter,
    watch_tree: bool,
    completed: AtomicBool,
    expiry_time: AtomicU64,
    buffered_events: Mutex<Vec<ChangeEvent>>,
    overflowed: AtomicBool,
}

impl NotifyRequest {
    pub fn new(
        session: Weak<dyn SmbSession>,
        session_id: SessionId,
        request_id: u64,
        watch_path: String,
        filter: NotifyFilter,
        watch_tree: bool,
        expiry_time: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            session,
            session_id,
            request_id,
            watch_path,
            filter,
            watch_tree,
            completed: AtomicBool::new(false),
            expiry_time: AtomicU64::new(expiry_time),
            buffered_events: Mutex::new(Vec::new()),
            overflowed: AtomicBool::new(false),
        })
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    pub fn session(&self) -> Weak<dyn SmbSession> {
        self.session.clone()
    }

    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    pub fn request_id(&self) -> u64 {
        self.request_id
    }

    pub fn watch_path(&self) -> &str {
        &self.watch_path
    }

    pub fn filter(&self) -> NotifyFilter {
        self.filter
    }

    pub fn watch_tree(&self) -> bool {
        self.watch_tree
    }

    pub fn completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    pub fn expiry_time(&self) -> u64 {
        self.expiry_time.load(Ordering::Acquire)
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed.load(Ordering::Acquire)
    }

    pub fn buffered_len(&self) -> usize {
        self.buffered_events.lock().len()
    }

    pub(crate) fn set_completed(&self, completed: bool) {
        self.completed.store(completed, Ordering::Release);
    }

    pub(crate) fn set_expiry_time(&self, expiry_time: u64) {
        self.expiry_time.store(expiry_time, Ordering::Release);
    }

    pub(crate) fn is_expired(&self, now: u64) -> bool {
        now >= self.expiry_time()
    }

    /// Appends `event` to the buffer unless already overflowed (in which
    /// case it's silently dropped) or the cap would be exceeded (in
    /// which case `overflowed` is set and the event is dropped too).
    /// Returns whether this call is the one that tipped the buffer into
    /// overflow, for callers that want to record it once.
    pub(crate) fn buffer_event(&self, event: ChangeEvent, buffer_limit: usize) -> bool {
        if self.overflowed.load(Ordering::Acquire) {
            return false;
        }
        let mut buf = self.buffered_events.lock();
        if buf.len() >= buffer_limit {
            self.overflowed.store(true, Ordering::Release);
            return true;
        }
        buf.push(event);
        false
    }

    /// Drains buffered events (or, if overflowed, clears the buffer and
    /// clears the overflow flag), returning what `send_buffered` should
    /// turn into response packets.
    pub(crate) fn take_for_rearm(&self) -> RearmPayload {
        let mut buf = self.buffered_events.lock();
        if self.overflowed.swap(false, Ordering::AcqRel) {
            buf.clear();
            RearmPayload::Overflowed
        } else {
            RearmPayload::Events(std::mem::take(&mut *buf))
        }
    }
}

pub(crate) enum RearmPayload {
    Overflowed,
    Events(Vec<ChangeEvent>),
}
