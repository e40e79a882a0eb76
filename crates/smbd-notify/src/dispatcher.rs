use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::Mutex;
use smbd_diagnostics::Diagnostics;

use crate::error::{DispatchError, Result};
use crate::request::{NotifyRequest, RearmPayload, ResponseBuilder, ResponsePacket, SessionId, SmbSession};
use crate::types::{ChangeEvent, FsChange, NotifyFilter, normalize_event_path};

fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    pub default_lease_ms: u64,
    pub buffer_limit: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            default_lease_ms: 600_000,
            buffer_limit: 64,
        }
    }
}

struct RequestList {
    requests: Vec<Arc<NotifyRequest>>,
    global_change_set: NotifyFilter,
}

impl RequestList {
    fn recompute(&mut self) {
        self.global_change_set = self
            .requests
            .iter()
            .fold(NotifyFilter::empty(), |acc, r| acc | r.filter());
    }
}

/// Matches incoming `ChangeEvent`s against registered `NotifyRequest`s,
/// dispatching immediately or buffering per watcher, and expiring stale
/// watchers opportunistically during the match pass.
pub struct Dispatcher {
    config: DispatcherConfig,
    list: Mutex<RequestList>,
    response_builder: Arc<dyn ResponseBuilder>,
    // Asynchronous send offload; when present, `send_async_response` runs
    // on a pool worker instead of the calling (driver) thread.
    pool: Option<smbd_threadpool::PoolHandle>,
    diagnostics: Mutex<Option<Arc<dyn Diagnostics>>>,
}

impl Dispatcher {
    pub fn new(response_builder: Arc<dyn ResponseBuilder>, config: DispatcherConfig) -> Self {
        Self {
            config,
            list: Mutex::new(RequestList {
                requests: Vec::new(),
                global_change_set: NotifyFilter::empty(),
            }),
            response_builder,
            pool: None,
            diagnostics: Mutex::new(None),
        }
    }

    pub fn with_pool(mut self, pool: smbd_threadpool::PoolHandle) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Attaches a diagnostics sink; buffer overflows and opportunistic
    /// expiry reaps are recorded through it in addition to `log`.
    pub fn set_diagnostics(&self, sink: Arc<dyn Diagnostics>) {
        *self.diagnostics.lock() = Some(sink);
    }

    fn record(&self, message: &str) {
        if let Some(sink) = self.diagnostics.lock().as_ref() {
            sink.record(message);
        }
    }

    pub fn add_request(&self, req: Arc<NotifyRequest>) {
        let mut list = self.list.lock();
        list.requests.push(req);
        list.recompute();
    }

    /// Removes `req`; recomputes `globalChangeSet` unless `update_mask`
    /// is false. Errors if `req` was not registered with this dispatcher.
    pub fn remove_request(&self, req: &Arc<NotifyRequest>, update_mask: bool) -> Result<()> {
        let mut list = self.list.lock();
        let before = list.requests.len();
        list.requests.retain(|r| r.id() != req.id());
        let removed = list.requests.len() != before;
        if removed && update_mask {
            list.recompute();
        }
        if removed { Ok(()) } else { Err(DispatchError::UnknownRequest) }
    }

    pub fn remove_all_for_session(&self, session_id: SessionId) {
        let mut list = self.list.lock();
        list.requests.retain(|r| r.session_id() != session_id);
        list.recompute();
    }

    /// Fast predicate used by drivers to avoid constructing a
    /// `ChangeEvent` for a category no watcher cares about.
    pub fn wants_event(&self, change: FsChange, _is_dir: bool) -> bool {
        self.list.lock().global_change_set.intersects(change.categories())
    }

    pub fn handle_event(&self, event: ChangeEvent) {
        let now = now_ms();
        let mapped = event.change.categories();
        let normalized_path = normalize_event_path(&event.path);

        let mut to_send: Vec<(Weak<dyn SmbSession>, ResponsePacket)> = Vec::new();
        let mut any_expired = false;
        let mut expired_count = 0usize;
        let mut overflowed_count = 0usize;

        {
            let mut list = self.list.lock();
            let mut i = 0;
            while i < list.requests.len() {
                let req = list.requests[i].clone();

                if req.is_expired(now) {
                    list.requests.remove(i);
                    any_expired = true;
                    expired_count += 1;
                    continue;
                }
                if !req.filter().intersects(mapped) {
                    i += 1;
                    continue;
                }
                if !matches_path(&req, &normalized_path, event.is_directory) {
                    i += 1;
                    continue;
                }

                if !req.completed() {
                    let packet = self
                        .response_builder
                        .build_notification_response(Some(&event), &req);
                    to_send.push((req.session(), packet));
                    req.set_completed(true);
                    req.set_expiry_time(now + self.config.default_lease_ms);
                } else if req.buffer_event(event.clone(), self.config.buffer_limit) {
                    overflowed_count += 1;
                }
                i += 1;
            }
            if any_expired {
                list.recompute();
            }
        }

        if expired_count > 0 {
            self.record(&format!("reaped {expired_count} expired watch request(s) during dispatch"));
        }
        if overflowed_count > 0 {
            self.record(&format!("{overflowed_count} watch request(s) overflowed their event buffer"));
        }

        self.dispatch(to_send);
    }

    /// Drains a re-armed request's buffer (or synthesizes the single
    /// "enumerate directory" notification if it had overflowed).
    pub fn send_buffered(&self, req: &Arc<NotifyRequest>) {
        let now = now_ms();
        let packets: Vec<ResponsePacket> = match req.take_for_rearm() {
            RearmPayload::Overflowed => {
                vec![self.response_builder.build_notification_response(None, req)]
            }
            RearmPayload::Events(events) => events
                .iter()
                .map(|e| self.response_builder.build_notification_response(Some(e), req))
                .collect(),
        };
        req.set_completed(true);
        req.set_expiry_time(now + self.config.default_lease_ms);

        let to_send = packets.into_iter().map(|p| (req.session(), p)).collect();
        self.dispatch(to_send);
    }

    fn dispatch(&self, to_send: Vec<(Weak<dyn SmbSession>, ResponsePacket)>) {
        match &self.pool {
            Some(handle) => {
                for (session, packet) in to_send {
                    handle.queue(Arc::new(move || {
                        if let Some(s) = session.upgrade() {
                            let _ = s.send_async_response(packet.clone());
                        }
                    }));
                }
            }
            None => {
                for (session, packet) in to_send {
                    if let Some(s) = session.upgrade() {
                        let _ = s.send_async_response(packet);
                    }
                }
            }
        }
    }
}

fn matches_path(req: &NotifyRequest, event_path: &str, is_directory: bool) -> bool {
    if event_path.is_empty() && req.watch_tree() {
        return true;
    }
    if req.watch_tree() && event_path.starts_with(req.watch_path()) {
        return true;
    }
    if is_directory && event_path == req.watch_path() {
        return true;
    }
    if !is_directory {
        let parent = match event_path.rfind('\\') {
            Some(0) | None => "\\",
            Some(idx) => &event_path[..idx],
        };
        if parent == req.watch_path() {
            return true;
        }
    }
    false
}
