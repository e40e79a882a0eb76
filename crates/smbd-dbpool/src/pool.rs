use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use smbd_diagnostics::Diagnostics;

use crate::connection::{ConnectionFactory, DbConnection, LeaseDuration, PERMANENT, PoolListener};
use crate::error::{DbPoolError, Result};
use crate::lease::{ConnHandle, DbLease};

#[derive(Debug, Clone, Copy)]
pub struct DbPoolConfig {
    pub min: usize,
    pub max: usize,
    pub lease_ms: u64,
    pub online_check_interval: u64,
}

impl Default for DbPoolConfig {
    fn default() -> Self {
        Self {
            min: 5,
            max: 10,
            lease_ms: 30_000,
            online_check_interval: 20,
        }
    }
}

struct Allocated {
    // Shared with the `DbLease` handed to the caller, so the reaper can
    // still liveness-probe (and close) a connection that's checked out,
    // not just forget its bookkeeping when the lease expires.
    conn: ConnHandle,
    expire_at: u64,
}

struct Inner {
    free: Vec<Box<dyn DbConnection>>,
    allocated: HashMap<u64, Allocated>,
}

struct Shared {
    factory: Box<dyn ConnectionFactory>,
    config: DbPoolConfig,
    inner: Mutex<Inner>,
    next_id: AtomicU64,
    online: AtomicBool,
    listener: Mutex<Option<Box<dyn PoolListener>>>,
    shutting_down: AtomicBool,
    reaper_cv: Condvar,
    reaper_mutex: Mutex<()>,
    diagnostics: Mutex<Option<Arc<dyn Diagnostics>>>,
}

fn record(shared: &Shared, message: &str) {
    if let Some(sink) = shared.diagnostics.lock().as_ref() {
        sink.record(message);
    }
}

/// Leased-connection pool with a background reaper handling expiry,
/// liveness probing and online/offline detection.
pub struct DbPool {
    shared: Arc<Shared>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

impl DbPool {
    pub fn new(factory: Box<dyn ConnectionFactory>, config: DbPoolConfig) -> Arc<Self> {
        let shared = Arc::new(Shared {
            factory,
            config,
            inner: Mutex::new(Inner {
                free: Vec::new(),
                allocated: HashMap::new(),
            }),
            next_id: AtomicU64::new(1),
            online: AtomicBool::new(true),
            listener: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
            reaper_cv: Condvar::new(),
            reaper_mutex: Mutex::new(()),
            diagnostics: Mutex::new(None),
        });

        let reaper = spawn_reaper(shared.clone());
        Arc::new(Self {
            shared,
            reaper: Mutex::new(Some(reaper)),
        })
    }

    pub fn set_listener(&self, listener: Box<dyn PoolListener>) {
        *self.shared.listener.lock() = Some(listener);
    }

    /// Attaches a diagnostics sink; online/offline transitions and
    /// reaper closures are recorded through it in addition to `log`.
    pub fn set_diagnostics(&self, sink: Arc<dyn Diagnostics>) {
        *self.shared.diagnostics.lock() = Some(sink);
    }

    pub fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::Acquire)
    }

    /// Returns a leased connection, or `None` if none is available and no
    /// new connection could be created. Never blocks.
    pub fn acquire(&self, lease: LeaseDuration) -> Option<DbLease> {
        let expire_at = lease.expire_at(now_ms());
        let mut inner = self.shared.inner.lock();

        while let Some(conn) = inner.free.pop() {
            if conn.is_closed() {
                log::debug!("discarding closed connection found in free pool during acquire");
                continue;
            }
            let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
            let handle: ConnHandle = Arc::new(Mutex::new(conn));
            inner.allocated.insert(
                id,
                Allocated {
                    conn: handle.clone(),
                    expire_at,
                },
            );
            return Some(DbLease { id, conn: handle });
        }

        if inner.allocated.len() >= self.shared.config.max {
            // Boundary case: 0 free, allocated == max -> absent, no block.
            return None;
        }

        match self.shared.factory.connect() {
            Some(conn) => {
                let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
                let handle: ConnHandle = Arc::new(Mutex::new(conn));
                inner.allocated.insert(
                    id,
                    Allocated {
                        conn: handle.clone(),
                        expire_at,
                    },
                );
                drop(inner);
                self.transition_online(true);
                Some(DbLease { id, conn: handle })
            }
            None => {
                drop(inner);
                self.transition_online(false);
                None
            }
        }
    }

    /// Returns a leased connection to the free pool, unless it's closed
    /// or the reaper already expired and forgot this lease — in that
    /// case the connection is dropped instead of being revived into the
    /// live free pool.
    pub fn release(&self, lease: DbLease) {
        let mut inner = self.shared.inner.lock();
        let was_allocated = inner.allocated.remove(&lease.id).is_some();
        drop(inner);

        if !was_allocated {
            log::debug!("release: lease {} was already reaped, dropping connection", lease.id);
            return;
        }

        match Arc::try_unwrap(lease.conn) {
            Ok(mutex) => {
                let conn = mutex.into_inner();
                if !conn.is_closed() {
                    self.shared.inner.lock().free.push(conn);
                }
            }
            Err(_) => {
                log::warn!(
                    "release: connection {} still referenced elsewhere, dropping without returning to the free pool",
                    lease.id
                );
            }
        }
    }

    /// Extends (or makes permanent) the lease on an outstanding connection.
    pub fn renew(&self, lease: &DbLease, new_expire: LeaseDuration) -> Result<()> {
        if self.shared.shutting_down.load(Ordering::Acquire) {
            return Err(DbPoolError::ShutDown);
        }
        let mut inner = self.shared.inner.lock();
        match inner.allocated.get_mut(&lease.id) {
            Some(a) => {
                a.expire_at = new_expire.expire_at(now_ms());
                Ok(())
            }
            None => Err(DbPoolError::UnknownLease(lease.id)),
        }
    }

    /// Blocks (up to `secs`) until a connection can be created, or the
    /// timeout elapses. Used by callers that need to wait out a known
    /// transient outage instead of polling `acquire`.
    pub fn wait_for_connection(&self, secs: u64) -> bool {
        let deadline = Instant::now() + Duration::from_secs(secs);
        loop {
            if self.shared.factory.connect().is_some() {
                self.transition_online(true);
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(50).min(deadline - Instant::now()));
        }
    }

    fn transition_online(&self, online: bool) {
        transition_online(&self.shared, online);
    }

    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("db pool shutting down");
        record(&self.shared, "db pool shutting down");
        {
            let _guard = self.shared.reaper_mutex.lock();
            self.shared.reaper_cv.notify_all();
        }
        if let Some(t) = self.reaper.lock().take() {
            let _ = t.join();
        }
        let mut inner = self.shared.inner.lock();
        inner.free.clear();
        inner.allocated.clear();
    }
}

impl Drop for DbPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn transition_online(shared: &Arc<Shared>, online: bool) {
    let prev = shared.online.swap(online, Ordering::AcqRel);
    if prev != online {
        let state = if online { "online" } else { "offline" };
        log::info!("db pool transitioned to {state}");
        record(shared, &format!("db pool transitioned to {state}"));
        if let Some(listener) = shared.listener.lock().as_ref() {
            listener.database_online_status(online);
        }
    }
}

fn spawn_reaper(shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("smbd-dbpool-reaper".into())
        .spawn(move || reaper_loop(shared))
        .expect("failed to spawn db pool reaper thread")
}

fn reaper_loop(shared: Arc<Shared>) {
    let mut cycles: u64 = 0;
    loop {
        {
            let mut guard = shared.reaper_mutex.lock();
            if shared.shutting_down.load(Ordering::Acquire) {
                return;
            }
            shared
                .reaper_cv
                .wait_for(&mut guard, Duration::from_millis(shared.config.lease_ms));
        }
        if shared.shutting_down.load(Ordering::Acquire) {
            return;
        }
        cycles += 1;
        reaper_cycle(&shared, cycles);
    }
}

fn reaper_cycle(shared: &Arc<Shared>, cycles: u64) {
    let now = now_ms();
    let mut inner = shared.inner.lock();

    // 1. timed-out leases are removed and closed outright; permanent
    // leases are liveness-probed instead, and closed only on failure.
    let to_close: Vec<u64> = inner
        .allocated
        .iter()
        .filter_map(|(id, a)| {
            if a.expire_at != PERMANENT {
                (a.expire_at < now).then_some(*id)
            } else {
                let mut guard = a.conn.lock();
                let alive = !guard.is_closed() && guard.probe_liveness();
                drop(guard);
                (!alive).then_some(*id)
            }
        })
        .collect();
    for id in to_close {
        log::debug!("reaper: closing lease {id}");
        record(shared, &format!("reaper: closing lease {id}"));
        inner.allocated.remove(&id);
    }

    // 2. trim free pool to configured max.
    while inner.free.len() > shared.config.max {
        inner.free.pop();
    }

    // 3. liveness sweep + online/offline detection.
    let should_probe = shared.config.online_check_interval == 0
        || cycles % shared.config.online_check_interval == 0
        || !shared.online.load(Ordering::Acquire);
    if should_probe {
        let mut alive = Vec::with_capacity(inner.free.len());
        for mut conn in inner.free.drain(..) {
            if conn.is_closed() || !conn.probe_liveness() {
                log::debug!("reaper: dropping dead free-pool connection");
                continue;
            }
            alive.push(conn);
        }
        inner.free = alive;

        if inner.free.is_empty() && inner.allocated.is_empty() {
            drop(inner);
            transition_online(shared, false);
            return;
        }

        if !shared.online.load(Ordering::Acquire) {
            match shared.factory.connect() {
                Some(conn) => {
                    inner.free.push(conn);
                    drop(inner);
                    transition_online(shared, true);
                }
                None => {
                    log::debug!("reaper: still offline, probe connection failed");
                }
            }
            return;
        }
    }

    // Top up the warm pool while online; best-effort, never flips
    // online/offline state (that's decided solely by step 3 above).
    if shared.online.load(Ordering::Acquire) {
        let total = inner.free.len() + inner.allocated.len();
        let mut to_create = shared.config.min.saturating_sub(inner.free.len());
        if total + to_create > shared.config.max {
            to_create = shared.config.max.saturating_sub(total);
        }
        for _ in 0..to_create {
            match shared.factory.connect() {
                Some(conn) => inner.free.push(conn),
                None => {
                    log::debug!("reaper: warm-pool top-up failed to create a connection");
                    break;
                }
            }
        }
    }
}
