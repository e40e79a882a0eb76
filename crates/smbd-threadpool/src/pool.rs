use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use smbd_diagnostics::Diagnostics;

use crate::error::{DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS, PoolError, Result};
use crate::request::{PAUSED, ThreadRequest, TimedRequest};

/// Construction-time sizing for a [`ThreadPool`].
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
        }
    }
}

impl PoolConfig {
    pub fn with_workers(workers: usize) -> Result<Self> {
        if !(MIN_WORKERS..=MAX_WORKERS).contains(&workers) {
            return Err(PoolError::InvalidWorkerCount(workers));
        }
        Ok(Self { workers })
    }
}

struct HeapEntry {
    key: u64,
    generation: u64,
    seq: u64,
    req: Arc<TimedRequest>,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key && self.seq == other.seq
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.key, self.seq).cmp(&(other.key, other.seq))
    }
}

/// `runAt == 0` ("paused") sorts last rather than first.
fn heap_key(run_at: u64) -> u64 {
    if run_at == PAUSED { u64::MAX } else { run_at }
}

struct TimedQueue {
    heap: BinaryHeap<Reverse<HeapEntry>>,
    seq: u64,
}

struct Shared {
    // `None` once `shutdown` has run; dropping the last sender is what
    // disconnects the channel and lets blocked workers' `recv()` return.
    task_tx: Mutex<Option<Sender<Arc<dyn ThreadRequest>>>>,
    timed: Mutex<TimedQueue>,
    timed_cv: Condvar,
    shutting_down: AtomicBool,
    diagnostics: Mutex<Option<Arc<dyn Diagnostics>>>,
}

fn record(shared: &Shared, message: &str) {
    if let Some(sink) = shared.diagnostics.lock().as_ref() {
        sink.record(message);
    }
}

/// A cheap handle to an existing pool, used by code that needs to
/// (re)queue a [`TimedRequest`] without owning the pool itself — e.g. a
/// repeating task rescheduling itself from within its own `run()`.
#[derive(Clone)]
pub struct PoolHandle(Arc<Shared>);

impl PoolHandle {
    pub fn queue(&self, req: Arc<dyn ThreadRequest>) {
        queue_on(&self.0, req);
    }

    pub fn queue_timed(&self, req: Arc<TimedRequest>, run_at: u64) {
        queue_timed_on(&self.0, req, run_at);
    }

    pub fn remove_timed(&self, req: &Arc<TimedRequest>) -> bool {
        remove_timed_on(&self.0, req)
    }
}

fn queue_on(shared: &Arc<Shared>, req: Arc<dyn ThreadRequest>) {
    let tx = shared.task_tx.lock();
    match tx.as_ref() {
        Some(tx) if tx.send(req).is_ok() => {}
        _ => log::warn!("dropping request: pool is shutting down or already shut down"),
    }
}

/// Enqueues all of `reqs` while holding `task_tx`'s lock once, so a
/// concurrent `queue()` call can't interleave inside the batch.
fn queue_many_on(shared: &Arc<Shared>, reqs: Vec<Arc<dyn ThreadRequest>>) {
    let tx = shared.task_tx.lock();
    match tx.as_ref() {
        Some(tx) => {
            for req in reqs {
                if tx.send(req).is_err() {
                    log::warn!("dropping request: pool is shutting down or already shut down");
                }
            }
        }
        None => log::warn!("dropping {} requests: pool already shut down", reqs.len()),
    }
}

fn queue_timed_on(shared: &Arc<Shared>, req: Arc<TimedRequest>, run_at: u64) {
    let (generation, run_at) = req.activate(run_at);
    let mut q = shared.timed.lock();
    let seq = q.seq;
    q.seq += 1;
    let is_new_head = q
        .heap
        .peek()
        .map(|Reverse(e)| heap_key(run_at) < e.key)
        .unwrap_or(true);
    q.heap.push(Reverse(HeapEntry {
        key: heap_key(run_at),
        generation,
        seq,
        req,
    }));
    drop(q);
    if is_new_head {
        shared.timed_cv.notify_one();
    }
}

fn remove_timed_on(shared: &Arc<Shared>, req: &Arc<TimedRequest>) -> bool {
    let was_active = req.deactivate();
    // The stale heap entry is left in place; the dispatch thread skips it
    // by comparing generations when it's popped.
    shared.timed_cv.notify_one();
    was_active
}

/// Native-thread pool dispatching immediate work over an unbounded
/// `crossbeam-channel` FIFO, plus a single dedicated thread driving a
/// time-ordered heap of repeating/one-shot [`TimedRequest`]s.
pub struct ThreadPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    timed_thread: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadPool {
    pub fn new(config: PoolConfig) -> Arc<Self> {
        let (task_tx, task_rx) = unbounded::<Arc<dyn ThreadRequest>>();
        let shared = Arc::new(Shared {
            task_tx: Mutex::new(Some(task_tx)),
            timed: Mutex::new(TimedQueue {
                heap: BinaryHeap::new(),
                seq: 0,
            }),
            timed_cv: Condvar::new(),
            shutting_down: AtomicBool::new(false),
            diagnostics: Mutex::new(None),
        });

        let mut workers = Vec::with_capacity(config.workers);
        for idx in 0..config.workers {
            workers.push(spawn_worker(idx, task_rx.clone(), shared.clone()));
        }
        drop(task_rx);

        let timed_thread = spawn_timed_dispatch(shared.clone());

        Arc::new(Self {
            shared,
            workers: Mutex::new(workers),
            timed_thread: Mutex::new(Some(timed_thread)),
        })
    }

    pub fn handle(&self) -> PoolHandle {
        PoolHandle(self.shared.clone())
    }

    /// Attaches a diagnostics sink; subsequent worker panics and
    /// shutdowns are recorded through it in addition to `log`.
    pub fn set_diagnostics(&self, sink: Arc<dyn Diagnostics>) {
        *self.shared.diagnostics.lock() = Some(sink);
    }

    pub fn queue(&self, req: Arc<dyn ThreadRequest>) {
        queue_on(&self.shared, req);
    }

    pub fn queue_many(&self, reqs: Vec<Arc<dyn ThreadRequest>>) {
        queue_many_on(&self.shared, reqs);
    }

    /// Registers `req` to fire at `run_at` (milliseconds). If `req` is
    /// already registered with this pool, its prior entry is superseded
    /// (the stale heap slot is skipped by generation check) before the
    /// new one is pushed.
    pub fn queue_timed(&self, req: Arc<TimedRequest>, run_at: u64) {
        queue_timed_on(&self.shared, req, run_at);
    }

    /// Deactivates `req`; returns `true` if it was registered.
    pub fn remove_timed(&self, req: &Arc<TimedRequest>) -> bool {
        remove_timed_on(&self.shared, req)
    }

    pub fn shutdown(&self) {
        if self.shared.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        log::info!("thread pool shutting down");
        record(&self.shared, "thread pool shutting down");
        self.shared.timed_cv.notify_all();
        // Drop the one live sender: workers' blocking `recv()` returns
        // `Err` once the channel has no senders and is drained, which is
        // exactly the clean per-worker exit the pool relies on.
        self.shared.task_tx.lock().take();

        let mut workers = self.workers.lock();
        for w in workers.drain(..) {
            let _ = w.join();
        }
        drop(workers);

        if let Some(t) = self.timed_thread.lock().take() {
            let _ = t.join();
        }
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(
    idx: usize,
    task_rx: Receiver<Arc<dyn ThreadRequest>>,
    shared: Arc<Shared>,
) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(format!("smbd-pool-worker-{idx}"))
        .spawn(move || {
            while let Ok(req) = task_rx.recv() {
                let result = panic::catch_unwind(AssertUnwindSafe(|| req.run()));
                if let Err(panic) = result {
                    log::error!("worker {idx} caught panic from queued request: {panic:?}");
                    record(&shared, &format!("worker {idx} caught a panic from a queued request"));
                }
            }
            log::trace!("worker {idx} exiting: task channel closed");
        })
        .expect("failed to spawn pool worker thread")
}

fn spawn_timed_dispatch(shared: Arc<Shared>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("smbd-pool-timed".into())
        .spawn(move || timed_dispatch_loop(shared))
        .expect("failed to spawn timed-dispatch thread")
}

/// Milliseconds since this process started. `queue_timed`'s `run_at` is
/// expressed in this basis; callers scheduling relative to "now" compute
/// `now_ms() + delay`.
pub fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

const MAX_SLEEP: Duration = Duration::from_secs(60 * 60 * 24);

fn timed_dispatch_loop(shared: Arc<Shared>) {
    loop {
        if shared.shutting_down.load(Ordering::Acquire) {
            return;
        }
        let mut q = shared.timed.lock();
        let next = loop {
            match q.heap.peek() {
                None => break None,
                Some(Reverse(entry)) => {
                    if entry.generation != entry.req.generation() || !entry.req.is_active() {
                        q.heap.pop();
                        continue;
                    }
                    break Some(entry.key);
                }
            }
        };

        match next {
            None => {
                shared.timed_cv.wait_for(&mut q, MAX_SLEEP);
            }
            Some(key) if key == u64::MAX => {
                // Head entry is paused; nothing to do until it's reactivated.
                shared.timed_cv.wait_for(&mut q, MAX_SLEEP);
            }
            Some(run_at) => {
                let now = now_ms();
                if run_at > now {
                    let delay = Duration::from_millis(run_at - now).min(MAX_SLEEP);
                    shared.timed_cv.wait_for(&mut q, delay);
                    continue;
                }

                let Reverse(entry) = q.heap.pop().expect("peeked entry must be present");
                drop(q);

                if shared.shutting_down.load(Ordering::Acquire) {
                    return;
                }

                let task = entry.req.task();
                queue_on(&shared, task);

                if let Some((generation, new_run_at)) = entry.req.reschedule_after_fire(now_ms()) {
                    let mut q = shared.timed.lock();
                    let seq = q.seq;
                    q.seq += 1;
                    q.heap.push(Reverse(HeapEntry {
                        key: heap_key(new_run_at),
                        generation,
                        seq,
                        req: entry.req,
                    }));
                }
            }
        }
    }
}
