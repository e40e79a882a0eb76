use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// A unit of work submitted to the pool's immediate FIFO queue.
///
/// Implementations must not panic across the pool's worker boundary;
/// the pool catches unwinds around `run`, but a request that panics
/// still loses whatever work it hadn't flushed yet.
pub trait ThreadRequest: Send {
    fn run(&self);
}

impl<F: Fn() + Send> ThreadRequest for F {
    fn run(&self) {
        (self)()
    }
}

/// Sentinel `runAt` value meaning "paused" — never dispatched until
/// rescheduled with a concrete time.
pub const PAUSED: u64 = 0;

struct TimedState {
    run_at: u64,
    repeat_interval: Option<Duration>,
    /// Bumped on every (re)registration with a pool; heap entries carry
    /// the generation they were pushed with, so a pop whose generation
    /// doesn't match the current one is a stale entry left behind by a
    /// prior `remove_timed`/`queue_timed` pair and is silently dropped.
    generation: u64,
    /// Whether this request is currently registered with a pool's timed
    /// queue. `remove_timed` clears it; `queue_timed` sets it.
    active: bool,
}

/// A request with an associated fire time, optionally repeating.
///
/// Holds no strong reference back to the pool that dispatches it — only
/// an opaque [`crate::PoolHandle`] is handed to callers that need to
/// re-queue it, so a `TimedRequest` never participates in the pool's own
/// destruction.
pub struct TimedRequest {
    task: Arc<dyn ThreadRequest>,
    state: Mutex<TimedState>,
    id: u64,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl TimedRequest {
    /// Creates a new timed request firing once at `run_at` (milliseconds,
    /// caller-defined epoch), with an optional repeat interval.
    pub fn new(task: Arc<dyn ThreadRequest>, run_at: u64, repeat_interval: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            task,
            state: Mutex::new(TimedState {
                run_at,
                repeat_interval,
                generation: 0,
                active: false,
            }),
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn run_at(&self) -> u64 {
        self.state.lock().run_at
    }

    pub fn is_paused(&self) -> bool {
        self.run_at() == PAUSED
    }

    pub fn task(&self) -> Arc<dyn ThreadRequest> {
        self.task.clone()
    }

    pub(crate) fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    pub(crate) fn is_active(&self) -> bool {
        self.state.lock().active
    }

    pub(crate) fn repeat_interval(&self) -> Option<Duration> {
        self.state.lock().repeat_interval
    }

    /// Marks this request as registered, bumping its generation so any
    /// previously-queued heap entry is invalidated, and returns the new
    /// generation together with the `run_at` to order it by.
    pub(crate) fn activate(&self, run_at: u64) -> (u64, u64) {
        let mut state = self.state.lock();
        state.run_at = run_at;
        state.generation += 1;
        state.active = true;
        (state.generation, state.run_at)
    }

    /// Called by the timed-dispatch thread after firing a non-repeating
    /// request, or to compute the next fire time for a repeating one.
    pub(crate) fn reschedule_after_fire(&self, now_ms: u64) -> Option<(u64, u64)> {
        let mut state = self.state.lock();
        match state.repeat_interval {
            Some(interval) => {
                state.run_at = now_ms + interval.as_millis() as u64;
                state.generation += 1;
                Some((state.generation, state.run_at))
            }
            None => {
                state.active = false;
                None
            }
        }
    }

    pub(crate) fn deactivate(&self) -> bool {
        let mut state = self.state.lock();
        let was_active = state.active;
        state.active = false;
        state.generation += 1;
        was_active
    }
}
