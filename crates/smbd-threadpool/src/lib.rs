//! Native-thread worker pool and timed-request dispatcher.
//!
//! Two queues share one pool: an immediate FIFO fed by
//! `crossbeam-channel` and pulled by a fixed set of worker threads, and a
//! time-ordered heap driven by one dedicated dispatch thread that moves
//! requests onto the FIFO once their `runAt` has passed.

mod error;
mod pool;
mod request;

pub use error::{DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS, PoolError, Result};
pub use pool::{PoolConfig, PoolHandle, ThreadPool, now_ms};
pub use request::{PAUSED, ThreadRequest, TimedRequest};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Counter(Arc<AtomicUsize>);
    impl ThreadRequest for Counter {
        fn run(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn queue_runs_on_a_worker() {
        let pool = ThreadPool::new(PoolConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        pool.queue(Arc::new(Counter(count.clone())));
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn queue_many_runs_all() {
        let pool = ThreadPool::new(PoolConfig::with_workers(4).unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        let reqs: Vec<Arc<dyn ThreadRequest>> = (0..20)
            .map(|_| Arc::new(Counter(count.clone())) as Arc<dyn ThreadRequest>)
            .collect();
        pool.queue_many(reqs);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(count.load(Ordering::SeqCst), 20);
        pool.shutdown();
    }

    #[test]
    fn invalid_worker_count_rejected() {
        assert!(PoolConfig::with_workers(0).is_err());
        assert!(PoolConfig::with_workers(3).is_err());
        assert!(PoolConfig::with_workers(251).is_err());
        assert!(PoolConfig::with_workers(4).is_ok());
        assert!(PoolConfig::with_workers(250).is_ok());
    }

    #[test]
    fn timed_request_fires_once() {
        let pool = ThreadPool::new(PoolConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let treq = TimedRequest::new(Arc::new(Counter(count.clone())), 0, None);
        pool.queue_timed(treq, 10);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn timed_request_repeats_until_removed() {
        let pool = ThreadPool::new(PoolConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let treq = TimedRequest::new(
            Arc::new(Counter(count.clone())),
            0,
            Some(Duration::from_millis(20)),
        );
        pool.queue_timed(treq.clone(), 5);
        std::thread::sleep(Duration::from_millis(150));
        let fired_before_removal = count.load(Ordering::SeqCst);
        assert!(fired_before_removal >= 3, "expected several repeats, got {fired_before_removal}");

        assert!(pool.remove_timed(&treq));
        std::thread::sleep(Duration::from_millis(100));
        let fired_after_removal = count.load(Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(
            count.load(Ordering::SeqCst),
            fired_after_removal,
            "request kept firing after remove_timed"
        );

        // A request already removed reports `false` on a second removal.
        assert!(!pool.remove_timed(&treq));
        pool.shutdown();
    }

    #[test]
    fn requeueing_a_timed_request_supersedes_its_old_slot() {
        let pool = ThreadPool::new(PoolConfig::default());
        let count = Arc::new(AtomicUsize::new(0));
        let treq = TimedRequest::new(Arc::new(Counter(count.clone())), 0, None);

        // Queue far in the future, then immediately requeue for "now" —
        // only one fire should happen, not two.
        pool.queue_timed(treq.clone(), u64::MAX / 2);
        pool.queue_timed(treq.clone(), 5);
        std::thread::sleep(Duration::from_millis(150));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        pool.shutdown();
    }

    #[test]
    fn pending_work_runs_before_shutdown_drains_workers() {
        let pool = ThreadPool::new(PoolConfig::with_workers(4).unwrap());
        let count = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            pool.queue(Arc::new(Counter(count.clone())));
        }
        pool.shutdown();
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }
}
