//! Leased database connection pool with a reaper thread handling expiry,
//! liveness probing, free-pool trimming and online/offline detection.
//!
//! The pool is generic over [`ConnectionFactory`]/[`DbConnection`] — the
//! actual database client is an external collaborator the embedding
//! application supplies.

mod connection;
mod error;
mod lease;
mod pool;

pub use connection::{ConnectionFactory, DbConnection, LeaseDuration, PERMANENT, PoolListener};
pub use error::{DbPoolError, Result};
pub use lease::DbLease;
pub use pool::{DbPool, DbPoolConfig};

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeConn {
        closed: bool,
        alive: Arc<AtomicBool>,
    }
    impl DbConnection for FakeConn {
        fn is_closed(&self) -> bool {
            self.closed
        }
        fn probe_liveness(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
    }

    struct FakeFactory {
        reachable: Arc<AtomicBool>,
        created: AtomicUsize,
    }
    impl ConnectionFactory for FakeFactory {
        fn connect(&self) -> Option<Box<dyn DbConnection>> {
            if self.reachable.load(Ordering::SeqCst) {
                self.created.fetch_add(1, Ordering::SeqCst);
                Some(Box::new(FakeConn {
                    closed: false,
                    alive: Arc::new(AtomicBool::new(true)),
                }))
            } else {
                None
            }
        }
    }

    struct RecordingListener {
        events: StdMutex<Vec<bool>>,
    }
    impl PoolListener for RecordingListener {
        fn database_online_status(&self, online: bool) {
            self.events.lock().unwrap().push(online);
        }
    }

    #[test]
    fn acquire_and_release_round_trip() {
        let factory = Arc::new(FakeFactory {
            reachable: Arc::new(AtomicBool::new(true)),
            created: AtomicUsize::new(0),
        });
        let pool = DbPool::new(
            Box::new(FakeFactoryHandle(factory.clone())),
            DbPoolConfig {
                min: 1,
                max: 2,
                lease_ms: 10_000,
                online_check_interval: 5,
            },
        );

        let lease = pool.acquire(LeaseDuration::Millis(5_000)).expect("should acquire");
        assert!(!lease.connection().is_closed());
        pool.release(lease);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        // Releasing returns it to the free pool, so a second acquire
        // reuses it instead of creating a new connection.
        let lease2 = pool.acquire(LeaseDuration::Millis(5_000)).expect("should reuse");
        pool.release(lease2);
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        pool.shutdown();
    }

    #[test]
    fn acquire_at_capacity_returns_none_without_blocking() {
        let factory = Arc::new(FakeFactory {
            reachable: Arc::new(AtomicBool::new(true)),
            created: AtomicUsize::new(0),
        });
        let pool = DbPool::new(
            Box::new(FakeFactoryHandle(factory.clone())),
            DbPoolConfig {
                min: 0,
                max: 1,
                lease_ms: 10_000,
                online_check_interval: 5,
            },
        );

        let first = pool.acquire(LeaseDuration::Millis(5_000));
        assert!(first.is_some());
        let second = pool.acquire(LeaseDuration::Millis(5_000));
        assert!(second.is_none(), "pool at capacity must not block or overallocate");
        pool.shutdown();
    }

    #[test]
    fn offline_transition_notifies_once_on_unreachable_dsn() {
        let reachable = Arc::new(AtomicBool::new(false));
        let factory = Arc::new(FakeFactory {
            reachable: reachable.clone(),
            created: AtomicUsize::new(0),
        });
        let pool = DbPool::new(
            Box::new(FakeFactoryHandle(factory.clone())),
            DbPoolConfig {
                min: 1,
                max: 5,
                lease_ms: 10_000,
                online_check_interval: 5,
            },
        );
        let listener = Arc::new(RecordingListener {
            events: StdMutex::new(Vec::new()),
        });
        pool.set_listener(Box::new(ArcListener(listener.clone())));

        let first = pool.acquire(LeaseDuration::Millis(1_000));
        assert!(first.is_none());
        assert_eq!(*listener.events.lock().unwrap(), vec![false]);

        // A second failed acquire must not re-notify (already offline).
        let second = pool.acquire(LeaseDuration::Millis(1_000));
        assert!(second.is_none());
        assert_eq!(*listener.events.lock().unwrap(), vec![false]);

        reachable.store(true, Ordering::SeqCst);
        let recovered = pool.acquire(LeaseDuration::Millis(1_000));
        assert!(recovered.is_some());
        pool.shutdown();
    }

    struct SingleConnFactory {
        alive: Arc<AtomicBool>,
    }
    impl ConnectionFactory for SingleConnFactory {
        fn connect(&self) -> Option<Box<dyn DbConnection>> {
            Some(Box::new(FakeConn {
                closed: false,
                alive: self.alive.clone(),
            }))
        }
    }

    #[test]
    fn permanent_lease_is_closed_on_failed_liveness_probe() {
        let alive = Arc::new(AtomicBool::new(true));
        let pool = DbPool::new(
            Box::new(SingleConnFactory { alive: alive.clone() }),
            DbPoolConfig {
                min: 0,
                max: 2,
                lease_ms: 20,
                online_check_interval: 1,
            },
        );

        let lease = pool
            .acquire(LeaseDuration::Permanent)
            .expect("should acquire a permanent lease");

        // Flip the leased-out connection's liveness off, then let a
        // reaper cycle run: it must probe (not just forget) this
        // still-checked-out permanent lease and close it on failure,
        // which shows up as `renew` no longer finding the lease.
        alive.store(false, Ordering::SeqCst);
        std::thread::sleep(std::time::Duration::from_millis(150));
        assert!(pool.renew(&lease, LeaseDuration::Permanent).is_err());

        pool.shutdown();
    }

    struct FakeFactoryHandle(Arc<FakeFactory>);
    impl ConnectionFactory for FakeFactoryHandle {
        fn connect(&self) -> Option<Box<dyn DbConnection>> {
            self.0.connect()
        }
    }

    struct ArcListener(Arc<RecordingListener>);
    impl PoolListener for ArcListener {
        fn database_online_status(&self, online: bool) {
            self.0.database_online_status(online);
        }
    }
}
