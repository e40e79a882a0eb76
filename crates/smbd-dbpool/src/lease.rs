use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::connection::DbConnection;

pub(crate) type ConnHandle = Arc<Mutex<Box<dyn DbConnection>>>;

/// A connection handed out by [`crate::DbPool::acquire`]. The underlying
/// connection is shared (via the same handle kept in the pool's
/// `allocated` bookkeeping) so the reaper can still liveness-probe a
/// permanent lease while it's checked out, instead of losing all access
/// to it until `release`.
///
/// Dropping a lease without calling `release` leaks the connection from
/// the pool's bookkeeping (it stays in `allocated` until the reaper's
/// expiry check catches it) — callers are expected to `release`
/// explicitly, the way the spec's `release(conn)` operation is always a
/// deliberate call.
pub struct DbLease {
    pub(crate) id: u64,
    pub(crate) conn: ConnHandle,
}

impl DbLease {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn connection(&self) -> MutexGuard<'_, Box<dyn DbConnection>> {
        self.conn.lock()
    }

    pub fn connection_mut(&mut self) -> MutexGuard<'_, Box<dyn DbConnection>> {
        self.conn.lock()
    }
}
