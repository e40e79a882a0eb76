use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

/// Sentinel `fileId` meaning "not yet resolved / no longer applicable".
pub const UNKNOWN_FILE_ID: u64 = u64::MAX;

/// Sentinel `expiryTime` disabling expiry entirely.
pub const PERMANENT: u64 = u64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    NotExist,
    FileExists,
    DirectoryExists,
    Renamed,
}

struct Inner {
    path: String,
    status: FileStatus,
    file_id: u64,
    expiry_time: u64,
    attributes: HashMap<String, String>,
    oplock: Option<Box<dyn Fn() + Send + Sync>>,
}

/// A cache entry for one normalized path. Cheaply shared (`Arc<FileState>`)
/// between the cache's internal map and callers holding a reference across
/// cache operations; interior fields are independently lockable/atomic so
/// `open_count` can be bumped without taking the cache's own lock.
pub struct FileState {
    inner: RwLock<Inner>,
    open_count: AtomicU32,
}

impl FileState {
    pub(crate) fn new(path: String, status: FileStatus, expiry_time: u64) -> Self {
        Self {
            inner: RwLock::new(Inner {
                path,
                status,
                file_id: UNKNOWN_FILE_ID,
                expiry_time,
                attributes: HashMap::new(),
                oplock: None,
            }),
            open_count: AtomicU32::new(0),
        }
    }

    pub fn path(&self) -> String {
        self.inner.read().path.clone()
    }

    pub fn status(&self) -> FileStatus {
        self.inner.read().status
    }

    pub fn set_status(&self, status: FileStatus) {
        self.inner.write().status = status;
    }

    pub fn file_id(&self) -> u64 {
        self.inner.read().file_id
    }

    pub fn set_file_id(&self, file_id: u64) {
        self.inner.write().file_id = file_id;
    }

    pub fn expiry_time(&self) -> u64 {
        self.inner.read().expiry_time
    }

    pub fn set_expiry_time(&self, expiry_time: u64) {
        self.inner.write().expiry_time = expiry_time;
    }

    pub fn is_permanent(&self) -> bool {
        self.expiry_time() == PERMANENT
    }

    pub fn is_expired(&self, now: u64) -> bool {
        !self.is_permanent() && self.expiry_time() < now
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(Ordering::Acquire)
    }

    pub fn open(&self) -> u32 {
        self.open_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Decrements the open-reference count; saturates at zero rather than
    /// underflowing if called more times than `open`.
    pub fn close_reference(&self) -> u32 {
        self.open_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| {
                Some(c.saturating_sub(1))
            })
            .unwrap_or(0)
    }

    pub fn attribute(&self, key: &str) -> Option<String> {
        self.inner.read().attributes.get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: impl Into<String>) {
        self.inner.write().attributes.insert(key.into(), value.into());
    }

    pub fn set_oplock(&self, callback: Box<dyn Fn() + Send + Sync>) {
        self.inner.write().oplock = Some(callback);
    }

    pub fn clear_oplock(&self) {
        self.inner.write().oplock = None;
    }

    /// Invokes the oplock break callback, if one is registered.
    pub fn break_oplock(&self) {
        if let Some(cb) = self.inner.read().oplock.as_ref() {
            cb();
        }
    }

    pub(crate) fn rename_to(&self, new_path: String) {
        self.inner.write().path = new_path;
    }
}
