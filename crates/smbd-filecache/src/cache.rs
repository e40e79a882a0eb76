use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::Mutex;
use smbd_diagnostics::Diagnostics;

use crate::error::{CacheError, Result};
use crate::state::{FileState, FileStatus, PERMANENT};

/// Notified of cache entry lifecycle transitions. Callbacks run *outside*
/// the cache's own lock to avoid reentrancy deadlocks.
pub trait StateListener: Send + Sync {
    fn state_closed(&self, state: &Arc<FileState>);

    /// Called before evicting an expired, unreferenced state. Returning
    /// `false` vetoes this specific expiry (the state survives the sweep).
    fn state_expired(&self, state: &Arc<FileState>) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct CacheConfig {
    pub initial_size: usize,
    pub case_sensitive: bool,
    pub expire_interval_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            initial_size: 500,
            case_sensitive: false,
            expire_interval_ms: 60_000,
        }
    }
}

fn now_ms() -> u64 {
    static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
    let start = *START.get_or_init(Instant::now);
    start.elapsed().as_millis() as u64
}

/// Uppercases (if case-insensitive) and trims trailing separators, except
/// when the path is exactly the root separator.
pub fn normalize(path: &str, case_sensitive: bool) -> String {
    let trimmed = if path == "\\" {
        path
    } else {
        path.trim_end_matches('\\')
    };
    if case_sensitive {
        trimmed.to_string()
    } else {
        trimmed.to_uppercase()
    }
}

/// Single-lock path-keyed cache of `FileState`. Create-or-get is atomic;
/// renaming a directory propagates `NotExist` to every cached descendant.
pub struct FileStateCache {
    config: CacheConfig,
    map: Mutex<HashMap<String, Arc<FileState>>>,
    listener: Mutex<Option<Arc<dyn StateListener>>>,
    next_file_id: AtomicU64,
    diagnostics: Mutex<Option<Arc<dyn Diagnostics>>>,
}

impl FileStateCache {
    pub fn new(config: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            map: Mutex::new(HashMap::with_capacity(config.initial_size)),
            listener: Mutex::new(None),
            next_file_id: AtomicU64::new(1),
            diagnostics: Mutex::new(None),
            config,
        })
    }

    pub fn set_listener(&self, listener: Arc<dyn StateListener>) {
        *self.listener.lock() = Some(listener);
    }

    /// Attaches a diagnostics sink; rename conflicts and sweep results
    /// are recorded through it in addition to `log`.
    pub fn set_diagnostics(&self, sink: Arc<dyn Diagnostics>) {
        *self.diagnostics.lock() = Some(sink);
    }

    fn record(&self, message: &str) {
        if let Some(sink) = self.diagnostics.lock().as_ref() {
            sink.record(message);
        }
    }

    fn key(&self, path: &str) -> String {
        normalize(path, self.config.case_sensitive)
    }

    /// Allocates a fresh stable identifier for a newly-created state.
    pub fn next_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn find(&self, path: &str) -> Option<Arc<FileState>> {
        self.map.lock().get(&self.key(path)).cloned()
    }

    /// Atomic create-or-get: the new state (if created) has
    /// `expiry_time = now + expire_interval_ms`. Errors if `path`
    /// normalizes to an empty key (e.g. all separators).
    pub fn find_or_create(&self, path: &str, initial_status: FileStatus) -> Result<Arc<FileState>> {
        let key = self.key(path);
        if key.is_empty() {
            return Err(CacheError::EmptyPath);
        }
        let mut map = self.map.lock();
        if let Some(existing) = map.get(&key) {
            return Ok(existing.clone());
        }
        let expiry = now_ms() + self.config.expire_interval_ms;
        let state = Arc::new(FileState::new(key.clone(), initial_status, expiry));
        map.insert(key, state.clone());
        Ok(state)
    }

    /// Removes the state for `path`. The `state_closed` callback, if a
    /// listener is registered, runs after the cache lock is released.
    pub fn remove(&self, path: &str) -> Option<Arc<FileState>> {
        let key = self.key(path);
        let removed = self.map.lock().remove(&key);
        if let Some(state) = &removed {
            self.notify_closed(state);
        }
        removed
    }

    /// Renames `state` to `new_path`. On a directory rename every cached
    /// path that is a strict descendant of the old path is reset to
    /// `NotExist` with an `Unknown` file id. Rename wins on the source
    /// side only: the old key is always removed, but if `new_path` is
    /// already occupied the existing target entry is left untouched
    /// rather than overwritten, and `state` is not reinserted. Errors
    /// (without removing the old key) if `new_path` normalizes to an
    /// empty key.
    pub fn rename(&self, state: &Arc<FileState>, new_path: &str, is_dir: bool) -> Result<()> {
        let new_key = self.key(new_path);
        if new_key.is_empty() {
            return Err(CacheError::EmptyPath);
        }
        let mut map = self.map.lock();
        let old_key = state.path();
        map.remove(&old_key);

        let conflicted = map.contains_key(&new_key);
        if conflicted {
            log::debug!("rename conflict: {new_key} already present, leaving existing target untouched");
        } else {
            state.rename_to(new_key.clone());
            map.insert(new_key.clone(), state.clone());
        }

        if is_dir {
            let prefix = format!("{old_key}\\");
            for (k, descendant) in map.iter() {
                if k.starts_with(&prefix) && k != &old_key {
                    descendant.set_status(FileStatus::NotExist);
                    descendant.set_file_id(crate::state::UNKNOWN_FILE_ID);
                }
            }
        }
        drop(map);

        if conflicted {
            self.record(&format!("rename conflict: {new_key} already present"));
        }
        Ok(())
    }

    /// Flushes every cached state, invoking `state_closed` for each
    /// (outside the lock).
    pub fn remove_all(&self) {
        let drained: Vec<Arc<FileState>> = self.map.lock().drain().map(|(_, v)| v).collect();
        for state in &drained {
            self.notify_closed(state);
        }
    }

    /// Evicts entries that are not `permanent`, have passed their
    /// `expiry_time`, have `open_count == 0`, and are not vetoed by the
    /// listener's `state_expired`. Returns the number evicted.
    pub fn sweep_expired(&self) -> usize {
        let now = now_ms();
        let listener = self.listener.lock().clone();

        let candidates: Vec<(String, Arc<FileState>)> = {
            let map = self.map.lock();
            map.iter()
                .filter(|(_, s)| s.expiry_time() != PERMANENT && s.is_expired(now) && s.open_count() == 0)
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect()
        };

        let mut evicted = 0;
        for (key, state) in candidates {
            if let Some(l) = &listener {
                if !l.state_expired(&state) {
                    continue;
                }
            }
            if self.map.lock().remove(&key).is_some() {
                evicted += 1;
            }
        }
        if evicted > 0 {
            self.record(&format!("swept {evicted} expired file state(s)"));
        }
        evicted
    }

    fn notify_closed(&self, state: &Arc<FileState>) {
        if let Some(listener) = self.listener.lock().clone() {
            listener.state_closed(state);
        }
    }
}
