//! Path-keyed file-state cache: expiry, atomic create-or-get, and
//! rename propagation to descendants.

mod cache;
mod error;
mod state;

pub use cache::{CacheConfig, FileStateCache, StateListener, normalize};
pub use error::{CacheError, Result};
pub use state::{FileState, FileStatus, PERMANENT, UNKNOWN_FILE_ID};

use std::sync::Arc;
use std::time::Duration;

use smbd_threadpool::{ThreadPool, ThreadRequest, TimedRequest, now_ms};

impl FileStateCache {
    /// Schedules this cache's expiry sweep as a repeating timed request
    /// on `pool`, firing every `interval_ms`. Returns the `TimedRequest`
    /// handle so the caller can `pool.remove_timed(&handle)` later.
    pub fn schedule_sweep(self: &Arc<Self>, pool: &ThreadPool, interval_ms: u64) -> Arc<TimedRequest> {
        let cache = self.clone();
        let task: Arc<dyn ThreadRequest> = Arc::new(move || {
            let evicted = cache.sweep_expired();
            if evicted > 0 {
                log::debug!("swept {evicted} expired file state(s)");
            }
        });
        let treq = TimedRequest::new(task, 0, Some(Duration::from_millis(interval_ms)));
        pool.queue_timed(treq.clone(), now_ms() + interval_ms);
        treq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    fn cache() -> Arc<FileStateCache> {
        FileStateCache::new(CacheConfig::default())
    }

    #[test]
    fn find_or_create_is_idempotent() {
        let cache = cache();
        let a = cache.find_or_create("\\A\\x.txt", FileStatus::FileExists).unwrap();
        let b = cache.find_or_create("\\a\\X.TXT", FileStatus::FileExists).unwrap();
        assert!(Arc::ptr_eq(&a, &b), "case-insensitive lookup must hit the same state");
    }

    #[test]
    fn find_or_create_rejects_a_path_that_normalizes_to_empty() {
        let cache = cache();
        assert!(cache.find_or_create("\\\\", FileStatus::FileExists).is_err());
    }

    #[test]
    fn normalize_trims_trailing_separator_but_not_root() {
        assert_eq!(normalize("\\A\\B\\", false), "\\A\\B");
        assert_eq!(normalize("\\", false), "\\");
        assert_eq!(normalize("\\a\\b", false), "\\A\\B");
    }

    #[test]
    fn rename_propagates_not_exist_to_descendants_only() {
        let cache = cache();
        let state_a = cache.find_or_create("\\A", FileStatus::DirectoryExists).unwrap();
        let state_ab = cache.find_or_create("\\A\\B", FileStatus::DirectoryExists).unwrap();
        let state_abc = cache.find_or_create("\\A\\B\\C", FileStatus::FileExists).unwrap();
        let state_x = cache.find_or_create("\\X", FileStatus::DirectoryExists).unwrap();

        cache.rename(&state_a, "\\Y", true).unwrap();

        assert_eq!(cache.find("\\Y").unwrap().status(), FileStatus::DirectoryExists);
        assert!(cache.find("\\A").is_none());
        assert_eq!(state_ab.status(), FileStatus::NotExist);
        assert_eq!(state_ab.file_id(), UNKNOWN_FILE_ID);
        assert_eq!(state_abc.status(), FileStatus::NotExist);
        assert_eq!(state_abc.file_id(), UNKNOWN_FILE_ID);
        assert_eq!(state_x.status(), FileStatus::DirectoryExists);
    }

    #[test]
    fn rename_conflict_leaves_existing_target_untouched() {
        let cache = cache();
        let source = cache.find_or_create("\\A", FileStatus::FileExists).unwrap();
        let target = cache.find_or_create("\\B", FileStatus::DirectoryExists).unwrap();

        cache.rename(&source, "\\B", false).unwrap();

        // The old key is gone either way...
        assert!(cache.find("\\A").is_none());
        // ...but the pre-existing target entry is untouched, not
        // overwritten by the renamed source.
        let found = cache.find("\\B").unwrap();
        assert!(Arc::ptr_eq(&found, &target));
        assert_eq!(found.status(), FileStatus::DirectoryExists);
    }

    struct RecordingListener {
        closed: StdMutex<Vec<String>>,
        veto: bool,
    }
    impl StateListener for RecordingListener {
        fn state_closed(&self, state: &Arc<FileState>) {
            self.closed.lock().unwrap().push(state.path());
        }
        fn state_expired(&self, _state: &Arc<FileState>) -> bool {
            !self.veto
        }
    }

    #[test]
    fn sweep_expired_respects_open_count_and_veto() {
        let cache = cache();
        let listener = Arc::new(RecordingListener {
            closed: StdMutex::new(Vec::new()),
            veto: true,
        });
        cache.set_listener(listener.clone());

        let state = cache.find_or_create("\\A\\open.txt", FileStatus::FileExists).unwrap();
        state.set_expiry_time(0); // already expired
        state.open();

        assert_eq!(cache.sweep_expired(), 0, "open references must block eviction");

        state.close_reference();
        assert_eq!(cache.sweep_expired(), 0, "listener veto must block eviction");

        let listener2 = Arc::new(RecordingListener {
            closed: StdMutex::new(Vec::new()),
            veto: false,
        });
        cache.set_listener(listener2);
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.find("\\A\\open.txt").is_none());
    }

    #[test]
    fn sweep_expired_on_empty_cache_is_a_no_op() {
        let cache = cache();
        assert_eq!(cache.sweep_expired(), 0);
    }

    #[test]
    fn remove_all_notifies_closed_for_every_state() {
        let cache = cache();
        let listener = Arc::new(RecordingListener {
            closed: StdMutex::new(Vec::new()),
            veto: false,
        });
        cache.set_listener(listener.clone());
        cache.find_or_create("\\A", FileStatus::DirectoryExists).unwrap();
        cache.find_or_create("\\B", FileStatus::FileExists).unwrap();

        cache.remove_all();

        let mut closed = listener.closed.lock().unwrap().clone();
        closed.sort();
        assert_eq!(closed, vec!["\\A".to_string(), "\\B".to_string()]);
    }
}
