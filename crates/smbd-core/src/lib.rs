//! Facade crate wiring the thread-request pool, DB connection pool,
//! file-state cache and change-notification dispatcher into one
//! construction-time-configured core.

mod config;
mod core;
mod diagnostics;
mod error;

pub use config::Config;
pub use core::SmbdCore;
pub use diagnostics::{Diagnostics, DiagnosticsRegistry, LogDiagnostics};
pub use error::{CoreError, Result};

// Re-export each component's public surface so callers need only this
// crate to assemble and drive the core.
pub use smbd_dbpool as dbpool;
pub use smbd_filecache as filecache;
pub use smbd_notify as notify;
pub use smbd_threadpool as threadpool;

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    struct NullConnection;
    impl dbpool::DbConnection for NullConnection {
        fn is_closed(&self) -> bool {
            false
        }
        fn probe_liveness(&mut self) -> bool {
            true
        }
    }

    struct AlwaysOnlineFactory;
    impl dbpool::ConnectionFactory for AlwaysOnlineFactory {
        fn connect(&self) -> Option<Box<dyn dbpool::DbConnection>> {
            Some(Box::new(NullConnection))
        }
    }

    struct EmptyResponseBuilder;
    impl notify::ResponseBuilder for EmptyResponseBuilder {
        fn build_notification_response(
            &self,
            _event: Option<&notify::ChangeEvent>,
            _request: &notify::NotifyRequest,
        ) -> notify::ResponsePacket {
            notify::ResponsePacket(Vec::new())
        }
    }

    #[test]
    fn config_parses_recognized_keys_and_ignores_unknown_ones() {
        let mut opts = HashMap::new();
        opts.insert("pool.workers".to_string(), "8".to_string());
        opts.insert("cache.caseSensitive".to_string(), "true".to_string());
        opts.insert("totally.unknown".to_string(), "ignored".to_string());

        let config = Config::from_options(&opts).unwrap();
        assert_eq!(config.pool_workers, 8);
        assert!(config.cache_case_sensitive);
        assert_eq!(config.db_min, 5, "unrelated defaults must be untouched");
    }

    #[test]
    fn config_rejects_malformed_values() {
        let mut opts = HashMap::new();
        opts.insert("pool.workers".to_string(), "not-a-number".to_string());
        assert!(Config::from_options(&opts).is_err());
    }

    #[test]
    fn diagnostics_registry_rejects_unknown_sink() {
        let registry = DiagnosticsRegistry::with_defaults();
        assert!(registry.build("log").is_ok());
        assert!(registry.build("does-not-exist").is_err());
    }

    #[test]
    fn core_assembles_and_shuts_down() {
        let config = Config {
            pool_workers: 4,
            ..Config::default()
        };
        let core = SmbdCore::new(config, Box::new(AlwaysOnlineFactory), Arc::new(EmptyResponseBuilder))
            .expect("core should assemble from valid config");

        let found = AtomicBool::new(false);
        let state = core
            .cache
            .find_or_create("\\A", filecache::FileStatus::DirectoryExists)
            .unwrap();
        found.store(state.status() == filecache::FileStatus::DirectoryExists, Ordering::SeqCst);
        assert!(found.load(Ordering::SeqCst));

        let lease = core.db.acquire(dbpool::LeaseDuration::Millis(1_000));
        assert!(lease.is_some());

        core.shutdown();
    }
}
