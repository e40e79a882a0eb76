use std::sync::Arc;

use smbd_dbpool::{ConnectionFactory, DbPool};
use smbd_filecache::FileStateCache;
use smbd_notify::{Dispatcher, ResponseBuilder};
use smbd_threadpool::{ThreadPool, TimedRequest};

use crate::config::Config;
use crate::diagnostics::DiagnosticsRegistry;
use crate::error::Result;

/// Wires the four components together: the thread pool drives the
/// cache's expiry sweep, the dispatcher offloads response sends onto the
/// same pool, and the DB pool runs independently alongside both. All
/// four share a single diagnostics sink, built from the registry's
/// `"log"` default.
pub struct SmbdCore {
    pub pool: Arc<ThreadPool>,
    pub db: Arc<DbPool>,
    pub cache: Arc<FileStateCache>,
    pub dispatcher: Arc<Dispatcher>,
    sweep_handle: Arc<TimedRequest>,
}

impl SmbdCore {
    pub fn new(
        config: Config,
        db_factory: Box<dyn ConnectionFactory>,
        response_builder: Arc<dyn ResponseBuilder>,
    ) -> Result<Arc<Self>> {
        let pool = ThreadPool::new(config.pool_config()?);
        let cache = FileStateCache::new(config.cache_config());
        let sweep_handle = cache.schedule_sweep(&pool, config.cache_expire_interval_ms);

        let db = DbPool::new(db_factory, config.db_config());

        let dispatcher = Arc::new(
            Dispatcher::new(response_builder, config.dispatcher_config()).with_pool(pool.handle()),
        );

        let diagnostics = DiagnosticsRegistry::with_defaults().build("log")?;
        pool.set_diagnostics(diagnostics.clone());
        db.set_diagnostics(diagnostics.clone());
        cache.set_diagnostics(diagnostics.clone());
        dispatcher.set_diagnostics(diagnostics);

        Ok(Arc::new(Self {
            pool,
            db,
            cache,
            dispatcher,
            sweep_handle,
        }))
    }

    /// Shuts down the DB pool and thread pool (which also halts the
    /// cache's sweep). The dispatcher holds no background resources of
    /// its own.
    pub fn shutdown(&self) {
        self.pool.remove_timed(&self.sweep_handle);
        self.db.shutdown();
        self.pool.shutdown();
    }
}
