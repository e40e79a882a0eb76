use std::collections::HashMap;

use crate::error::{CoreError, Result};

/// Construction-time options, built from a flat key/value table — the
/// core takes no config file format a stance, the caller is responsible
/// for getting key/value pairs from wherever it likes. Unknown keys are
/// ignored; a recognized key with an unparsable value is a `CoreError`.
#[derive(Debug, Clone, Copy)]
pub struct Config {
    pub cache_initial_size: usize,
    pub cache_case_sensitive: bool,
    pub cache_expire_interval_ms: u64,
    pub notify_default_lease_ms: u64,
    pub notify_buffer_limit: usize,
    pub pool_workers: usize,
    pub db_min: usize,
    pub db_max: usize,
    pub db_lease_ms: u64,
    pub db_online_check_interval: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_initial_size: 500,
            cache_case_sensitive: false,
            cache_expire_interval_ms: 60_000,
            notify_default_lease_ms: 600_000,
            notify_buffer_limit: 64,
            pool_workers: 25,
            db_min: 5,
            db_max: 10,
            db_lease_ms: 30_000,
            db_online_check_interval: 20,
        }
    }
}

macro_rules! apply {
    ($opts:expr, $out:expr, $key:literal, $field:ident) => {
        if let Some(raw) = $opts.get($key) {
            $out.$field = parse(raw, $key, "integer")?;
        }
    };
}

impl Config {
    pub fn from_options(opts: &HashMap<String, String>) -> Result<Self> {
        let mut config = Self::default();

        apply!(opts, config, "cache.initialSize", cache_initial_size);
        if let Some(raw) = opts.get("cache.caseSensitive") {
            config.cache_case_sensitive = parse_bool(raw, "cache.caseSensitive")?;
        }
        apply!(opts, config, "cache.expireIntervalMs", cache_expire_interval_ms);
        apply!(opts, config, "notify.defaultLeaseMs", notify_default_lease_ms);
        apply!(opts, config, "notify.bufferLimit", notify_buffer_limit);
        apply!(opts, config, "pool.workers", pool_workers);
        apply!(opts, config, "db.min", db_min);
        apply!(opts, config, "db.max", db_max);
        apply!(opts, config, "db.leaseMs", db_lease_ms);
        apply!(opts, config, "db.onlineCheckInterval", db_online_check_interval);

        Ok(config)
    }

    pub fn cache_config(&self) -> smbd_filecache::CacheConfig {
        smbd_filecache::CacheConfig {
            initial_size: self.cache_initial_size,
            case_sensitive: self.cache_case_sensitive,
            expire_interval_ms: self.cache_expire_interval_ms,
        }
    }

    pub fn dispatcher_config(&self) -> smbd_notify::DispatcherConfig {
        smbd_notify::DispatcherConfig {
            default_lease_ms: self.notify_default_lease_ms,
            buffer_limit: self.notify_buffer_limit,
        }
    }

    pub fn pool_config(&self) -> Result<smbd_threadpool::PoolConfig> {
        Ok(smbd_threadpool::PoolConfig::with_workers(self.pool_workers)?)
    }

    pub fn db_config(&self) -> smbd_dbpool::DbPoolConfig {
        smbd_dbpool::DbPoolConfig {
            min: self.db_min,
            max: self.db_max,
            lease_ms: self.db_lease_ms,
            online_check_interval: self.db_online_check_interval,
        }
    }
}

fn parse<T: std::str::FromStr>(raw: &str, key: &str, expected: &'static str) -> Result<T> {
    raw.parse().map_err(|_| CoreError::InvalidOption {
        key: key.to_string(),
        value: raw.to_string(),
        expected,
    })
}

fn parse_bool(raw: &str, key: &str) -> Result<bool> {
    match raw {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        other => Err(CoreError::InvalidOption {
            key: key.to_string(),
            value: other.to_string(),
            expected: "boolean",
        }),
    }
}
