use thiserror::Error;

/// Errors surfaced by the thread-request pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker count {0} is out of range [{MIN_WORKERS}, {MAX_WORKERS}]")]
    InvalidWorkerCount(usize),
}

pub type Result<T> = std::result::Result<T, PoolError>;

pub const MIN_WORKERS: usize = 4;
pub const MAX_WORKERS: usize = 250;
pub const DEFAULT_WORKERS: usize = 25;
