use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbPoolError {
    #[error("the pool has already been shut down")]
    ShutDown,
    #[error("connection id {0} is not currently leased by this pool")]
    UnknownLease(u64),
}

pub type Result<T> = std::result::Result<T, DbPoolError>;
