use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("config option {key:?} has value {value:?} which is not a valid {expected}")]
    InvalidOption {
        key: String,
        value: String,
        expected: &'static str,
    },
    #[error("no diagnostics factory is registered under {0:?}")]
    UnknownDiagnosticsSink(String),
    #[error(transparent)]
    Pool(#[from] smbd_threadpool::PoolError),
}

pub type Result<T> = std::result::Result<T, CoreError>;
