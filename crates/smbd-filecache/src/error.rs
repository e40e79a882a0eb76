use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("path is empty after normalization")]
    EmptyPath,
}

pub type Result<T> = std::result::Result<T, CacheError>;
