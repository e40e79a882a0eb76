use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("request is not registered with this dispatcher")]
    UnknownRequest,
}

pub type Result<T> = std::result::Result<T, DispatchError>;
