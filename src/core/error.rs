use std::io;

use thiserror::Error;

pub type AlnResult<T> = Result<T, AlnError>;

#[derive(Debug, Error)]
pub enum AlnError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// An observer asked training to stop.
    #[error("training aborted by observer")]
    UserAbort,

    #[error("{0}")]
    Generic(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AlnError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        AlnError::InvalidArgument(msg.into())
    }
}
