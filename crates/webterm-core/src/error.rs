use thiserror::Error;

/// Errors produced by the webterm layers.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("token error: {0}")]
    Token(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("invalid frame: {0}")]
    Protocol(String),

    #[error("pty error: {0}")]
    Pty(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("timeout")]
    Timeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Protocol(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;
