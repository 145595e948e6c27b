pub type Result<T> = std::result::Result<T, WorkerError>;

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("{0}")]
    InvalidParams(String),

    #[error("{0}")]
    CacheMiss(String),

    #[error("no element matches selector \"{0}\"")]
    NoMatch(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Cdp(#[from] bdg_cdp::CdpError),

    #[error(transparent)]
    State(#[from] bdg_core::StateError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Startup(String),
}

impl WorkerError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }
}
