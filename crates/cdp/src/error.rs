pub type Result<T> = std::result::Result<T, CdpError>;

#[derive(Debug, thiserror::Error)]
pub enum CdpError {
    #[error("CDP command timed out: {0}")]
    Timeout(String),

    #[error("browser connection closed: {0}")]
    TargetClosed(String),

    #[error("CDP protocol error: {0}")]
    Protocol(String),

    #[error("WebSocket error: {0}")]
    Transport(String),

    #[error("debugging endpoint unreachable: {0}")]
    Endpoint(String),

    #[error("browser launch failed: {0}")]
    Launch(String),
}
