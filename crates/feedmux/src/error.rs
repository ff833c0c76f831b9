//! Multiplexer error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Connection closed: code={code}, reason={reason}")]
    ConnectionClosed { code: u16, reason: String },

    #[error("Heartbeat timeout")]
    HeartbeatTimeout,

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type MuxResult<T> = Result<T, MuxError>;
