use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the realtime client
#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("WebSocket connect failed: {0}")]
    Connect(String),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("JSON decode error: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Response has no `{0}` list")]
    MissingList(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("No tokio runtime available to drive the connection")]
    NoRuntime,

    #[error("Channel closed")]
    ChannelClosed,
}
