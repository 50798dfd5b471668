use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorType {
    InvalidRequestError,
    RateLimitError,
    AuthenticationError,
    ServerError,
    #[serde(other)]
    Unknown,
}

/// Payload of an inbound `error` event.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct ServerError {
    #[serde(rename = "type")]
    pub error_type: ApiErrorType,
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
    #[serde(default)]
    pub param: Option<String>,
    #[serde(default)]
    pub event_id: Option<String>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to encode client event: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("Failed to decode server event: {0}")]
    Decoding(String),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("OpenAI API error: {0:?}")]
    Api(ServerError),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("The session already has a live connection")]
    AlreadyStarted,

    #[error("No tokio runtime available: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Invalid client event: {0}")]
    InvalidClientEvent(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidToolArguments(String),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Whether the socket is unusable after this error.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        use tokio_tungstenite::tungstenite::Error as WsError;
        matches!(
            self,
            Self::ConnectionClosed
                | Self::Io(_)
                | Self::WebSocket(WsError::ConnectionClosed | WsError::AlreadyClosed | WsError::Io(_))
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
