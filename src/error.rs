//! Error types for the voice chat gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while serving a voice chat exchange
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// TLS handshake, DNS, or connect timeout before any bytes were exchanged
    #[error("connection error: {0}")]
    Connection(String),

    /// Malformed status line or header block
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Peer answered with a non-success status
    #[error("remote API error {status}: {message}")]
    RemoteApi { status: u16, message: String },

    /// Synthesis request rejected before sending
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Speech-to-text stage failed
    #[error("transcription error: {0}")]
    Transcription(String),

    /// Chat completion stage failed
    #[error("chat error: {0}")]
    Chat(String),

    /// Conversation history could not be loaded or stored
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Live consumer went away mid-stream
    #[error("stream cancelled: {0}")]
    Cancelled(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Short machine-readable code used in JSON error bodies
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "not_configured",
            Self::Connection(_) => "connection_failed",
            Self::Protocol(_) => "protocol_error",
            Self::RemoteApi { .. } => "synthesis_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::Transcription(_) => "transcription_failed",
            Self::Chat(_) => "chat_failed",
            Self::Persistence(_) => "persistence_failed",
            Self::Cancelled(_) => "cancelled",
            Self::Io(_) => "io_error",
            Self::Serialization(_) | Self::Toml(_) => "serialization_error",
        }
    }
}
