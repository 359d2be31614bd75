//! Error types for the advisor gateway

use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the advisor gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Telephony control error (answer, capture, playback, teardown)
    #[error("telephony error: {0}")]
    Telephony(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Text generation error
    #[error("LLM error: {0}")]
    Llm(String),

    /// A session already exists for this call
    #[error("duplicate call: {0}")]
    DuplicateCall(String),

    /// No session exists for this call
    #[error("call not found: {0}")]
    CallNotFound(String),

    /// New calls are refused while the process shuts down
    #[error("shutting down, not accepting new calls")]
    ShuttingDown,

    /// Call state machine was asked to make an illegal move
    #[error("invalid call transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Lead persistence error
    #[error("persistence error: {0}")]
    Persistence(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl Error {
    /// Whether the error came from an external collaborator and is safe
    /// to recover from inside a turn
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Telephony(_) | Self::Stt(_) | Self::Tts(_) | Self::Llm(_) | Self::Http(_)
        )
    }
}
