//! Error types for the companion pipeline.

/// Top-level error type for the streaming-chat system.
#[derive(Debug, thiserror::Error)]
pub enum CompanionError {
    /// Reply stream error (connection, read, or inactivity timeout).
    #[error("stream error: {0}")]
    Stream(String),

    /// Speech synthesis error (TTS call failed or returned empty audio).
    #[error("synthesis error: {0}")]
    Synthesis(String),

    /// Audio bytes could not be decoded.
    #[error("decode error: {0}")]
    Decode(String),

    /// Audio device or playback stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// A turn is already in flight; the call was rejected without
    /// mutating any state.
    #[error("a chat turn is already in progress")]
    TurnBusy,

    /// User input was empty or whitespace-only.
    #[error("empty user input")]
    EmptyInput,

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Channel send/receive error.
    #[error("channel error: {0}")]
    Channel(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, CompanionError>;
