//! Error types for the talkback turn controller.

/// Top-level error type for the spoken dialogue loop.
#[derive(Debug, thiserror::Error)]
pub enum TalkError {
    /// Audio device or capture stream error.
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text transcription error.
    #[error("STT error: {0}")]
    Stt(String),

    /// Generation engine error (load, tokenize, decode).
    #[error("engine error: {0}")]
    Engine(String),

    /// Persisted session cache could not be read or written.
    #[error("session error: {0}")]
    Session(String),

    /// Speech output error.
    #[error("TTS error: {0}")]
    Tts(String),

    /// Model download or loading error.
    #[error("model error: {0}")]
    Model(String),

    /// Configuration error.
    #[error("config error: {0}")]
    Config(String),

    /// Turn controller error.
    #[error("pipeline error: {0}")]
    Pipeline(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, TalkError>;
