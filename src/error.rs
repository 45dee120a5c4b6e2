//! Error types for Cadence

use thiserror::Error;

use crate::llm::LlmError;
use crate::voice::SttError;

/// Result type alias for Cadence operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Cadence
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Speech-to-text error, already classified at the client boundary
    #[error("STT error: {0}")]
    Stt(#[from] SttError),

    /// Language model error, already classified at the client boundary
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Audio encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// The orchestrator task is gone
    #[error("orchestrator error: {0}")]
    Orchestrator(String),

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
}
