//! Language model access
//!
//! The orchestrator talks to the model through [`ModelClient`]; failures are
//! classified into [`LlmError`] at this boundary so nothing downstream needs
//! to look at transport details.

mod client;

use async_trait::async_trait;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::conversation::Message;

pub use client::{ChatClient, token_stream};

/// Incremental reply tokens, in arrival order
pub type TokenStream = BoxStream<'static, Result<String, LlmError>>;

/// Classified model failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LlmError {
    /// The request was cancelled by the caller
    #[error("LLM request cancelled")]
    Cancelled,

    #[error("LLM service is busy, try again shortly")]
    Busy,

    #[error("LLM model not found, check model configuration")]
    ModelNotFound,

    #[error("LLM server error ({0}), check service logs")]
    Server(u16),

    #[error("LLM request error ({status}): {message}")]
    Request { status: u16, message: String },

    #[error("cannot reach LLM service: {0}")]
    Unreachable(String),

    /// The stream broke after the response started
    #[error("LLM stream error: {0}")]
    Stream(String),
}

impl LlmError {
    /// Classify a non-success HTTP status
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        match status {
            503 => Self::Busy,
            404 => Self::ModelNotFound,
            500..=599 => Self::Server(status),
            _ => Self::Request {
                status,
                message: message.into(),
            },
        }
    }

    /// Classify a transport error from the HTTP client
    #[must_use]
    pub fn from_transport(err: &reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Self::Unreachable(err.to_string())
        } else if let Some(status) = err.status() {
            Self::from_status(status.as_u16(), err.to_string())
        } else {
            Self::Stream(err.to_string())
        }
    }

    /// Cancellation is the expected outcome of an interrupt and is never
    /// retried or surfaced
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Streaming chat-completion backend
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Start a streamed completion for `messages`.
    ///
    /// The concatenation of every yielded token is the full reply.
    ///
    /// # Errors
    ///
    /// Returns a classified error if the request cannot be started
    async fn stream_chat(&self, messages: &[Message]) -> Result<TokenStream, LlmError>;
}
