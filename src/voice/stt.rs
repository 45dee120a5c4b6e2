//! Speech-to-text (STT) processing

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

use crate::config::SttConfig;
use crate::{Error, Result};

/// Sample rate the transcription service expects (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Response from a Whisper-compatible transcription API
#[derive(serde::Deserialize)]
struct WhisperResponse {
    #[serde(default)]
    text: String,
}

/// Classified transcription failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SttError {
    #[error("microphone access was denied, allow it and try again")]
    PermissionDenied,

    #[error("no microphone found, connect one and try again")]
    NoDevice,

    #[error("cannot reach transcription service: {0}")]
    Unreachable(String),

    #[error("transcription server error ({0}), check service logs")]
    Server(u16),

    #[error("transcription request error ({status}): {message}")]
    Request { status: u16, message: String },

    #[error("transcription failed: {0}")]
    Other(String),
}

impl SttError {
    /// Classify a non-success HTTP status
    #[must_use]
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        if status >= 500 {
            Self::Server(status)
        } else {
            Self::Request {
                status,
                message: message.into(),
            }
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
            Self::Other(err.to_string())
        }
    }
}

/// Notifications from a speech capture pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SttEvent {
    /// Voice activity started
    SpeechStart,
    /// Voice activity ended; audio is being transcribed
    SpeechEnd,
    /// Final transcript of the utterance
    Transcription(String),
    Error(SttError),
}

/// Speech capture pipeline that the orchestrator starts and pauses
///
/// Implementations report progress as [`SttEvent`]s through whatever channel
/// they were built with.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Begin (or resume) listening
    ///
    /// # Errors
    ///
    /// Returns a classified error if capture cannot start
    async fn start(&self) -> std::result::Result<(), SttError>;

    /// Stop listening until the next `start`
    fn pause(&self);
}

/// Transcribes speech to text with a Whisper-compatible service
pub struct SpeechToText {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
}

impl SpeechToText {
    #[must_use]
    pub fn new(config: &SttConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
        }
    }

    /// Transcribe audio to text
    ///
    /// # Arguments
    ///
    /// * `audio` - WAV audio bytes
    ///
    /// Returns `None` when the service heard nothing.
    ///
    /// # Errors
    ///
    /// Returns a classified error if transcription fails
    pub async fn transcribe(&self, audio: &[u8]) -> std::result::Result<Option<String>, SttError> {
        tracing::debug!(audio_bytes = audio.len(), "starting transcription");

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(audio.to_vec())
                    .file_name("audio.wav")
                    .mime_str("audio/wav")
                    .map_err(|e| SttError::Other(e.to_string()))?,
            )
            .text("model", self.model.clone())
            .text("response_format", "json");

        let response = self
            .client
            .post(self.endpoint.clone())
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "transcription request failed");
                SttError::from_transport(&e)
            })?;

        let status = response.status();
        tracing::debug!(status = %status, "received response");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "transcription API error");
            return Err(SttError::from_status(status.as_u16(), body));
        }

        let result: WhisperResponse = response.json().await.map_err(|e| {
            tracing::error!(error = %e, "failed to parse response");
            SttError::Other(e.to_string())
        })?;

        let text = result.text.trim();
        if text.is_empty() {
            tracing::debug!("empty transcription");
            return Ok(None);
        }

        tracing::info!(transcript = %text, "transcription complete");
        Ok(Some(text.to_string()))
    }

    /// Encode captured samples as WAV and transcribe them
    ///
    /// # Errors
    ///
    /// Returns error if encoding or transcription fails
    pub async fn transcribe_samples(&self, samples: &[f32]) -> Result<Option<String>> {
        let wav = samples_to_wav(samples, SAMPLE_RATE)?;
        Ok(self.transcribe(&wav).await?)
    }
}

/// Convert f32 samples to WAV bytes (16-bit mono)
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for &sample in samples {
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
