//! Text-to-speech (TTS) processing

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use url::Url;

use crate::config::TtsConfig;
use crate::{Error, Result};

/// Sample rate of the PCM the synthesis service returns
pub const PCM_SAMPLE_RATE: u32 = 24000;

/// Timing of one spoken word, for lip sync and subtitles
#[derive(Debug, Clone, PartialEq)]
pub struct WordTiming {
    pub word: String,
    pub start_ms: f64,
    pub duration_ms: f64,
}

/// Synthesized audio for one sentence
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpeechAudio {
    /// Raw 16-bit little-endian mono PCM
    pub pcm: Vec<u8>,
    pub words: Vec<WordTiming>,
}

impl SpeechAudio {
    /// Playback length derived from the PCM size
    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        (self.pcm.len() as u64 / 2) * 1000 / u64::from(PCM_SAMPLE_RATE)
    }
}

/// Sentence-level speech synthesis backend
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize one sentence
    ///
    /// # Errors
    ///
    /// Returns error if synthesis fails
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio>;
}

#[derive(serde::Deserialize)]
struct CaptionedSpeech {
    audio: String,
    #[serde(default)]
    timestamps: Vec<WordTimestamp>,
}

#[derive(serde::Deserialize)]
struct WordTimestamp {
    word: String,
    /// Seconds
    start_time: f64,
    /// Seconds
    end_time: f64,
}

/// Synthesizes speech with word timestamps from a captioned-speech service
pub struct TextToSpeech {
    client: reqwest::Client,
    endpoint: Url,
    model: String,
    voice: String,
    speed: f32,
}

impl TextToSpeech {
    #[must_use]
    pub fn new(config: &TtsConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            model: config.model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
        }
    }

    pub fn set_voice(&mut self, voice: impl Into<String>) {
        self.voice = voice.into();
        tracing::info!(voice = %self.voice, "TTS voice changed");
    }
}

#[async_trait]
impl Synthesizer for TextToSpeech {
    async fn synthesize(&self, text: &str) -> Result<SpeechAudio> {
        #[derive(serde::Serialize)]
        struct TtsRequest<'a> {
            model: &'a str,
            input: &'a str,
            voice: &'a str,
            speed: f32,
            response_format: &'a str,
            stream: bool,
            return_timestamps: bool,
        }

        let request = TtsRequest {
            model: &self.model,
            input: text,
            voice: &self.voice,
            speed: self.speed,
            response_format: "pcm",
            stream: false,
            return_timestamps: true,
        };

        tracing::debug!(chars = text.len(), voice = %self.voice, "synthesizing sentence");

        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Tts(format!("TTS error {status}: {body}")));
        }

        let body: CaptionedSpeech = response.json().await?;
        decode_captioned(body)
    }
}

fn decode_captioned(body: CaptionedSpeech) -> Result<SpeechAudio> {
    let pcm = STANDARD
        .decode(body.audio.as_bytes())
        .map_err(|e| Error::Tts(format!("invalid audio payload: {e}")))?;

    let words = body
        .timestamps
        .into_iter()
        .map(|ts| WordTiming {
            word: ts.word,
            start_ms: ts.start_time * 1000.0,
            duration_ms: (ts.end_time - ts.start_time) * 1000.0,
        })
        .collect();

    Ok(SpeechAudio { pcm, words })
}
