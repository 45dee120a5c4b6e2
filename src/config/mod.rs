//! Configuration management for Cadence
//!
//! Values are layered: built-in defaults, then the TOML file, then
//! `CADENCE_*` environment variables.

pub mod file;

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use crate::conversation::DEFAULT_MAX_HISTORY;
use crate::stream::DEFAULT_EMOTION_WINDOW;
use crate::{Error, Result};

use self::file::CadenceConfigFile;

static DEFAULT_LLM_ENDPOINT: LazyLock<Url> = LazyLock::new(|| {
    Url::parse("http://localhost:8080/v1/chat/completions").expect("valid endpoint")
});
static DEFAULT_TTS_ENDPOINT: LazyLock<Url> = LazyLock::new(|| {
    Url::parse("http://localhost:8880/dev/captioned_speech").expect("valid endpoint")
});
static DEFAULT_STT_ENDPOINT: LazyLock<Url> = LazyLock::new(|| {
    Url::parse("http://localhost:8000/v1/audio/transcriptions").expect("valid endpoint")
});

/// Persona prompt used when none is configured
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
Your name is Ava. You are a friendly, expressive conversational assistant embodied as a 3D avatar.

Your responses are read aloud by a text-to-speech engine, so write exactly as a person would speak:
- Use flowing, natural sentences only. No lists, bullet points, numbered steps or headers.
- Never use parentheses for asides. Say \"also known as\" or \"which is\" instead.
- Never use markdown or emojis.
- Spell out abbreviations. Say \"for example\", not \"e.g.\".

Match your response length to the request. Be brief for simple questions.

You MUST begin every response with exactly one emotion tag in brackets. Available emotions: \
[neutral], [happy], [sad], [angry], [fear], [disgust], [love], [sleep].

Examples:
[happy] Hey, great to see you!
[neutral] The capital of France is Paris.
[sad] I'm sorry to hear that happened.

Always include the emotion tag. Never skip it.";

/// Cadence configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub llm: LlmConfig,
    pub tts: TtsConfig,
    pub stt: SttConfig,
    pub turn: TurnConfig,
}

/// Chat completion service
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub endpoint: Url,
    pub model: String,
    pub max_tokens: u32,
    /// Sent as a bearer token when present
    pub api_key: Option<SecretString>,
    pub system_prompt: String,
}

/// Speech synthesis service
#[derive(Debug, Clone)]
pub struct TtsConfig {
    pub endpoint: Url,
    pub model: String,
    pub voice: String,
    pub speed: f32,
}

/// Transcription service
#[derive(Debug, Clone)]
pub struct SttConfig {
    pub endpoint: Url,
    pub model: String,
}

/// Turn handling limits and timings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    /// Retained user/assistant messages
    pub max_history: usize,
    /// Retries after the first failed model request
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Pause after the last sentence before returning to idle
    pub finish_grace: Duration,
    /// Clean characters to wait for an emotion tag
    pub emotion_window: usize,
    /// How long a non-neutral mood lasts without being refreshed
    pub mood_decay: Duration,
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self {
            max_history: DEFAULT_MAX_HISTORY,
            max_retries: 2,
            retry_delay: Duration::from_millis(1000),
            finish_grace: Duration::from_millis(200),
            emotion_window: DEFAULT_EMOTION_WINDOW,
            mood_decay: Duration::from_millis(15_000),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                endpoint: DEFAULT_LLM_ENDPOINT.clone(),
                model: "default".to_string(),
                max_tokens: 1024,
                api_key: None,
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            tts: TtsConfig {
                endpoint: DEFAULT_TTS_ENDPOINT.clone(),
                model: "kokoro".to_string(),
                voice: "af_bella".to_string(),
                speed: 1.0,
            },
            stt: SttConfig {
                endpoint: DEFAULT_STT_ENDPOINT.clone(),
                model: "whisper-1".to_string(),
            },
            turn: TurnConfig::default(),
        }
    }
}

fn parse_endpoint(name: &str, raw: &str) -> Result<Url> {
    let url = Url::parse(raw).map_err(|e| Error::Config(format!("invalid {name} '{raw}': {e}")))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Config(format!(
            "invalid {name} '{raw}': expected http or https"
        )));
    }
    Ok(url)
}

impl Config {
    /// Load configuration from the TOML file (explicit or standard path)
    /// and the process environment
    ///
    /// # Errors
    ///
    /// Returns error if an explicit file is unreadable or invalid, or if an
    /// endpoint is not a valid URL
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = file::load_config_file(path)?;
        let mut config = Self::default();
        config.apply_file(file)?;
        config.apply_env(|key| std::env::var(key).ok())?;

        tracing::debug!(
            llm = %config.llm.endpoint,
            model = %config.llm.model,
            tts = %config.tts.endpoint,
            stt = %config.stt.endpoint,
            "configuration loaded"
        );
        Ok(config)
    }

    /// Overlay values present in the config file
    ///
    /// # Errors
    ///
    /// Returns error if an endpoint is not a valid URL
    pub fn apply_file(&mut self, file: CadenceConfigFile) -> Result<()> {
        let CadenceConfigFile { llm, tts, stt, turn } = file;

        if let Some(endpoint) = llm.endpoint {
            self.llm.endpoint = parse_endpoint("llm.endpoint", &endpoint)?;
        }
        if let Some(model) = llm.model {
            self.llm.model = model;
        }
        if let Some(max_tokens) = llm.max_tokens {
            self.llm.max_tokens = max_tokens;
        }
        if let Some(key) = llm.api_key {
            self.llm.api_key = Some(SecretString::from(key));
        }
        if let Some(prompt) = llm.system_prompt {
            self.llm.system_prompt = prompt;
        }

        if let Some(endpoint) = tts.endpoint {
            self.tts.endpoint = parse_endpoint("tts.endpoint", &endpoint)?;
        }
        if let Some(model) = tts.model {
            self.tts.model = model;
        }
        if let Some(voice) = tts.voice {
            self.tts.voice = voice;
        }
        if let Some(speed) = tts.speed {
            self.tts.speed = speed;
        }

        if let Some(endpoint) = stt.endpoint {
            self.stt.endpoint = parse_endpoint("stt.endpoint", &endpoint)?;
        }
        if let Some(model) = stt.model {
            self.stt.model = model;
        }

        let t = &mut self.turn;
        t.max_history = turn.max_history.unwrap_or(t.max_history);
        t.max_retries = turn.max_retries.unwrap_or(t.max_retries);
        t.retry_delay = turn.retry_delay_ms.map_or(t.retry_delay, Duration::from_millis);
        t.finish_grace = turn
            .finish_grace_ms
            .map_or(t.finish_grace, Duration::from_millis);
        t.emotion_window = turn.emotion_window.unwrap_or(t.emotion_window);
        t.mood_decay = turn.mood_decay_ms.map_or(t.mood_decay, Duration::from_millis);

        Ok(())
    }

    /// Overlay `CADENCE_*` variables resolved through `lookup`
    ///
    /// # Errors
    ///
    /// Returns error if an endpoint is not a valid URL
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(endpoint) = var("CADENCE_LLM_ENDPOINT") {
            self.llm.endpoint = parse_endpoint("CADENCE_LLM_ENDPOINT", &endpoint)?;
        }
        if let Some(model) = var("CADENCE_LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(key) = var("CADENCE_LLM_API_KEY") {
            self.llm.api_key = Some(SecretString::from(key));
        }
        if let Some(prompt) = var("CADENCE_SYSTEM_PROMPT") {
            self.llm.system_prompt = prompt;
        }
        if let Some(endpoint) = var("CADENCE_TTS_ENDPOINT") {
            self.tts.endpoint = parse_endpoint("CADENCE_TTS_ENDPOINT", &endpoint)?;
        }
        if let Some(voice) = var("CADENCE_TTS_VOICE") {
            self.tts.voice = voice;
        }
        if let Some(endpoint) = var("CADENCE_STT_ENDPOINT") {
            self.stt.endpoint = parse_endpoint("CADENCE_STT_ENDPOINT", &endpoint)?;
        }

        Ok(())
    }
}
