//! TOML configuration file loading
//!
//! Supports `~/.config/cadence/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::{Error, Result};

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CadenceConfigFile {
    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    #[serde(default)]
    pub stt: SttFileConfig,

    /// Turn timing and retention
    #[serde(default)]
    pub turn: TurnFileConfig,
}

/// Chat completion service
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// Full chat-completions URL
    pub endpoint: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub api_key: Option<String>,
    /// Persona prompt sent as the system message
    pub system_prompt: Option<String>,
}

/// Speech synthesis service
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Voice identifier (e.g. "af_bella")
    pub voice: Option<String>,
    pub speed: Option<f32>,
}

/// Transcription service
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    pub endpoint: Option<String>,
    /// Model name (e.g. "whisper-1")
    pub model: Option<String>,
}

/// Turn handling
#[derive(Debug, Default, Deserialize)]
pub struct TurnFileConfig {
    pub max_history: Option<usize>,
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub finish_grace_ms: Option<u64>,
    pub emotion_window: Option<usize>,
    pub mood_decay_ms: Option<u64>,
}

/// Load the TOML config file.
///
/// An explicit `path` must exist and parse. Without one, the standard path is
/// tried and a missing or broken file falls back to defaults.
///
/// # Errors
///
/// Returns error if an explicit file cannot be read or parsed
pub fn load_config_file(path: Option<&Path>) -> Result<CadenceConfigFile> {
    if let Some(path) = path {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            Error::Config(format!("failed to parse {}: {e}", path.display()))
        })?;
        tracing::info!(path = %path.display(), "loaded config file");
        return Ok(config);
    }

    let Some(path) = config_file_path() else {
        return Ok(CadenceConfigFile::default());
    };

    if !path.exists() {
        return Ok(CadenceConfigFile::default());
    }

    match std::fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                Ok(config)
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                Ok(CadenceConfigFile::default())
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            Ok(CadenceConfigFile::default())
        }
    }
}

/// Return the config file path: `~/.config/cadence/config.toml`
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("cadence").join("config.toml"))
}
