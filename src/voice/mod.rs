//! Voice processing module
//!
//! Speech-to-text and text-to-speech clients, plus the ordered synthesis
//! queue the orchestrator feeds sentences into.

mod queue;
mod stt;
mod tts;

pub use queue::{SpeechCompletion, SpeechQueue};
pub use stt::{SAMPLE_RATE, SpeechToText, SttError, SttEvent, Transcriber, samples_to_wav};
pub use tts::{PCM_SAMPLE_RATE, SpeechAudio, Synthesizer, TextToSpeech, WordTiming};
