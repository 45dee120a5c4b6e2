//! Cadence - Real-time spoken dialogue turn orchestration
//!
//! This library coordinates one spoken exchange at a time:
//! - Turn state tracking (idle, listening, transcribing, thinking, speaking)
//! - Bounded conversation history
//! - Streaming reply filtering (reasoning blocks, emotion tags)
//! - Incremental sentence segmentation feeding speech synthesis
//! - Barge-in: any new input cancels the reply in progress
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                  Collaborators                       │
//! │   Transcriber  │  Model  │  Synthesizer  │  Renderer │
//! └────────────────────┬────────────────────────────────┘
//!                      │ generation-tagged reports
//! ┌────────────────────▼────────────────────────────────┐
//! │              Turn Orchestrator (actor)               │
//! │  State Machine │ Conversation │ Filter │ Segmenter   │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod avatar;
pub mod config;
pub mod conversation;
pub mod emotion;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod state;
pub mod stream;
pub mod voice;

pub use avatar::Renderer;
pub use config::Config;
pub use conversation::{ConversationStore, Message, Role};
pub use emotion::{Emotion, MoodTracker, parse_emotion_tag};
pub use error::{Error, Result};
pub use llm::{ChatClient, LlmError, ModelClient, TokenStream};
pub use orchestrator::{OrchestratorBuilder, RetryPolicy, TurnEvent, TurnOrchestrator, TurnSnapshot};
pub use state::{StateChange, StateMachine, TurnState};
pub use stream::{SentenceSegmenter, StreamFilter, clean_for_speech};
pub use voice::{
    SpeechAudio, SpeechQueue, SpeechToText, SttError, SttEvent, Synthesizer, TextToSpeech,
    Transcriber, WordTiming,
};
