//! Avatar rendering boundary
//!
//! The renderer plays synthesized audio with lip sync and shows the current
//! mood. Rendering itself lives outside this crate.

use crate::emotion::Emotion;
use crate::voice::SpeechAudio;

/// Playback and expression sink driven by the orchestrator
pub trait Renderer: Send + Sync {
    /// Play one synthesized sentence, queued behind anything already playing
    fn speak(&self, audio: SpeechAudio);

    /// Stop playback immediately and drop anything queued
    fn stop_speaking(&self);

    /// Switch the displayed mood
    fn set_mood(&self, mood: Emotion);
}
