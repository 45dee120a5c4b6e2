//! Emotion marker vocabulary
//!
//! Replies open with a bracketed tag such as `[happy]`. The tag drives the
//! avatar's mood and is never spoken or stored.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

/// Leading `[name]` tag plus any whitespace after it
static EMOTION_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\w+)\]\s*").expect("valid regex"));

/// Recognized moods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Sad,
    Angry,
    Fear,
    Disgust,
    Love,
    Sleep,
}

impl Emotion {
    /// Map a tag name (case-insensitive) to a mood. Unknown names are neutral.
    #[must_use]
    pub fn from_tag(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "happy" | "excited" | "surprised" => Self::Happy,
            "sad" => Self::Sad,
            "angry" => Self::Angry,
            "fear" | "scared" | "worried" | "anxious" => Self::Fear,
            "disgust" | "disgusted" => Self::Disgust,
            "love" | "loving" => Self::Love,
            "sleep" | "sleepy" => Self::Sleep,
            _ => Self::Neutral,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Happy => "happy",
            Self::Sad => "sad",
            Self::Angry => "angry",
            Self::Fear => "fear",
            Self::Disgust => "disgust",
            Self::Love => "love",
            Self::Sleep => "sleep",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Split a leading emotion tag off `text`.
///
/// Returns the mood (if a tag was present) and the remaining text with the
/// tag and its trailing whitespace removed.
#[must_use]
pub fn parse_emotion_tag(text: &str) -> (Option<Emotion>, &str) {
    EMOTION_TAG_RE.captures(text).map_or((None, text), |caps| {
        let whole = caps.get(0).map_or(0, |m| m.end());
        let emotion = caps.get(1).map(|m| Emotion::from_tag(m.as_str()));
        (emotion, &text[whole..])
    })
}

/// Current avatar mood, deduplicated
///
/// Decay back to neutral is timed by the orchestrator; this only tracks
/// whether a change needs to reach the renderer.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoodTracker {
    current: Emotion,
}

impl MoodTracker {
    /// Record `mood`. Returns `true` when it differs from the current one.
    pub fn set(&mut self, mood: Emotion) -> bool {
        if mood == self.current {
            return false;
        }
        self.current = mood;
        true
    }

    #[must_use]
    pub const fn current(&self) -> Emotion {
        self.current
    }

    /// Whether a decay timer should run for the current mood
    #[must_use]
    pub fn decays(&self) -> bool {
        self.current != Emotion::Neutral
    }
}
