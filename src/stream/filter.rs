//! Incremental reply filter
//!
//! Runs two phases over the model's token stream before anything reaches the
//! segmenter:
//!
//! 1. A leading `<think>...</think>` reasoning block is held back and dropped.
//! 2. A leading emotion tag (`[happy]`) is extracted once, within a short
//!    window of clean text.
//!
//! Text is never released while either phase is still undecided.

use std::sync::LazyLock;

use regex::Regex;

use crate::emotion::{Emotion, parse_emotion_tag};

/// Literal that opens a reasoning block
pub const REASONING_OPEN: &str = "<think>";

/// Literal that closes a reasoning block
pub const REASONING_CLOSE: &str = "</think>";

static REASONING_BLOCK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>.*?</think>\s*").expect("valid regex"));

/// Remove every complete reasoning block from a finished reply and trim it
#[must_use]
pub fn strip_reasoning_blocks(text: &str) -> String {
    REASONING_BLOCK_RE.replace_all(text, "").trim().to_string()
}

/// Clean characters to wait for an emotion tag before giving up
pub const DEFAULT_EMOTION_WINDOW: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reasoning {
    /// Raw text is still a prefix of the open marker
    Undecided,
    /// Inside a reasoning block, waiting for the close marker
    Active,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Pending,
    Found,
    Abandoned,
}

/// Output of one filter step
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Filtered {
    /// Set exactly once per stream, on the step that found the tag
    pub emotion: Option<Emotion>,
    /// Clean text released by this step (may be empty)
    pub text: String,
}

impl Filtered {
    fn merge(&mut self, other: Self) {
        self.emotion = self.emotion.or(other.emotion);
        self.text.push_str(&other.text);
    }
}

/// Per-turn filter state
#[derive(Debug, Clone)]
pub struct StreamFilter {
    raw: String,
    held: String,
    reasoning: Reasoning,
    marker: Marker,
    emotion: Option<Emotion>,
    emotion_window: usize,
    /// Drop whitespace between a stripped reasoning block and the body
    trim_leading: bool,
}

impl StreamFilter {
    #[must_use]
    pub const fn new(emotion_window: usize) -> Self {
        Self {
            raw: String::new(),
            held: String::new(),
            reasoning: Reasoning::Undecided,
            marker: Marker::Pending,
            emotion: None,
            emotion_window,
            trim_leading: false,
        }
    }

    /// Feed one token, returning whatever clean text it unlocks
    pub fn push(&mut self, token: &str) -> Filtered {
        self.raw.push_str(token);

        let clean = if self.reasoning == Reasoning::Resolved {
            token.to_string()
        } else {
            match self.resolve_streaming() {
                Some(clean) => clean,
                None => return Filtered::default(),
            }
        };

        self.release(clean)
    }

    /// Finish the stream.
    ///
    /// `full_text` is the model's complete reply. Any part of it the filter
    /// has not seen yet is pushed first, then both phases are forced to a
    /// decision and all held text is released.
    pub fn finish(&mut self, full_text: &str) -> Filtered {
        let mut out = Filtered::default();

        if let Some(unseen) = full_text.strip_prefix(self.raw.as_str())
            && !unseen.is_empty()
        {
            out.merge(self.push(unseen));
        }

        if self.reasoning != Reasoning::Resolved {
            let clean = match self.raw.find(REASONING_CLOSE) {
                Some(idx) => {
                    self.trim_leading = true;
                    self.raw[idx + REASONING_CLOSE.len()..].to_string()
                }
                None => self.raw.clone(),
            };
            self.reasoning = Reasoning::Resolved;
            out.merge(self.release(clean));
        }

        if self.marker == Marker::Pending {
            let held = std::mem::take(&mut self.held);
            let (emotion, rest) = parse_emotion_tag(&held);
            self.marker = if emotion.is_some() {
                Marker::Found
            } else {
                Marker::Abandoned
            };
            self.emotion = emotion;
            out.merge(Filtered {
                emotion,
                text: rest.to_string(),
            });
        }

        out
    }

    /// Emotion found in this stream, if any
    #[must_use]
    pub const fn emotion(&self) -> Option<Emotion> {
        self.emotion
    }

    /// Everything pushed so far, unfiltered
    #[must_use]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether a reasoning block is currently being held back
    #[must_use]
    pub fn in_reasoning(&self) -> bool {
        self.reasoning == Reasoning::Active
    }

    fn resolve_streaming(&mut self) -> Option<String> {
        if self.reasoning == Reasoning::Undecided {
            if self.raw.starts_with(REASONING_OPEN) {
                self.reasoning = Reasoning::Active;
                tracing::debug!("reasoning block detected, holding tokens");
            } else if REASONING_OPEN.starts_with(self.raw.as_str()) {
                return None;
            } else {
                self.reasoning = Reasoning::Resolved;
                return Some(self.raw.clone());
            }
        }

        let idx = self.raw.find(REASONING_CLOSE)?;
        self.reasoning = Reasoning::Resolved;
        self.trim_leading = true;
        tracing::debug!("reasoning block closed, streaming reply");
        Some(self.raw[idx + REASONING_CLOSE.len()..].to_string())
    }

    fn release(&mut self, clean: String) -> Filtered {
        let clean = if self.trim_leading {
            let trimmed = clean.trim_start();
            if trimmed.is_empty() {
                return Filtered::default();
            }
            self.trim_leading = false;
            trimmed.to_string()
        } else {
            clean
        };

        if self.marker != Marker::Pending {
            return Filtered {
                emotion: None,
                text: clean,
            };
        }

        self.held.push_str(&clean);
        let (emotion, rest) = parse_emotion_tag(&self.held);
        if let Some(emotion) = emotion {
            let text = rest.to_string();
            self.held.clear();
            self.marker = Marker::Found;
            self.emotion = Some(emotion);
            return Filtered {
                emotion: Some(emotion),
                text,
            };
        }

        if self.held.chars().count() > self.emotion_window {
            self.marker = Marker::Abandoned;
            return Filtered {
                emotion: None,
                text: std::mem::take(&mut self.held),
            };
        }

        Filtered::default()
    }
}

impl Default for StreamFilter {
    fn default() -> Self {
        Self::new(DEFAULT_EMOTION_WINDOW)
    }
}
