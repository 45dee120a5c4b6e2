//! Per-turn stream session

use crate::emotion::Emotion;
use crate::stream::{SentenceSegmenter, StreamFilter};

/// What one stream step produced
#[derive(Debug, Default, PartialEq, Eq)]
pub struct StreamStep {
    /// Emotion found on this step
    pub emotion: Option<Emotion>,
    /// Complete sentences ready for synthesis, in order
    pub sentences: Vec<String>,
}

/// Transient state of one turn, tagged with its generation
///
/// A fresh session replaces the old one whenever a turn starts or is
/// interrupted; anything tagged with an older generation is stale.
#[derive(Debug)]
pub struct StreamSession {
    generation: u64,
    emotion_window: usize,
    filter: StreamFilter,
    segmenter: SentenceSegmenter,
    /// Sentences dispatched to synthesis and not yet reported back
    outstanding: usize,
    model_finished: bool,
    finish_scheduled: bool,
    retries_used: u32,
}

impl StreamSession {
    #[must_use]
    pub fn new(generation: u64, emotion_window: usize) -> Self {
        Self {
            generation,
            emotion_window,
            filter: StreamFilter::new(emotion_window),
            segmenter: SentenceSegmenter::new(),
            outstanding: 0,
            model_finished: false,
            finish_scheduled: false,
            retries_used: 0,
        }
    }

    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    #[must_use]
    pub const fn is_current(&self, generation: u64) -> bool {
        self.generation == generation
    }

    /// Drop everything streamed by a failed attempt before it is re-issued
    pub fn restart_stream(&mut self) {
        self.filter = StreamFilter::new(self.emotion_window);
        self.segmenter.clear();
        self.retries_used += 1;
    }

    #[must_use]
    pub const fn retries_used(&self) -> u32 {
        self.retries_used
    }

    /// Run one model token through the filter and segmenter
    pub fn push_token(&mut self, token: &str) -> StreamStep {
        let filtered = self.filter.push(token);
        StreamStep {
            emotion: filtered.emotion,
            sentences: self.segmenter.push(&filtered.text),
        }
    }

    /// Resolve the filter against the full reply and flush the tail
    pub fn finish_stream(&mut self) -> StreamStep {
        let full = self.filter.raw().to_string();
        let filtered = self.filter.finish(&full);
        let mut sentences = self.segmenter.push(&filtered.text);
        sentences.extend(self.segmenter.flush());
        self.model_finished = true;
        StreamStep {
            emotion: filtered.emotion,
            sentences,
        }
    }

    /// Raw reply text received so far
    #[must_use]
    pub fn raw(&self) -> &str {
        self.filter.raw()
    }

    #[must_use]
    pub const fn emotion(&self) -> Option<Emotion> {
        self.filter.emotion()
    }

    pub const fn unit_dispatched(&mut self) {
        self.outstanding += 1;
    }

    /// Record a finished unit; success and failure count the same
    pub const fn unit_completed(&mut self) {
        self.outstanding = self.outstanding.saturating_sub(1);
    }

    #[must_use]
    pub const fn outstanding(&self) -> usize {
        self.outstanding
    }

    #[must_use]
    pub const fn model_finished(&self) -> bool {
        self.model_finished
    }

    /// Claim the turn's single finalization. Returns `true` once, as soon as
    /// the model is done and no synthesis is outstanding.
    pub const fn claim_finish(&mut self) -> bool {
        if self.model_finished && self.outstanding == 0 && !self.finish_scheduled {
            self.finish_scheduled = true;
            return true;
        }
        false
    }
}
