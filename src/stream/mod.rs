//! Reply stream processing
//!
//! Model tokens pass through the [`StreamFilter`] (reasoning and emotion tag
//! removal) and then the [`SentenceSegmenter`], which cuts speakable
//! sentences as early as possible.

mod filter;
mod segment;

pub use filter::{
    DEFAULT_EMOTION_WINDOW, Filtered, REASONING_CLOSE, REASONING_OPEN, StreamFilter,
    strip_reasoning_blocks,
};
pub use segment::{SentenceSegmenter, clean_for_speech, find_boundary, segment_all};
