//! Sentence segmentation for streamed replies
//!
//! Sentences are cut as soon as a boundary shows up in the buffer so the
//! first one can be synthesized while the model is still generating.

use std::sync::LazyLock;

use regex::Regex;

static EMOJI_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[\x{1F600}-\x{1F64F}\x{1F300}-\x{1F5FF}\x{1F680}-\x{1F6FF}\x{1F1E0}-\x{1F1FF}\x{2600}-\x{26FF}\x{2700}-\x{27BF}\x{FE00}-\x{FE0F}\x{1F900}-\x{1F9FF}\x{1FA00}-\x{1FAFF}\x{200D}\x{20E3}\x{E0020}-\x{E007F}]+",
    )
    .expect("valid regex")
});
static CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"`([^`]+)`").expect("valid regex"));
static BOLD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid regex"));
static ITALIC_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*(.+?)\*").expect("valid regex"));
static STRAY_STAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*+").expect("valid regex"));
static RULE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*-{3,}\s*$").expect("valid regex"));
/// Heading markers, bullets and `1.` list numbers at the start of a line
static LINE_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*(?:(?:#{1,6}|[-+]|\d+\.)\s+)+").expect("valid regex")
});
static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

/// Strip markup that should not be read aloud or shown as subtitles
///
/// Removes emoji, inline code ticks, emphasis, heading markers, list
/// prefixes and horizontal rules, then collapses whitespace. Passes repeat
/// until nothing changes, so applying it twice gives the same result as
/// applying it once.
#[must_use]
pub fn clean_for_speech(text: &str) -> String {
    let mut current = clean_pass(text);
    loop {
        let next = clean_pass(&current);
        if next == current {
            return current;
        }
        current = next;
    }
}

fn clean_pass(text: &str) -> String {
    let text = EMOJI_RE.replace_all(text, "");
    let text = CODE_RE.replace_all(&text, "$1");
    let text = BOLD_RE.replace_all(&text, "$1");
    let text = ITALIC_RE.replace_all(&text, "$1");
    let text = STRAY_STAR_RE.replace_all(&text, "");
    let text = LINE_PREFIX_RE.replace_all(&text, "");
    let text = RULE_RE.replace_all(&text, "");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    text.trim().to_string()
}

/// Characters that may directly precede a sentence-ending mark
fn is_word_like(c: char) -> bool {
    c.is_alphabetic() || matches!(c, ',' | ']' | ')' | '"' | '\'' | '\u{2019}' | '\u{201D}')
}

/// Byte offset just past the earliest sentence boundary in `text`
///
/// A boundary is `.`, `!` or `?` preceded by a word-like character and
/// followed by whitespace; the whitespace run belongs to the sentence. A bare
/// list number such as `1.` never qualifies.
#[must_use]
pub fn find_boundary(text: &str) -> Option<usize> {
    let mut prev: Option<char> = None;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, c)) = chars.next() {
        if matches!(c, '.' | '!' | '?')
            && prev.is_some_and(is_word_like)
            && chars.peek().is_some_and(|&(_, next)| next.is_whitespace())
        {
            let after = &text[idx + c.len_utf8()..];
            let ws = after.len() - after.trim_start().len();
            return Some(idx + c.len_utf8() + ws);
        }
        prev = Some(c);
    }

    None
}

/// Clean `raw` and cut the result at every boundary it now contains
///
/// Markup can hide a boundary (`**Done!** Next`), so boundaries are found
/// again on the cleaned text.
fn split_clean(raw: &str) -> Vec<String> {
    let cleaned = clean_for_speech(raw);
    let mut rest = cleaned.as_str();
    let mut sentences = Vec::new();

    while !rest.is_empty() {
        let end = find_boundary(rest).unwrap_or(rest.len());
        let piece = rest[..end].trim();
        rest = &rest[end..];

        let recleaned = clean_for_speech(piece);
        if recleaned == piece {
            if !piece.is_empty() {
                sentences.push(piece.to_string());
            }
        } else {
            sentences.extend(split_clean(&recleaned));
        }
    }

    sentences
}

/// Buffers clean text and cuts complete sentences out of it
#[derive(Debug, Clone, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append text and return every sentence completed by it, cleaned and
    /// in order. Empty sentences are dropped.
    pub fn push(&mut self, text: &str) -> Vec<String> {
        self.buffer.push_str(text);

        let mut sentences = Vec::new();
        while let Some(end) = find_boundary(&self.buffer) {
            sentences.extend(split_clean(&self.buffer[..end]));
            self.buffer.drain(..end);
        }

        sentences
    }

    /// Take whatever is left as final sentences, boundary or not
    pub fn flush(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.buffer);
        split_clean(&rest)
    }

    /// Text still waiting for a boundary
    #[must_use]
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Segment a complete text in one go
#[must_use]
pub fn segment_all(text: &str) -> Vec<String> {
    let mut segmenter = SentenceSegmenter::new();
    let mut sentences = segmenter.push(text);
    sentences.extend(segmenter.flush());
    sentences
}
