//! Chunking: split long text into bounded, overlapping, ordered segments.
//!
//! ## Layout of a chunk
//!
//! ```text
//! source:  ......[ overlap ][ fresh text ....... ]......
//!                ^          ^                    ^
//!                |          start                cut (boundary or hard cut)
//!                start - overlap
//! ```
//!
//! Each chunk repeats up to `overlap_chars` characters from the end of its
//! predecessor so a summary of chunk *n* still sees how chunk *n-1* ended.
//! The fresh parts tile the source with no gaps, so stripping every
//! chunk's overlap prefix and concatenating gives back the input exactly.
//!
//! Cut points are searched backwards from the size bound for each preferred
//! boundary in turn; if none occurs inside the window the chunk is hard-cut
//! at the bound (on a `char` boundary, never inside a UTF-8 sequence).

use crate::config::{PipelineConfig, SplitBoundary};
use crate::error::NoteCraftError;
use crate::output::{Chunk, ExtractedPage};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static RE_SENTENCE_END: Lazy<Regex> = Lazy::new(|| Regex::new(r"[.!?]\s").unwrap());

/// Chunk size and boundary preferences.
#[derive(Debug, Clone)]
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
    boundaries: Vec<SplitBoundary>,
}

impl Chunker {
    pub fn new(
        max_chars: usize,
        overlap_chars: usize,
        boundaries: Vec<SplitBoundary>,
    ) -> Result<Self, NoteCraftError> {
        if max_chars == 0 || overlap_chars >= max_chars {
            return Err(NoteCraftError::InvalidConfig(format!(
                "chunk overlap ({overlap_chars}) must be smaller than the chunk size ({max_chars})"
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
            boundaries,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, NoteCraftError> {
        Self::new(
            config.chunk_max_chars,
            config.chunk_overlap_chars,
            config.split_boundaries.clone(),
        )
    }

    /// Lazily split `text`. The iterator is `Clone`, so a run can restart it.
    pub fn chunks<'a>(&'a self, text: &'a str) -> Chunks<'a> {
        Chunks {
            chunker: self,
            text,
            pos: 0,
            index: 0,
            done: false,
        }
    }
}

/// Iterator over the chunks of one text.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    chunker: &'a Chunker,
    text: &'a str,
    pos: usize,
    index: usize,
    done: bool,
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.done {
            return None;
        }
        let text = self.text;
        let ovl_start = back_chars(text, self.pos, self.chunker.overlap_chars);
        let ovl_chars = text[ovl_start..self.pos].chars().count();
        let budget = self.chunker.max_chars - ovl_chars;

        let rest = &text[self.pos..];
        let cut = match rest.char_indices().nth(budget) {
            None => {
                self.done = true;
                text.len()
            }
            Some((window_len, _)) => {
                let window = &rest[..window_len];
                self.pos + find_cut(window, &self.chunker.boundaries).unwrap_or(window_len)
            }
        };

        let chunk = Chunk {
            index: self.index,
            text: text[ovl_start..cut].to_string(),
            overlap: self.pos - ovl_start,
            start: self.pos,
        };
        self.pos = cut;
        self.index += 1;
        if self.pos >= text.len() {
            self.done = true;
        }
        Some(chunk)
    }
}

/// Byte offset `n` characters before `pos` (clamped to 0).
fn back_chars(text: &str, pos: usize, n: usize) -> usize {
    if n == 0 {
        return pos;
    }
    text[..pos]
        .char_indices()
        .rev()
        .nth(n - 1)
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Latest non-empty cut inside `window` for the first boundary kind that occurs.
fn find_cut(window: &str, boundaries: &[SplitBoundary]) -> Option<usize> {
    boundaries.iter().find_map(|b| {
        let cut = match b {
            SplitBoundary::Paragraph => window.rfind("\n\n").map(|i| i + 2),
            SplitBoundary::Line => window.rfind('\n').map(|i| i + 1),
            SplitBoundary::Sentence => RE_SENTENCE_END.find_iter(window).last().map(|m| m.end()),
            SplitBoundary::Word => window
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace())
                .map(|(i, c)| i + c.len_utf8()),
        };
        cut.filter(|&c| c > 0)
    })
}

/// Fold pages below `min_words` into the page that follows them.
///
/// Merged text is joined with a blank line, the same separator
/// [`crate::output::ExtractedDocument::text`] uses, so merging never changes
/// the document text. A short final page is kept as is.
pub fn merge_short_pages(pages: Vec<ExtractedPage>, min_words: usize) -> Vec<ExtractedPage> {
    let before = pages.len();
    let mut merged: Vec<ExtractedPage> = Vec::with_capacity(before);
    let mut carry: Option<ExtractedPage> = None;

    for page in pages {
        let page = match carry.take() {
            Some(mut prev) => {
                prev.text.push_str("\n\n");
                prev.text.push_str(&page.text);
                prev
            }
            None => page,
        };
        if page.word_count() < min_words {
            carry = Some(page);
        } else {
            merged.push(page);
        }
    }
    merged.extend(carry);

    if merged.len() != before {
        debug!("Merged {} short pages ({} → {})", before - merged.len(), before, merged.len());
    }
    merged
}
