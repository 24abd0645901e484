//! Values produced by the pipeline stages.

use crate::prompts::TaskKind;
use serde::{Deserialize, Serialize};

/// Where a page's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Provenance {
    /// The document's own text layer (or slide/paragraph runs).
    NativeText,
    /// OCR of the rasterised page.
    Ocr,
}

/// Text of one page, slide, or whole flowed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedPage {
    /// 0-indexed position in the source.
    pub index: usize,
    pub text: String,
    pub provenance: Provenance,
}

impl ExtractedPage {
    pub fn word_count(&self) -> usize {
        self.text.split_whitespace().count()
    }
}

/// Ordered pages extracted from a document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedDocument {
    pub pages: Vec<ExtractedPage>,
}

impl ExtractedDocument {
    /// Page texts joined by a blank line.
    pub fn text(&self) -> String {
        self.pages
            .iter()
            .map(|p| p.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn word_count(&self) -> usize {
        self.pages.iter().map(ExtractedPage::word_count).sum()
    }

    /// Pages whose text came from OCR.
    pub fn ocr_pages(&self) -> usize {
        self.pages
            .iter()
            .filter(|p| p.provenance == Provenance::Ocr)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.iter().all(|p| p.text.trim().is_empty())
    }
}

/// One bounded segment of a longer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: usize,
    /// Full chunk text, overlap prefix included.
    pub text: String,
    /// Byte length of the prefix repeated from the previous chunk.
    pub overlap: usize,
    /// Byte offset in the source where the non-overlapping part begins.
    pub start: usize,
}

impl Chunk {
    /// The part of the chunk not shared with its predecessor.
    pub fn fresh(&self) -> &str {
        &self.text[self.overlap..]
    }
}

/// Normalised provider reply, tagged with the task that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationResult {
    pub kind: TaskKind,
    pub text: String,
}

/// One question and the answer it got, oldest first in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub question: String,
    pub answer: String,
}

/// A flashcard: term/question plus definition/answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardRecord {
    pub primary: String,
    pub secondary: String,
}

/// A row the parser could not use, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRow {
    /// 1-indexed line in the cleaned text.
    pub line: usize,
    pub raw: String,
}

/// Parsed flashcards in source order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashcardSet {
    pub records: Vec<FlashcardRecord>,
    pub rejected: Vec<RejectedRow>,
}

impl FlashcardSet {
    pub fn questions(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.primary.as_str()).collect()
    }

    pub fn answers(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.secondary.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
