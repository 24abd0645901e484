//! # notecraft
//!
//! Turn lecture material into study notes, flashcards and cheatsheets with
//! a text-generation provider.
//!
//! ## Why this crate?
//!
//! Course documents are a mix of typeset PDFs, scanned pages, slide decks
//! and word-processor files. Pasting them into a chat window loses pages,
//! blows past context limits, and hands back flashcards in whatever shape
//! the model felt like. This crate does the plumbing around the model:
//! per-page text extraction with an OCR fallback, map-reduce compression of
//! long documents, one prompt per task, deterministic cleaning of the reply
//! and resolution of inline image placeholders.
//!
//! ## Pipeline Overview
//!
//! ```text
//! Document (PDF / PPTX / DOCX / MD / TSV)
//!  │
//!  ├─ 1. Input      resolve local file or download from URL
//!  ├─ 2. Extract    native text per page, OCR for pages with images
//!  ├─ 3. Reduce     optional: chunk → per-chunk summary
//!  ├─ 4. Generate   one provider call for the requested task (over the summaries when reduced)
//!  ├─ 5. Clean      fences, header rows, separators, blank lines
//!  ├─ 6. Images     !!!IMG…!!! placeholders → Markdown images
//!  └─ 7. Package    note + flashcards + source → study kit bundle
//! ```
//!
//! Questions take a side path: the extracted text is cut into passages, the
//! ones sharing the most words with the question are sent with the recent
//! conversation, and the answer is tidied like a note.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use notecraft::{CountRange, PipelineConfig, StudySession, TaskKind};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder().pages("1-20".parse()?).build()?;
//!     let mut session = StudySession::open("lecture.pdf", config).await?;
//!
//!     println!("{}", session.generate_note(CountRange::new(300, 500), false).await?);
//!     let cards = session
//!         .generate_flashcards(TaskKind::FlashcardsQuestionAnswer, CountRange::new(10, 15))
//!         .await?;
//!     eprintln!("{} flashcards", cards.len());
//!
//!     session.study_kit()?.save_to_file("lecture.kit").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `notecraft` binary (clap + anyhow + indicatif + tracing-subscriber + serde_json) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! notecraft = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod bundle;
pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod session;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use bundle::StudyKit;
pub use config::{CountRange, PageRange, PipelineConfig, PipelineConfigBuilder, SplitBoundary};
pub use document::{Document, DocumentFormat};
pub use error::{GenerationFailure, NoteCraftError, SearchFailure};
pub use output::{ChatTurn, Chunk, ExtractedDocument, ExtractedPage, FlashcardRecord, FlashcardSet, GenerationResult, Provenance};
pub use progress::{NoopProgressCallback, PipelineProgressCallback, ProgressCallback, Stage};
pub use prompts::{TaskKind, TaskParams};
pub use session::{Capabilities, StudySession};
