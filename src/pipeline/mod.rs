//! Pipeline stages behind a study session.
//!
//! Each submodule implements one step and is testable on its own; the
//! external collaborators (provider, OCR, image search, page access) sit
//! behind traits so the stages run against fakes in tests.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ extract ──▶ chunk/summarize ──▶ llm ──▶ postprocess ──▶ images
//! (URL/path) (per page)   (optional)      (one call)  (cleanup)   (placeholders)
//! ```
//!
//! 1. [`input`]   — turn the user-supplied path or URL into a `Document`
//! 2. [`extract`] — per-format text; [`pdf`], [`slides`] and [`flowed`] are
//!    the readers, [`ocr`] the fallback for pages that carry images. pdfium
//!    is not async-safe, so paged work runs in `spawn_blocking`
//! 3. [`chunk`] and [`summarize`] — bounded, overlapping chunks and the
//!    map-reduce pass over them
//! 4. [`llm`]     — template selection and exactly one provider call per task
//! 5. [`postprocess`] — deterministic cleanup and flashcard parsing
//! 6. [`images`]  — placeholder search with bounded backoff; [`encode`] builds
//!    the `data:` URIs for embedded images
//!
//! Questions take a side path: [`retrieve`] picks the passages of the
//! chunked source a question is answered from.

pub mod chunk;
pub mod encode;
pub mod extract;
pub mod flowed;
pub mod images;
pub mod input;
pub mod llm;
pub mod ocr;
pub mod pdf;
pub mod postprocess;
pub mod retrieve;
pub mod slides;
pub mod summarize;
