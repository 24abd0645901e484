//! Document extraction: per-format text with a per-page OCR fallback.
//!
//! ## Why decide per page?
//!
//! Lecture PDFs are often mostly typeset text with a handful of scanned
//! slides pasted in. Rasterising and OCR-ing the whole document because a
//! few pages are images would be slow and lose accuracy on the pages that
//! already carry a clean text layer. So each selected page is tested on its
//! own: a page containing an image object is rasterised and OCR'd, every
//! other page keeps its native text.
//!
//! ## Units by format
//!
//! | Format        | Unit      | Range applies |
//! |---------------|-----------|---------------|
//! | paged (PDF)   | page      | yes           |
//! | slide deck    | slide     | yes           |
//! | flowed (DOCX) | whole doc | no            |
//! | markdown/TSV  | whole doc | no            |

use crate::config::{PageRange, PipelineConfig};
use crate::document::{Document, DocumentFormat};
use crate::error::NoteCraftError;
use crate::output::{ExtractedDocument, ExtractedPage, Provenance};
use crate::pipeline::ocr::OcrEngine;
use crate::pipeline::{flowed, pdf, slides};
use image::DynamicImage;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Page-level access to a paged document.
///
/// Implemented over pdfium for real documents and by in-memory fakes in
/// tests. Errors are plain strings; the caller attaches the document name.
pub trait PageSource {
    fn page_count(&self) -> usize;

    /// Whether the page contains at least one image object.
    fn has_embedded_image(&self, index: usize) -> Result<bool, String>;

    fn native_text(&self, index: usize) -> Result<String, String>;

    /// Render the page with its longest edge capped at `max_pixels`.
    fn rasterize(&self, index: usize, max_pixels: u32) -> Result<DynamicImage, String>;
}

/// Resolve the selected range against a document of `total` units.
pub fn select_pages(range: &PageRange, total: usize) -> Result<Vec<usize>, NoteCraftError> {
    let indices = range.to_indices(total);
    if indices.is_empty() {
        let (first, _) = range.bounds(total);
        return Err(NoteCraftError::PageOutOfRange { page: first, total });
    }
    Ok(indices)
}

/// Apply the native-text / OCR policy to each selected page, in order.
///
/// OCR output that is blank is skipped; a page with an empty text layer is
/// kept so page indices stay meaningful for merging.
pub fn extract_pages(
    source: &dyn PageSource,
    ocr: &dyn OcrEngine,
    indices: &[usize],
    max_pixels: u32,
    name: &str,
) -> Result<Vec<ExtractedPage>, NoteCraftError> {
    let read_err = |page: usize, detail: String| NoteCraftError::DocumentRead {
        name: name.to_string(),
        detail: format!("page {}: {}", page + 1, detail),
    };

    let mut pages = Vec::with_capacity(indices.len());
    for &idx in indices {
        if source.has_embedded_image(idx).map_err(|e| read_err(idx, e))? {
            let image = source
                .rasterize(idx, max_pixels)
                .map_err(|e| read_err(idx, e))?;
            let text = ocr.recognize(&image).map_err(|e| read_err(idx, e))?;
            if text.trim().is_empty() {
                warn!("Page {}: OCR found no text, skipping", idx + 1);
                continue;
            }
            debug!("Page {}: OCR ({} chars)", idx + 1, text.len());
            pages.push(ExtractedPage {
                index: idx,
                text,
                provenance: Provenance::Ocr,
            });
        } else {
            let text = source.native_text(idx).map_err(|e| read_err(idx, e))?;
            debug!("Page {}: native text ({} chars)", idx + 1, text.len());
            pages.push(ExtractedPage {
                index: idx,
                text,
                provenance: Provenance::NativeText,
            });
        }
    }
    Ok(pages)
}

/// Number of pages (or slides) in the document, without extracting anything.
///
/// Flowed and plain-text documents count as a single unit.
pub async fn page_count(doc: &Document, config: &PipelineConfig) -> Result<usize, NoteCraftError> {
    match doc.format {
        DocumentFormat::Paged => pdf::page_count(doc, config).await,
        DocumentFormat::SlideDeck => slides::slide_count(doc),
        DocumentFormat::Flowed | DocumentFormat::Markdown | DocumentFormat::TabSeparated => Ok(1),
    }
}

/// Extract the selected range of a document.
pub async fn extract(
    doc: &Document,
    config: &PipelineConfig,
    ocr: Arc<dyn OcrEngine>,
) -> Result<ExtractedDocument, NoteCraftError> {
    let pages = match doc.format {
        DocumentFormat::Paged => pdf::extract_pages(doc, config, ocr).await?,
        DocumentFormat::SlideDeck => {
            let slides = slides::slide_texts(doc)?;
            let indices = select_pages(&config.pages, slides.len())?;
            indices
                .into_iter()
                .map(|idx| ExtractedPage {
                    index: idx,
                    text: slides[idx].clone(),
                    provenance: Provenance::NativeText,
                })
                .collect()
        }
        DocumentFormat::Flowed => vec![single_unit(flowed::document_text(doc)?)],
        DocumentFormat::Markdown | DocumentFormat::TabSeparated => vec![single_unit(doc.text()?)],
    };

    let extracted = ExtractedDocument { pages };
    info!(
        "Extracted {} unit(s) from {} ({} words, {} via OCR)",
        extracted.pages.len(),
        doc.name,
        extracted.word_count(),
        extracted.ocr_pages()
    );
    Ok(extracted)
}

fn single_unit(text: String) -> ExtractedPage {
    ExtractedPage {
        index: 0,
        text,
        provenance: Provenance::NativeText,
    }
}
