//! Paged documents through pdfium: page count, text layer, rasterisation.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto a dedicated thread pool
//! thread designed for blocking operations, preventing the Tokio worker
//! threads from stalling during CPU-heavy rendering and OCR.
//!
//! ## Why cap pixels, not DPI?
//!
//! Page sizes vary wildly: an A0 poster at 150 DPI would produce a
//! 12,000 × 17,000 px image. `max_rendered_pixels` caps the longest edge
//! regardless of physical size, which keeps memory bounded and is plenty
//! for tesseract on lecture slides and scanned handouts.

use crate::config::PipelineConfig;
use crate::document::Document;
use crate::error::NoteCraftError;
use crate::output::ExtractedPage;
use crate::pipeline::extract::{self, PageSource};
use crate::pipeline::ocr::OcrEngine;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// Environment variable naming a directory that contains libpdfium.
pub const PDFIUM_LIB_PATH_ENV: &str = "PDFIUM_LIB_PATH";

/// Bind to libpdfium.
///
/// Lookup order: the configured directory, `PDFIUM_LIB_PATH`, the current
/// directory, then the system library path.
pub fn bind_pdfium(lib_dir: Option<&Path>) -> Result<Pdfium, NoteCraftError> {
    let mut candidates: Vec<PathBuf> = Vec::new();
    if let Some(dir) = lib_dir {
        candidates.push(dir.to_path_buf());
    }
    if let Ok(dir) = std::env::var(PDFIUM_LIB_PATH_ENV) {
        candidates.push(PathBuf::from(dir));
    }
    candidates.push(PathBuf::from("./"));

    let mut last_err = String::new();
    for dir in &candidates {
        match Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir)) {
            Ok(bindings) => {
                debug!("Bound pdfium from {}", dir.display());
                return Ok(Pdfium::new(bindings));
            }
            Err(e) => last_err = format!("{}: {:?}", dir.display(), e),
        }
    }

    Pdfium::bind_to_system_library()
        .map(Pdfium::new)
        .map_err(|e| NoteCraftError::PdfiumBindingFailed(format!("{last_err}; system: {e:?}")))
}

/// [`PageSource`] over an open pdfium document.
pub struct PdfiumPages<'d, 'p> {
    document: &'d PdfDocument<'p>,
}

impl<'d, 'p> PdfiumPages<'d, 'p> {
    pub fn new(document: &'d PdfDocument<'p>) -> Self {
        Self { document }
    }

    fn page(&self, index: usize) -> Result<PdfPage<'p>, String> {
        self.document
            .pages()
            .get(page_index(index)?)
            .map_err(|e| format!("{e:?}"))
    }
}

/// pdfium addresses pages with a 16-bit index.
fn page_index(index: usize) -> Result<PdfPageIndex, String> {
    PdfPageIndex::try_from(index).map_err(|_| format!("page {} is beyond the pdfium page limit", index + 1))
}

impl PageSource for PdfiumPages<'_, '_> {
    fn page_count(&self) -> usize {
        self.document.pages().len() as usize
    }

    fn has_embedded_image(&self, index: usize) -> Result<bool, String> {
        let page = self.page(index)?;
        let found = page
            .objects()
            .iter()
            .any(|object| object.object_type() == PdfPageObjectType::Image);
        Ok(found)
    }

    fn native_text(&self, index: usize) -> Result<String, String> {
        let page = self.page(index)?;
        let text = page.text().map_err(|e| format!("{e:?}"))?;
        Ok(text.all())
    }

    fn rasterize(&self, index: usize, max_pixels: u32) -> Result<DynamicImage, String> {
        let page = self.page(index)?;
        let render_config = PdfRenderConfig::new()
            .set_target_width(max_pixels as i32)
            .set_maximum_height(max_pixels as i32);
        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| format!("{e:?}"))?;
        let image = bitmap.as_image();
        debug!("Rendered page {} → {}x{} px", index + 1, image.width(), image.height());
        Ok(image)
    }
}

fn open_error(name: &str, password: Option<&str>, e: PdfiumError) -> NoteCraftError {
    let detail = format!("{e:?}");
    let detail = if detail.to_lowercase().contains("password") {
        if password.is_some() {
            "the password is incorrect".to_string()
        } else {
            "the document is encrypted; pass --password".to_string()
        }
    } else {
        detail
    };
    NoteCraftError::DocumentRead {
        name: name.to_string(),
        detail,
    }
}

/// Count pages without extracting anything.
pub async fn page_count(doc: &Document, config: &PipelineConfig) -> Result<usize, NoteCraftError> {
    let bytes = doc.bytes.clone();
    let name = doc.name.clone();
    let password = config.password.clone();
    let lib_dir = config.pdfium_lib_path.clone();

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(lib_dir.as_deref())?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, password.as_deref())
            .map_err(|e| open_error(&name, password.as_deref(), e))?;
        Ok(document.pages().len() as usize)
    })
    .await
    .map_err(|e| NoteCraftError::Internal(format!("Page-count task panicked: {}", e)))?
}

/// Extract the configured page range, OCR-ing image pages.
pub async fn extract_pages(
    doc: &Document,
    config: &PipelineConfig,
    ocr: Arc<dyn OcrEngine>,
) -> Result<Vec<ExtractedPage>, NoteCraftError> {
    let bytes = doc.bytes.clone();
    let name = doc.name.clone();
    let password = config.password.clone();
    let lib_dir = config.pdfium_lib_path.clone();
    let range = config.pages;
    let max_pixels = config.max_rendered_pixels;

    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium(lib_dir.as_deref())?;
        let document = pdfium
            .load_pdf_from_byte_slice(&bytes, password.as_deref())
            .map_err(|e| open_error(&name, password.as_deref(), e))?;
        let source = PdfiumPages::new(&document);
        let total = source.page_count();
        info!("PDF loaded: {} pages", total);

        let indices = extract::select_pages(&range, total)?;
        extract::extract_pages(&source, ocr.as_ref(), &indices, max_pixels, &name)
    })
    .await
    .map_err(|e| NoteCraftError::Internal(format!("Extraction task panicked: {}", e)))?
}
