//! OCR of rasterised pages.
//!
//! Only pages that carry an embedded image reach this stage; everything
//! else uses the document's own text layer. The engine is a trait so the
//! extraction policy can be tested without an OCR install.

use image::{DynamicImage, ImageFormat};
use std::path::PathBuf;
use std::process::Command;
use tracing::debug;

/// Turns a page image into text.
///
/// Called from inside `spawn_blocking`, so implementations may block.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, image: &DynamicImage) -> Result<String, String>;
}

/// Shells out to the `tesseract` command-line tool.
#[derive(Debug, Clone)]
pub struct TesseractOcr {
    pub binary: PathBuf,
    pub language: String,
}

impl TesseractOcr {
    pub fn new(binary: impl Into<PathBuf>, language: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            language: language.into(),
        }
    }
}

impl OcrEngine for TesseractOcr {
    fn recognize(&self, image: &DynamicImage) -> Result<String, String> {
        // tesseract reads from a path; the temp file is removed on drop.
        let file = tempfile::Builder::new()
            .prefix("notecraft-page-")
            .suffix(".png")
            .tempfile()
            .map_err(|e| format!("could not create temp file: {e}"))?;
        image
            .save_with_format(file.path(), ImageFormat::Png)
            .map_err(|e| format!("could not write page image: {e}"))?;

        let output = Command::new(&self.binary)
            .arg(file.path())
            .arg("stdout")
            .arg("-l")
            .arg(&self.language)
            .output()
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => format!(
                    "'{}' not found; install tesseract or pass --tesseract <path>",
                    self.binary.display()
                ),
                _ => format!("could not run '{}': {e}", self.binary.display()),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(format!("tesseract exited with {}: {}", output.status, stderr.trim()));
        }

        let text = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!("OCR produced {} chars ({}x{} px)", text.len(), image.width(), image.height());
        Ok(text)
    }
}
