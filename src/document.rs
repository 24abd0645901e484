//! The source document held by a study session.
//!
//! A [`Document`] is the raw payload plus the format tag detected at load
//! time. Detection trusts the file extension first and then confirms it
//! against the magic bytes, so a renamed file is rejected before any reader
//! touches it.

use crate::error::NoteCraftError;
use std::fmt;
use std::path::Path;

/// Formats a session can open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    /// PDF: one unit per page, native text with OCR fallback.
    Paged,
    /// PPTX: one unit per slide.
    SlideDeck,
    /// DOCX: no page concept, always a single unit.
    Flowed,
    /// An existing Markdown note.
    Markdown,
    /// An existing tab-separated flashcard file.
    TabSeparated,
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DocumentFormat::Paged => "paged document",
            DocumentFormat::SlideDeck => "slide deck",
            DocumentFormat::Flowed => "flowed document",
            DocumentFormat::Markdown => "markdown",
            DocumentFormat::TabSeparated => "tab-separated",
        };
        f.write_str(s)
    }
}

/// A loaded source document.
#[derive(Clone)]
pub struct Document {
    /// File name (no directory), used in messages and the study kit bundle.
    pub name: String,
    pub bytes: Vec<u8>,
    pub format: DocumentFormat,
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("format", &self.format)
            .finish()
    }
}

impl Document {
    /// Build a document from a file name and its contents, detecting the format.
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Result<Self, NoteCraftError> {
        let name = name.into();
        let format = detect_format(&name, &bytes)?;
        Ok(Self {
            name,
            bytes,
            format,
        })
    }

    /// The payload as UTF-8, for Markdown and tab-separated inputs.
    pub fn text(&self) -> Result<String, NoteCraftError> {
        let s = std::str::from_utf8(&self.bytes).map_err(|e| NoteCraftError::DocumentRead {
            name: self.name.clone(),
            detail: format!("not valid UTF-8: {e}"),
        })?;
        Ok(s.strip_prefix('\u{feff}').unwrap_or(s).to_string())
    }
}

/// Detect the format from the extension and confirm it against magic bytes.
pub fn detect_format(name: &str, bytes: &[u8]) -> Result<DocumentFormat, NoteCraftError> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let unsupported = |reason: String| NoteCraftError::UnsupportedFormat {
        name: name.to_string(),
        reason,
    };

    let format = match ext.as_str() {
        "pdf" => DocumentFormat::Paged,
        "pptx" => DocumentFormat::SlideDeck,
        "docx" => DocumentFormat::Flowed,
        "md" | "markdown" => DocumentFormat::Markdown,
        "csv" | "tsv" | "txt" => DocumentFormat::TabSeparated,
        "" => return Err(unsupported("file has no extension".into())),
        other => return Err(unsupported(format!("'.{other}' files are not supported"))),
    };

    let expected: &[u8] = match format {
        DocumentFormat::Paged => b"%PDF",
        DocumentFormat::SlideDeck | DocumentFormat::Flowed => b"PK",
        _ => return Ok(format),
    };
    if !bytes.starts_with(expected) {
        let magic = &bytes[..bytes.len().min(4)];
        return Err(unsupported(format!(
            "content does not look like a {format} (starts with {magic:02x?})"
        )));
    }
    Ok(format)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_by_extension_and_magic() {
        assert_eq!(detect_format("a.PDF", b"%PDF-1.7").unwrap(), DocumentFormat::Paged);
        assert_eq!(detect_format("deck.pptx", b"PK\x03\x04").unwrap(), DocumentFormat::SlideDeck);
        assert_eq!(detect_format("essay.docx", b"PK\x03\x04").unwrap(), DocumentFormat::Flowed);
        assert_eq!(detect_format("n.md", b"# Title").unwrap(), DocumentFormat::Markdown);
        assert_eq!(detect_format("cards.tsv", b"a\tb").unwrap(), DocumentFormat::TabSeparated);
    }

    #[test]
    fn renamed_file_is_rejected() {
        let err = detect_format("fake.pdf", b"PK\x03\x04").unwrap_err();
        assert!(matches!(err, NoteCraftError::UnsupportedFormat { .. }));
    }

    #[test]
    fn unknown_extension_is_rejected() {
        assert!(detect_format("image.png", b"\x89PNG").is_err());
        assert!(detect_format("README", b"hello").is_err());
    }

    #[test]
    fn text_strips_bom() {
        let d = Document::from_bytes("n.md", "\u{feff}# Hi".as_bytes().to_vec()).unwrap();
        assert_eq!(d.text().unwrap(), "# Hi");
    }
}
