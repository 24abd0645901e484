//! The study kit: note, flashcards, page range and source document in one
//! portable text file.
//!
//! ## Layout
//!
//! ```text
//! <<<NOTECRAFT:NOTE>>>
//! …note, verbatim…
//! <<<NOTECRAFT:FLASHCARDS>>>
//! …tab-separated rows, verbatim…
//! <<<NOTECRAFT:PAGES>>>
//! 3-15
//! <<<NOTECRAFT:SOURCE>>>
//! lecture.pdf
//! JVBERi0xLjQK… (base64, wrapped at 76 columns)
//! <<<NOTECRAFT:END>>>
//! ```
//!
//! Every section body sits between the newline that ends its marker line
//! and the newline that starts the next marker, so bodies come back
//! byte-for-byte, including trailing newlines and empty bodies. Content that
//! contains the marker prefix is refused at save time; without that rule a
//! body could end early on load.

use crate::config::PageRange;
use crate::error::NoteCraftError;
use crate::pipeline::encode::{decode_base64, encode_base64};
use std::path::Path;
use tracing::info;

const MARKER_PREFIX: &str = "<<<NOTECRAFT:";
const BASE64_WRAP: usize = 76;

fn marker(section: &str) -> String {
    format!("{MARKER_PREFIX}{section}>>>")
}

/// Everything needed to study a document offline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StudyKit {
    pub note: String,
    pub flashcards: String,
    pub pages: PageRange,
    pub source_name: String,
    pub source_bytes: Vec<u8>,
}

impl StudyKit {
    /// Serialise into the bundle text format.
    pub fn to_bundle_string(&self) -> Result<String, NoteCraftError> {
        for (field, value) in [
            ("note", self.note.as_str()),
            ("flashcards", self.flashcards.as_str()),
            ("source name", self.source_name.as_str()),
        ] {
            if value.contains(MARKER_PREFIX) {
                return Err(NoteCraftError::BundleFormat(format!(
                    "the {field} contains the reserved marker '{MARKER_PREFIX}'; edit it out and save again"
                )));
            }
        }
        if self.source_name.contains(['\n', '\r']) {
            return Err(NoteCraftError::BundleFormat(
                "the source name must be a single line".into(),
            ));
        }

        let encoded = encode_base64(&self.source_bytes);
        let wrapped: Vec<&str> = encoded
            .as_bytes()
            .chunks(BASE64_WRAP)
            .filter_map(|c| std::str::from_utf8(c).ok())
            .collect();

        let mut out = String::with_capacity(self.note.len() + self.flashcards.len() + encoded.len() + 256);
        for (section, body) in [
            ("NOTE", self.note.clone()),
            ("FLASHCARDS", self.flashcards.clone()),
            ("PAGES", self.pages.to_string()),
            ("SOURCE", format!("{}\n{}", self.source_name, wrapped.join("\n"))),
        ] {
            out.push_str(&marker(section));
            out.push('\n');
            out.push_str(&body);
            out.push('\n');
        }
        out.push_str(&marker("END"));
        out.push('\n');
        Ok(out)
    }

    /// Parse a bundle produced by [`StudyKit::to_bundle_string`].
    pub fn parse(text: &str) -> Result<Self, NoteCraftError> {
        let mut rest = text;
        let note = take_section(&mut rest, "NOTE", "FLASHCARDS")?;
        let flashcards = take_section(&mut rest, "FLASHCARDS", "PAGES")?;
        let pages_text = take_section(&mut rest, "PAGES", "SOURCE")?;
        let source = take_section(&mut rest, "SOURCE", "END")?;

        if !rest.trim().is_empty() {
            return Err(NoteCraftError::BundleFormat(
                "unexpected content after the END marker".into(),
            ));
        }

        let pages: PageRange = pages_text
            .parse()
            .map_err(|e| NoteCraftError::BundleFormat(format!("bad page range: {e}")))?;
        let (source_name, payload) = source.split_once('\n').unwrap_or((source, ""));
        let source_bytes = decode_base64(payload)
            .map_err(|e| NoteCraftError::BundleFormat(format!("bad source document encoding: {e}")))?;

        Ok(Self {
            note: note.to_string(),
            flashcards: flashcards.to_string(),
            pages,
            source_name: source_name.to_string(),
            source_bytes,
        })
    }

    /// Write the bundle to `path` atomically.
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), NoteCraftError> {
        let path = path.as_ref();
        let text = self.to_bundle_string()?;
        let write_err = |e| NoteCraftError::OutputWriteFailed {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
        }

        // Write to temp, then rename
        let tmp_path = path.with_extension("kit.tmp");
        tokio::fs::write(&tmp_path, text.as_bytes()).await.map_err(write_err)?;
        tokio::fs::rename(&tmp_path, path).await.map_err(write_err)?;

        info!("Study kit written to {} ({} bytes)", path.display(), text.len());
        Ok(())
    }

    /// Read and parse a bundle file.
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self, NoteCraftError> {
        let path = path.as_ref();
        let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => NoteCraftError::FileNotFound {
                path: path.to_path_buf(),
            },
            _ => NoteCraftError::BundleFormat(format!("{}: {e}", path.display())),
        })?;
        let text = String::from_utf8(bytes)
            .map_err(|_| NoteCraftError::BundleFormat("bundle is not valid UTF-8".into()))?;
        Self::parse(&text)
    }
}

/// Split off one section body, advancing `rest` to the `next` marker line.
fn take_section<'a>(rest: &mut &'a str, section: &str, next: &str) -> Result<&'a str, NoteCraftError> {
    let open = format!("{}\n", marker(section));
    let body_start = rest
        .strip_prefix(open.as_str())
        .ok_or_else(|| NoteCraftError::BundleFormat(format!("expected the {section} section")))?;

    let close = format!("\n{}\n", marker(next));
    let end = body_start
        .find(close.as_str())
        .ok_or_else(|| NoteCraftError::BundleFormat(format!("the {section} section is not terminated")))?;

    let body = &body_start[..end];
    // Leave the next marker line (without its leading newline) for the next call.
    *rest = &body_start[end + 1..];
    Ok(body)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kit() -> StudyKit {
        StudyKit {
            note: "# Cells\n\nThe cell is the unit of life.\n".into(),
            flashcards: "What is a cell?\tThe unit of life\nWhat is ATP?\tEnergy currency".into(),
            pages: PageRange::Range(3, 15),
            source_name: "biology.pdf".into(),
            source_bytes: (0u8..=255).cycle().take(500).collect(),
        }
    }

    #[test]
    fn round_trip_is_byte_identical() {
        let original = kit();
        let text = original.to_bundle_string().unwrap();
        assert_eq!(StudyKit::parse(&text).unwrap(), original);
    }

    #[test]
    fn empty_and_newline_only_bodies_survive() {
        let original = StudyKit {
            note: String::new(),
            flashcards: "\n\n".into(),
            pages: PageRange::All,
            source_name: "empty.md".into(),
            source_bytes: Vec::new(),
        };
        let text = original.to_bundle_string().unwrap();
        assert_eq!(StudyKit::parse(&text).unwrap(), original);
    }

    #[test]
    fn source_is_wrapped() {
        let text = kit().to_bundle_string().unwrap();
        let payload: Vec<&str> = text
            .lines()
            .skip_while(|l| *l != "biology.pdf")
            .skip(1)
            .take_while(|l| !l.starts_with(MARKER_PREFIX))
            .collect();
        assert!(payload.len() > 1);
        assert!(payload.iter().all(|l| l.len() <= BASE64_WRAP));
        assert!(text.ends_with("<<<NOTECRAFT:END>>>\n"));
    }

    #[test]
    fn marker_in_content_is_refused() {
        let mut k = kit();
        k.note.push_str("<<<NOTECRAFT:END>>>");
        assert!(matches!(k.to_bundle_string(), Err(NoteCraftError::BundleFormat(_))));
    }

    #[test]
    fn truncated_bundle_is_rejected() {
        let text = kit().to_bundle_string().unwrap();
        let cut = &text[..text.find("<<<NOTECRAFT:PAGES>>>").unwrap()];
        assert!(matches!(StudyKit::parse(cut), Err(NoteCraftError::BundleFormat(_))));
        assert!(StudyKit::parse("hello").is_err());
    }

    #[tokio::test]
    async fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out").join("biology.kit");
        kit().save_to_file(&path).await.unwrap();
        assert!(!path.with_extension("kit.tmp").exists());
        assert_eq!(StudyKit::load_from_file(&path).await.unwrap(), kit());
    }
}
