//! Input resolution: turn a user-supplied path or URL into a [`Document`].
//!
//! Every reader downstream works on an in-memory byte buffer (pdfium via
//! `load_pdf_from_byte_slice`, the zip reader over a `Cursor`), so a URL is
//! downloaded straight into memory and a local file is read whole. The
//! format check in [`Document::from_bytes`] runs before any reader sees the
//! payload, so a mislabelled file fails with a clear message rather than a
//! parser crash.

use crate::document::Document;
use crate::error::NoteCraftError;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve the input string to a loaded document.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<Document, NoteCraftError> {
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input)).await
    }
}

/// Read a local file, mapping I/O failures onto actionable errors.
pub async fn resolve_local(path: &Path) -> Result<Document, NoteCraftError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => NoteCraftError::PermissionDenied {
            path: path.to_path_buf(),
        },
        std::io::ErrorKind::NotFound => NoteCraftError::FileNotFound {
            path: path.to_path_buf(),
        },
        _ => NoteCraftError::DocumentRead {
            name: path.display().to_string(),
            detail: e.to_string(),
        },
    })?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    let doc = Document::from_bytes(name, bytes)?;
    debug!("Resolved local {}: {} ({} bytes)", doc.format, path.display(), doc.bytes.len());
    Ok(doc)
}

/// Download a URL into memory.
async fn download_url(url: &str, timeout_secs: u64) -> Result<Document, NoteCraftError> {
    info!("Downloading document from: {}", url);

    let failed = |reason: String| NoteCraftError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            NoteCraftError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;
    let name = filename_from_url(url);
    info!("Downloaded {} ({} bytes)", name, bytes.len());

    Document::from_bytes(name, bytes.to_vec())
}

/// Last non-empty path segment that carries an extension.
fn filename_from_url(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }
    "downloaded.pdf".to_string()
}

/// Output path next to the input with a new extension, for CLI defaults.
pub fn sibling_path(input: &str, suffix: &str) -> PathBuf {
    let stem = if is_url(input) {
        let name = filename_from_url(input);
        Path::new(&name)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or(name)
    } else {
        Path::new(input)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".to_string())
    };
    PathBuf::from(format!("{stem}{suffix}"))
}
