//! Error types for the notecraft library.
//!
//! Two layers of errors exist:
//!
//! * [`NoteCraftError`] — **Fatal** for the current run: extraction failed,
//!   the provider ran out of quota, the flashcard output could not be parsed.
//!   Every stage fails fast and returns one of these; the session keeps the
//!   last successful artifact untouched.
//!
//! * [`GenerationFailure`] / [`SearchFailure`] — what a capability
//!   (text-generation provider, image search) reports. They are classified
//!   and mapped into [`NoteCraftError`] at the stage boundary, so callers
//!   never see provider-specific error shapes.
//!
//! Every user-facing message ends with the next step to take.

use once_cell::sync::Lazy;
use regex::Regex;
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the notecraft library.
#[derive(Debug, Error)]
pub enum NoteCraftError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("Document not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file type is not one of the supported formats.
    #[error("Unsupported document '{name}': {reason}\nUse a .pdf, .pptx, .docx, .md, .csv or .tsv file.")]
    UnsupportedFormat { name: String, reason: String },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// The document could not be opened or parsed.
    #[error("Could not read '{name}': {detail}\nUpload a different copy of the document.")]
    DocumentRead { name: String, detail: String },

    /// The selected range does not intersect the document.
    #[error("Page {page} is out of range (document has {total} pages)\nPick a range between 1 and {total}.")]
    PageOutOfRange { page: usize, total: usize },

    // ── Generation errors ─────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("Text-generation provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The provider reported a resource limit (quota, tokens per minute …).
    #[error("{}", quota_message(.during_map_reduce, .detail))]
    QuotaExhausted {
        during_map_reduce: bool,
        detail: String,
    },

    /// The provider call failed for a reason other than quota.
    #[error("Generation failed for task '{task}': {detail}\nTry again, or switch provider with --provider.")]
    ProviderFailed { task: String, detail: String },

    /// A task label did not name any known task.
    #[error("Unsupported task '{0}'")]
    UnsupportedTask(String),

    // ── Output errors ─────────────────────────────────────────────────────
    /// Generation produced no usable rows at all.
    #[error("No flashcards were generated.\nRegenerate, or widen the page range.")]
    NoRecordsGenerated,

    /// Generation produced rows but none had two fields.
    #[error("Flashcard output could not be parsed: {rejected} malformed rows, 0 usable.\nRegenerate the flashcards.")]
    MalformedOutput { rejected: usize },

    // ── Image resolution errors ───────────────────────────────────────────
    /// Image search stayed rate-limited past the retry ceiling.
    #[error("Image search is rate-limited ({attempts} attempts).\nWait a minute and retry, or generate the note without images.")]
    RateLimited { attempts: u32 },

    // ── Session / bundle errors ───────────────────────────────────────────
    /// An edit or package was requested before the artifact existed.
    #[error("No {artifact} has been generated yet.\nGenerate it first.")]
    MissingArtifact { artifact: &'static str },

    /// `ask` was called with a blank question.
    #[error("The question is empty.\nType a question about the document.")]
    EmptyQuestion,

    /// A study kit bundle is malformed, or content collides with its markers.
    #[error("Invalid study kit bundle: {0}")]
    BundleFormat(String),

    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Pdfium binding errors ─────────────────────────────────────────────
    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Install libpdfium, or set PDFIUM_LIB_PATH to the directory that contains it.\n"
    )]
    PdfiumBindingFailed(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn quota_message(during_map_reduce: &bool, detail: &str) -> String {
    if *during_map_reduce {
        format!(
            "The provider's resource limit was reached during map-reduce summarisation: {detail}\n\
Retry in a minute, or disable map-reduce (drop --map-reduce) to use a single call."
        )
    } else {
        format!("The provider's resource limit was reached: {detail}\nRetry in a minute.")
    }
}

/// `429` as an HTTP status: "HTTP 429", "HTTP/1.1 429", "status: 429",
/// "status code 429", `"code":429`, "error 429".
static RE_STATUS_429: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\b(?:http(?:/\d(?:\.\d)?)?|status|code|error)[\s:="'-]*(?:code[\s:="'-]*)?429\b"#).unwrap()
});

/// Failure reported by a [`crate::pipeline::llm::TextGenerator`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationFailure {
    /// Quota, tokens-per-minute or other resource exhaustion.
    #[error("resource exhausted: {0}")]
    QuotaExhausted(String),

    /// The call did not complete within the configured timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),

    /// Anything else (auth, bad request, transport).
    #[error("{0}")]
    Other(String),
}

impl GenerationFailure {
    /// Classify a provider error message.
    ///
    /// Providers disagree on how they spell "out of quota" (HTTP 429,
    /// `RESOURCE_EXHAUSTED`, "rate limit", "insufficient_quota"), so the
    /// check runs on the lower-cased rendering of the error. A bare `429`
    /// only counts when it reads as a status code, not as a token count.
    pub fn classify(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_lowercase();
        let exhausted = RE_STATUS_429.is_match(&lower)
            || [
                "quota",
                "rate limit",
                "ratelimit",
                "resource_exhausted",
                "resource exhausted",
                "too many requests",
            ]
            .iter()
            .any(|needle| lower.contains(needle));
        if exhausted {
            GenerationFailure::QuotaExhausted(message)
        } else {
            GenerationFailure::Other(message)
        }
    }
}

/// Failure reported by an [`crate::pipeline::images::ImageSearch`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SearchFailure {
    /// The search provider throttled the request.
    #[error("rate limited")]
    RateLimited,

    /// Network or decoding failure.
    #[error("{0}")]
    Transport(String),
}
