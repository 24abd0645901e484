//! Configuration types for the study-material pipeline.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built
//! via its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes
//! it trivial to share a config between sessions, log it, and diff two runs
//! to understand why their outputs differ.
//!
//! Chunk sizes, overlap and the page-merge floor are empirically tuned
//! defaults; nothing in the pipeline depends on their particular values.

use crate::error::NoteCraftError;
use crate::progress::ProgressCallback;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

/// Configuration for one study session.
///
/// # Example
/// ```rust
/// use notecraft::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .map_reduce(true)
///     .chunk_max_chars(8_000)
///     .embed_images(true)
///     .build()
///     .unwrap();
/// assert!(config.map_reduce);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Inclusive 1-based page range to extract. Default: all pages.
    pub pages: PageRange,

    /// Upper bound on a chunk's length in characters, overlap included. Default: 12 000.
    pub chunk_max_chars: usize,

    /// Characters shared between consecutive chunks. Default: 400.
    ///
    /// Must be smaller than `chunk_max_chars`.
    pub chunk_overlap_chars: usize,

    /// Preferred split points, most preferred first. A hard cut is always
    /// the last resort. Default: paragraph, sentence, word.
    pub split_boundaries: Vec<SplitBoundary>,

    /// Pages with fewer words than this are merged into the next page
    /// before chunking. Default: 50.
    pub min_page_words: usize,

    /// Summarise chunk-by-chunk, then generate from the summaries. Default: false.
    ///
    /// Trades extra provider calls for coverage of documents that exceed a
    /// single call's practical budget.
    pub map_reduce: bool,

    /// Model identifier, e.g. "gpt-4o-mini", "gemini-1.5-pro".
    pub model: Option<String>,

    /// Provider name (e.g. "openai", "gemini", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature. Default: 0.3.
    pub temperature: f32,

    /// Maximum tokens per generation call. Default: 8192.
    pub max_tokens: usize,

    /// Per-call timeout for the provider, in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Directory containing libpdfium. None = system library.
    pub pdfium_lib_path: Option<PathBuf>,

    /// Tesseract language code. Default: "eng".
    pub ocr_language: String,

    /// Tesseract executable. Default: "tesseract" (looked up on PATH).
    pub tesseract_binary: PathBuf,

    /// Longest edge, in pixels, of a page rasterised for OCR. Default: 2000.
    pub max_rendered_pixels: u32,

    /// Embed fetched images as base64 instead of linking. Default: false.
    ///
    /// Required for self-contained offline artifacts.
    pub embed_images: bool,

    /// Search results tried per image placeholder. Default: 5.
    pub image_candidates: usize,

    /// Backoff attempts allowed while image search is rate-limited. Default: 4.
    pub search_max_retries: u32,

    /// First backoff delay in milliseconds; doubles each attempt. Default: 1000.
    pub search_backoff_ms: u64,

    /// Download timeout for URL inputs and fetched images, in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Size of the passages questions are answered from, in characters.
    /// Consecutive passages share a fifth of this. Default: 1000.
    pub ask_chunk_chars: usize,

    /// Passages sent with each question. Default: 4.
    pub ask_context_chunks: usize,

    /// Earlier question/answer pairs sent with each question; older ones
    /// are forgotten. Default: 6.
    pub ask_history_turns: usize,

    /// Optional progress observer.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            pages: PageRange::default(),
            chunk_max_chars: 12_000,
            chunk_overlap_chars: 400,
            split_boundaries: SplitBoundary::default_order(),
            min_page_words: 50,
            map_reduce: false,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 8192,
            api_timeout_secs: 120,
            password: None,
            pdfium_lib_path: None,
            ocr_language: "eng".to_string(),
            tesseract_binary: PathBuf::from("tesseract"),
            max_rendered_pixels: 2000,
            embed_images: false,
            image_candidates: 5,
            search_max_retries: 4,
            search_backoff_ms: 1000,
            download_timeout_secs: 120,
            ask_chunk_chars: 1000,
            ask_context_chunks: 4,
            ask_history_turns: 6,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("pages", &self.pages)
            .field("chunk_max_chars", &self.chunk_max_chars)
            .field("chunk_overlap_chars", &self.chunk_overlap_chars)
            .field("split_boundaries", &self.split_boundaries)
            .field("min_page_words", &self.min_page_words)
            .field("map_reduce", &self.map_reduce)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("embed_images", &self.embed_images)
            .field("search_max_retries", &self.search_max_retries)
            .field("ask_context_chunks", &self.ask_context_chunks)
            .field("ask_history_turns", &self.ask_history_turns)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn pages(mut self, pages: PageRange) -> Self {
        self.config.pages = pages;
        self
    }

    pub fn chunk_max_chars(mut self, n: usize) -> Self {
        self.config.chunk_max_chars = n.max(1);
        self
    }

    pub fn chunk_overlap_chars(mut self, n: usize) -> Self {
        self.config.chunk_overlap_chars = n;
        self
    }

    pub fn split_boundaries(mut self, boundaries: Vec<SplitBoundary>) -> Self {
        self.config.split_boundaries = boundaries;
        self
    }

    pub fn min_page_words(mut self, n: usize) -> Self {
        self.config.min_page_words = n;
        self
    }

    pub fn map_reduce(mut self, v: bool) -> Self {
        self.config.map_reduce = v;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_lib_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_lib_path = Some(path.into());
        self
    }

    pub fn ocr_language(mut self, lang: impl Into<String>) -> Self {
        self.config.ocr_language = lang.into();
        self
    }

    pub fn tesseract_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.tesseract_binary = path.into();
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn embed_images(mut self, v: bool) -> Self {
        self.config.embed_images = v;
        self
    }

    pub fn image_candidates(mut self, n: usize) -> Self {
        self.config.image_candidates = n.max(1);
        self
    }

    pub fn search_max_retries(mut self, n: u32) -> Self {
        self.config.search_max_retries = n;
        self
    }

    pub fn search_backoff_ms(mut self, ms: u64) -> Self {
        self.config.search_backoff_ms = ms;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn ask_chunk_chars(mut self, n: usize) -> Self {
        self.config.ask_chunk_chars = n.max(100);
        self
    }

    pub fn ask_context_chunks(mut self, n: usize) -> Self {
        self.config.ask_context_chunks = n.max(1);
        self
    }

    pub fn ask_history_turns(mut self, n: usize) -> Self {
        self.config.ask_history_turns = n;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, NoteCraftError> {
        let c = &self.config;
        if c.chunk_overlap_chars >= c.chunk_max_chars {
            return Err(NoteCraftError::InvalidConfig(format!(
                "chunk overlap ({}) must be smaller than the chunk size ({})",
                c.chunk_overlap_chars, c.chunk_max_chars
            )));
        }
        if let PageRange::Range(start, end) = c.pages {
            if start < 1 || start > end {
                return Err(NoteCraftError::InvalidConfig(format!(
                    "page range {start}-{end} must satisfy 1 <= start <= end"
                )));
            }
        }
        if c.ocr_language.trim().is_empty() {
            return Err(NoteCraftError::InvalidConfig(
                "OCR language must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Which pages of a paged document or slide deck to extract.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageRange {
    /// Every page (default).
    #[default]
    All,
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
}

impl PageRange {
    /// Expand the range into sorted 0-indexed page numbers, clipped to the document.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        match *self {
            PageRange::All => (0..total_pages).collect(),
            PageRange::Range(start, end) => {
                let s = start.max(1) - 1;
                let e = end.min(total_pages);
                (s..e).collect()
            }
        }
    }

    /// The concrete `(first, last)` pair for a document of `total_pages`.
    pub fn bounds(&self, total_pages: usize) -> (usize, usize) {
        match *self {
            PageRange::All => (1, total_pages.max(1)),
            PageRange::Range(start, end) => (start, end),
        }
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageRange::All => f.write_str("all"),
            PageRange::Range(start, end) => write!(f, "{start}-{end}"),
        }
    }
}

impl FromStr for PageRange {
    type Err = NoteCraftError;

    /// Parses `all`, `5` or `3-15`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "all" {
            return Ok(PageRange::All);
        }
        let parse = |v: &str| {
            v.trim().parse::<usize>().map_err(|_| {
                NoteCraftError::InvalidConfig(format!("invalid page number '{}'", v.trim()))
            })
        };
        let (start, end) = match s.split_once('-') {
            Some((a, b)) => (parse(a)?, parse(b)?),
            None => {
                let p = parse(&s)?;
                (p, p)
            }
        };
        if start < 1 || start > end {
            return Err(NoteCraftError::InvalidConfig(format!(
                "page range '{s}' must satisfy 1 <= start <= end"
            )));
        }
        Ok(PageRange::Range(start, end))
    }
}

/// An inclusive `min..=max` target count (words in a note, rows in a flashcard set).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountRange {
    pub min: u32,
    pub max: u32,
}

impl CountRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }
}

impl fmt::Display for CountRange {
    /// Renders as `"<min> to <max>"`, the form the prompts use.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} to {}", self.min, self.max)
    }
}

impl FromStr for CountRange {
    type Err = NoteCraftError;

    /// Parses `300-500` or a single number.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|_| NoteCraftError::InvalidConfig(format!("invalid count '{}'", v.trim())))
        };
        match s.split_once('-') {
            Some((a, b)) => Ok(CountRange::new(parse(a)?, parse(b)?)),
            None => {
                let n = parse(s)?;
                Ok(CountRange::new(n, n))
            }
        }
    }
}

/// A preferred place to end a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SplitBoundary {
    /// After a blank line.
    Paragraph,
    /// After a single newline.
    Line,
    /// After `.`, `!` or `?` followed by whitespace.
    Sentence,
    /// After any whitespace.
    Word,
}

impl SplitBoundary {
    /// Paragraph, then sentence, then word.
    pub fn default_order() -> Vec<SplitBoundary> {
        vec![
            SplitBoundary::Paragraph,
            SplitBoundary::Sentence,
            SplitBoundary::Word,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_range_to_indices() {
        assert_eq!(PageRange::All.to_indices(3), vec![0, 1, 2]);
        assert_eq!(PageRange::Range(2, 3).to_indices(5), vec![1, 2]);
        assert_eq!(PageRange::Range(3, 10).to_indices(4), vec![2, 3]);
        assert!(PageRange::Range(7, 9).to_indices(4).is_empty());
    }

    #[test]
    fn page_range_parse() {
        assert_eq!("all".parse::<PageRange>().unwrap(), PageRange::All);
        assert_eq!("4".parse::<PageRange>().unwrap(), PageRange::Range(4, 4));
        assert_eq!(" 2 - 6 ".parse::<PageRange>().unwrap(), PageRange::Range(2, 6));
        assert!("0-3".parse::<PageRange>().is_err());
        assert!("5-2".parse::<PageRange>().is_err());
        assert!("x".parse::<PageRange>().is_err());
    }

    #[test]
    fn page_range_display_round_trips() {
        for r in [PageRange::All, PageRange::Range(1, 3)] {
            assert_eq!(r.to_string().parse::<PageRange>().unwrap(), r);
        }
    }

    #[test]
    fn count_range_renders_for_prompts() {
        assert_eq!(CountRange::new(300, 200).to_string(), "200 to 300");
        assert_eq!("5-20".parse::<CountRange>().unwrap(), CountRange::new(5, 20));
        assert_eq!("10".parse::<CountRange>().unwrap(), CountRange::new(10, 10));
    }

    #[test]
    fn overlap_must_be_below_chunk_size() {
        let err = PipelineConfig::builder()
            .chunk_max_chars(100)
            .chunk_overlap_chars(100)
            .build();
        assert!(matches!(err, Err(NoteCraftError::InvalidConfig(_))));
    }

    #[test]
    fn builder_clamps() {
        let c = PipelineConfig::builder()
            .temperature(5.0)
            .image_candidates(0)
            .ask_context_chunks(0)
            .ask_chunk_chars(10)
            .build()
            .unwrap();
        assert_eq!(c.temperature, 2.0);
        assert_eq!(c.image_candidates, 1);
        assert_eq!(c.ask_context_chunks, 1);
        assert_eq!(c.ask_chunk_chars, 100);
    }
}
