//! Progress-callback trait for pipeline stage events.
//!
//! Inject an [`Arc<dyn PipelineProgressCallback>`] via
//! [`crate::config::PipelineConfigBuilder::progress_callback`] to be told
//! which stage a run is in. Runs are sequential, so events arrive in order
//! on the calling task.
//!
//! # Example
//!
//! ```rust
//! use notecraft::{PipelineConfig, PipelineProgressCallback, Stage};
//! use std::sync::Arc;
//!
//! struct PrintStages;
//!
//! impl PipelineProgressCallback for PrintStages {
//!     fn on_stage(&self, stage: Stage) {
//!         eprintln!("{stage}");
//!     }
//! }
//!
//! let config = PipelineConfig::builder()
//!     .progress_callback(Arc::new(PrintStages))
//!     .build()
//!     .unwrap();
//! ```

use std::fmt;
use std::sync::Arc;

/// Coarse phases of a pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Extracting,
    Chunking,
    Summarizing,
    /// The requested task, run over the chunk summaries.
    Combining,
    Generating,
    /// Choosing the passages a question is answered from.
    Retrieving,
    Cleaning,
    ResolvingImages,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Extracting => "extracting text",
            Stage::Chunking => "chunking",
            Stage::Summarizing => "summarising chunks",
            Stage::Combining => "generating from summaries",
            Stage::Generating => "generating",
            Stage::Retrieving => "finding passages",
            Stage::Cleaning => "cleaning output",
            Stage::ResolvingImages => "resolving images",
        };
        f.write_str(s)
    }
}

/// Called by the pipeline as a run moves between stages.
///
/// All methods have default no-op implementations so callers only override
/// what they care about.
pub trait PipelineProgressCallback: Send + Sync {
    /// Called once when a session operation starts.
    ///
    /// # Arguments
    /// * `operation` — short label, e.g. `"note"` or `"flashcards"`
    fn on_run_start(&self, operation: &str) {
        let _ = operation;
    }

    /// Called on entry to each stage.
    fn on_stage(&self, stage: Stage) {
        let _ = stage;
    }

    /// Called after each map-reduce chunk summary.
    ///
    /// # Arguments
    /// * `chunk_num` — 1-indexed chunk number
    /// * `total`     — number of chunks in this run
    fn on_chunk_summarized(&self, chunk_num: usize, total: usize) {
        let _ = (chunk_num, total);
    }

    /// Called when the operation produced its artifact.
    fn on_run_complete(&self, operation: &str, output_len: usize) {
        let _ = (operation, output_len);
    }

    /// Called when the operation failed; the cached artifact is unchanged.
    fn on_run_failed(&self, operation: &str, error: &str) {
        let _ = (operation, error);
    }
}

/// A no-op implementation; the default when no callback is configured.
pub struct NoopProgressCallback;

impl PipelineProgressCallback for NoopProgressCallback {}

/// Convenience alias matching the type stored in [`crate::config::PipelineConfig`].
pub type ProgressCallback = Arc<dyn PipelineProgressCallback>;
