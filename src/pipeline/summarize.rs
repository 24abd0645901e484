//! Map-reduce generation for documents too long for one call.
//!
//! ```text
//! Idle ─▶ Chunking ─▶ PerChunkSummarizing ─▶ Combining ─▶ Done
//!              │               │                  │
//!              └───────────────┴──────────────────┴─────▶ Failed
//! ```
//!
//! Each chunk is compressed on its own (page-summary task), strictly in
//! chunk order. The summaries are concatenated in that same order and fed
//! to one combine call: the requested task's own template, carrying its
//! word or record target, told that its input is ordered summaries. That
//! call's reply is the artifact, so a run over N chunks costs N + 1 calls.
//! Reordering summaries would scramble the narrative the combine step
//! stitches together, so nothing here runs concurrently.
//!
//! Any failure aborts the run with no partial output. Quota exhaustion on
//! any of the N + 1 calls is reported with `during_map_reduce = true` so the
//! message can suggest turning this mode off.

use crate::error::NoteCraftError;
use crate::output::{ExtractedDocument, ExtractedPage, GenerationResult};
use crate::pipeline::chunk::{merge_short_pages, Chunker};
use crate::pipeline::llm::{failure_to_error, GenerationDispatcher, GenerationRequest};
use crate::progress::{ProgressCallback, Stage};
use crate::prompts::{TaskKind, TaskParams};
use tracing::{info, warn};

/// Where a summariser run currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SummarizerState {
    Idle,
    Chunking,
    PerChunkSummarizing { done: usize, total: usize },
    Combining,
    Done,
    Failed,
}

pub struct MapReduceSummarizer<'a> {
    dispatcher: &'a GenerationDispatcher,
    chunker: Chunker,
    min_page_words: usize,
    progress: Option<ProgressCallback>,
    state: SummarizerState,
}

impl<'a> MapReduceSummarizer<'a> {
    pub fn new(dispatcher: &'a GenerationDispatcher, chunker: Chunker, min_page_words: usize) -> Self {
        Self {
            dispatcher,
            chunker,
            min_page_words,
            progress: None,
            state: SummarizerState::Idle,
        }
    }

    pub fn with_progress(mut self, progress: Option<ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    pub fn state(&self) -> SummarizerState {
        self.state
    }

    fn stage(&self, stage: Stage) {
        if let Some(ref cb) = self.progress {
            cb.on_stage(stage);
        }
    }

    /// Run `kind` over `pages` through per-chunk summaries.
    ///
    /// `params` go to the combine call only; chunk summaries have no target.
    pub async fn generate(
        &mut self,
        kind: TaskKind,
        params: TaskParams,
        pages: Vec<ExtractedPage>,
    ) -> Result<GenerationResult, NoteCraftError> {
        let result = self.run(kind, params, pages).await;
        self.state = match result {
            Ok(_) => SummarizerState::Done,
            Err(ref e) => {
                warn!("Map-reduce aborted: {}", e);
                SummarizerState::Failed
            }
        };
        result
    }

    async fn run(
        &mut self,
        kind: TaskKind,
        params: TaskParams,
        pages: Vec<ExtractedPage>,
    ) -> Result<GenerationResult, NoteCraftError> {
        // ── Chunking ─────────────────────────────────────────────────────
        self.state = SummarizerState::Chunking;
        self.stage(Stage::Chunking);
        let merged = ExtractedDocument {
            pages: merge_short_pages(pages, self.min_page_words),
        };
        let text = merged.text();
        let chunks: Vec<_> = self.chunker.chunks(&text).collect();
        let total = chunks.len();
        info!("Map-reduce: {} chars in {} chunks", text.len(), total);

        // ── Per-chunk summaries, in order ────────────────────────────────
        self.stage(Stage::Summarizing);
        let mut summaries = Vec::with_capacity(total);
        for chunk in &chunks {
            self.state = SummarizerState::PerChunkSummarizing {
                done: chunk.index,
                total,
            };
            let request = GenerationRequest::new(TaskKind::PageSummary, TaskParams::default(), chunk.text.as_str());
            let summary = self
                .dispatcher
                .try_dispatch(&request)
                .await
                .map_err(|f| failure_to_error(TaskKind::PageSummary, f, true))?;
            summaries.push(summary.text);
            if let Some(ref cb) = self.progress {
                cb.on_chunk_summarized(chunk.index + 1, total);
            }
        }

        // ── Combine ──────────────────────────────────────────────────────
        self.state = SummarizerState::Combining;
        self.stage(Stage::Combining);
        let request = GenerationRequest::over_summaries(kind, params, summaries.join("\n\n"));
        self.dispatcher
            .try_dispatch(&request)
            .await
            .map_err(|f| failure_to_error(kind, f, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CountRange, SplitBoundary};
    use crate::error::GenerationFailure;
    use crate::output::Provenance;
    use crate::pipeline::llm::tests::ScriptedGenerator;

    fn pages(n: usize, words: usize) -> Vec<ExtractedPage> {
        (0..n)
            .map(|i| ExtractedPage {
                index: i,
                text: vec![format!("p{i}"); words].join(" "),
                provenance: Provenance::NativeText,
            })
            .collect()
    }

    #[tokio::test]
    async fn summaries_run_in_order_then_the_task_combines() {
        let fake = ScriptedGenerator::new(vec![
            Ok("s0".into()),
            Ok("s1".into()),
            Ok("s2".into()),
            Ok("# Final note".into()),
        ]);
        let dispatcher = GenerationDispatcher::new(fake.clone());
        // Three 60-word pages of 179 chars each; one page per chunk.
        let chunker = Chunker::new(250, 0, vec![SplitBoundary::Paragraph]).unwrap();
        let mut s = MapReduceSummarizer::new(&dispatcher, chunker, 50);
        let params = TaskParams {
            word_range: Some(CountRange::new(100, 200)),
            ..Default::default()
        };

        let out = s.generate(TaskKind::Note, params, pages(3, 60)).await.unwrap();
        assert_eq!(out.kind, TaskKind::Note);
        assert_eq!(out.text, "# Final note");
        assert_eq!(s.state(), SummarizerState::Done);

        let prompts = fake.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 4);
        for (i, p) in prompts[..3].iter().enumerate() {
            assert!(p.user.starts_with(&format!("p{i} ")), "chunk {i} out of order");
            assert!(!p.system.contains("100 to 200"));
        }
        assert_eq!(prompts[3].user, "s0\n\ns1\n\ns2");
        assert!(prompts[3].system.contains("Write 100 to 200 words"));
        assert!(prompts[3].system.contains("partial summaries"));
    }

    #[tokio::test]
    async fn quota_during_chunking_aborts_with_flag() {
        let fake = ScriptedGenerator::new(vec![
            Ok("s0".into()),
            Err(GenerationFailure::QuotaExhausted("RESOURCE_EXHAUSTED".into())),
        ]);
        let dispatcher = GenerationDispatcher::new(fake.clone());
        let chunker = Chunker::new(250, 0, vec![SplitBoundary::Paragraph]).unwrap();
        let mut s = MapReduceSummarizer::new(&dispatcher, chunker, 50);

        let err = s
            .generate(TaskKind::Cheatsheet, TaskParams::default(), pages(3, 60))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            NoteCraftError::QuotaExhausted {
                during_map_reduce: true,
                ..
            }
        ));
        assert_eq!(s.state(), SummarizerState::Failed);
        assert_eq!(fake.calls(), 2);
    }

    #[tokio::test]
    async fn quota_on_the_combine_call_is_still_map_reduce() {
        let fake = ScriptedGenerator::new(vec![
            Ok("s0".into()),
            Ok("s1".into()),
            Ok("s2".into()),
            Err(GenerationFailure::QuotaExhausted("RESOURCE_EXHAUSTED".into())),
        ]);
        let dispatcher = GenerationDispatcher::new(fake.clone());
        let chunker = Chunker::new(250, 0, vec![SplitBoundary::Paragraph]).unwrap();
        let mut s = MapReduceSummarizer::new(&dispatcher, chunker, 50);

        let err = s
            .generate(TaskKind::FlashcardsTermDefinition, TaskParams::default(), pages(3, 60))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("disable map-reduce"), "got: {err}");
        assert_eq!(s.state(), SummarizerState::Failed);
        assert_eq!(fake.calls(), 4);
    }
}
