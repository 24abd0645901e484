//! A study session: one document and the artifacts generated from it.
//!
//! ## Run model
//!
//! Every operation is one pipeline run, awaited start to finish:
//!
//! ```text
//! extract ─┬─────────────────────────────▶ dispatch ─┬─▶ clean/parse ─▶ [resolve images]
//!          └─▶ chunk summaries ─▶ task over summaries ─┘      (map-reduce)
//! ```
//!
//! With map-reduce on, the task's own call is the combine step, so a run
//! over N chunks makes N + 1 provider calls.
//!
//! Operations take `&mut self`, so two runs on the same session can never
//! overlap. A run that fails leaves the previously cached artifact exactly
//! as it was; the cache is only assigned after every stage has succeeded.
//!
//! Edits work on the cached artifact, not on the document: `edit_note`
//! needs a note, `edit_flashcards` needs flashcards, and both fail with
//! [`NoteCraftError::MissingArtifact`] otherwise.
//!
//! Questions ([`StudySession::ask`]) are a conversation over the source:
//! the extracted text is split into passages once, each question is sent
//! with its best-matching passages and the last few exchanges.

use crate::bundle::StudyKit;
use crate::config::{CountRange, PipelineConfig};
use crate::document::{Document, DocumentFormat};
use crate::error::NoteCraftError;
use crate::output::{ChatTurn, Chunk, ExtractedDocument, FlashcardSet};
use crate::pipeline::chunk::Chunker;
use crate::pipeline::extract;
use crate::pipeline::images::{strip_placeholders, ImageResolver};
use crate::pipeline::input;
use crate::pipeline::llm::{resolve_provider, GenerationDispatcher, GenerationRequest, LlmGenerator, TextGenerator};
use crate::pipeline::ocr::{OcrEngine, TesseractOcr};
use crate::pipeline::postprocess::{clean_flashcards, clean_note, format_flashcards, parse_flashcards, tidy_layout};
use crate::pipeline::retrieve::best_chunks;
use crate::pipeline::summarize::MapReduceSummarizer;
use crate::progress::Stage;
use crate::prompts::{TaskKind, TaskParams};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// External collaborators a session talks to.
pub struct Capabilities {
    pub generator: Arc<dyn TextGenerator>,
    pub ocr: Arc<dyn OcrEngine>,
    pub images: ImageResolver,
}

impl Capabilities {
    /// Provider from the resolution chain, tesseract OCR, DuckDuckGo images.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, NoteCraftError> {
        let provider = resolve_provider(config)?;
        Ok(Self {
            generator: Arc::new(LlmGenerator::new(provider, config)),
            ocr: Arc::new(TesseractOcr::new(&config.tesseract_binary, &config.ocr_language)),
            images: ImageResolver::from_config(config)?,
        })
    }
}

/// Latest generated note: as generated (placeholders intact) and as shown.
#[derive(Debug, Clone)]
struct NoteArtifact {
    raw: String,
    rendered: String,
    with_images: bool,
}

#[derive(Debug, Clone)]
struct FlashcardArtifact {
    text: String,
    set: FlashcardSet,
}

/// Passages of the source and the most recent exchanges about it.
#[derive(Debug, Clone)]
struct Conversation {
    passages: Vec<Chunk>,
    history: VecDeque<ChatTurn>,
    answer: String,
}

pub struct StudySession {
    document: Document,
    config: PipelineConfig,
    dispatcher: GenerationDispatcher,
    ocr: Arc<dyn OcrEngine>,
    images: ImageResolver,
    note: Option<NoteArtifact>,
    flashcards: Option<FlashcardArtifact>,
    cheatsheet: Option<String>,
    conversation: Option<Conversation>,
}

impl StudySession {
    /// Load `input` (path or URL) and connect the configured collaborators.
    pub async fn open(input: &str, config: PipelineConfig) -> Result<Self, NoteCraftError> {
        let document = input::resolve_input(input, config.download_timeout_secs).await?;
        let capabilities = Capabilities::from_config(&config)?;
        Self::with_capabilities(document, config, capabilities)
    }

    /// Build a session from an already-loaded document.
    ///
    /// A Markdown document becomes the current note; a tab-separated
    /// document becomes the current flashcards and must parse.
    pub fn with_capabilities(
        document: Document,
        config: PipelineConfig,
        capabilities: Capabilities,
    ) -> Result<Self, NoteCraftError> {
        let mut session = Self {
            dispatcher: GenerationDispatcher::new(capabilities.generator),
            ocr: capabilities.ocr,
            images: capabilities.images,
            document,
            config,
            note: None,
            flashcards: None,
            cheatsheet: None,
            conversation: None,
        };

        match session.document.format {
            DocumentFormat::Markdown => {
                let text = session.document.text()?;
                session.note = Some(NoteArtifact {
                    raw: text.clone(),
                    rendered: text,
                    with_images: false,
                });
            }
            DocumentFormat::TabSeparated => {
                let text = clean_flashcards(&session.document.text()?);
                let set = parse_flashcards(&text)?;
                session.flashcards = Some(FlashcardArtifact { text, set });
            }
            _ => {}
        }
        Ok(session)
    }

    pub fn document(&self) -> &Document {
        &self.document
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// The current note, images resolved.
    pub fn note(&self) -> Option<&str> {
        self.note.as_ref().map(|n| n.rendered.as_str())
    }

    pub fn flashcards(&self) -> Option<&FlashcardSet> {
        self.flashcards.as_ref().map(|f| &f.set)
    }

    /// The current flashcards as cleaned tab-separated text.
    pub fn flashcards_text(&self) -> Option<&str> {
        self.flashcards.as_ref().map(|f| f.text.as_str())
    }

    pub fn cheatsheet(&self) -> Option<&str> {
        self.cheatsheet.as_deref()
    }

    /// Remembered question/answer pairs, oldest first.
    pub fn conversation(&self) -> impl Iterator<Item = &ChatTurn> {
        self.conversation.iter().flat_map(|c| c.history.iter())
    }

    /// Forget the conversation; the next question re-reads the source.
    pub fn clear_conversation(&mut self) {
        self.conversation = None;
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// Pages (or slides) in the document; 1 for formats without pages.
    pub async fn page_count(&self) -> Result<usize, NoteCraftError> {
        extract::page_count(&self.document, &self.config).await
    }

    /// Extract the selected page range.
    pub async fn extract(&self) -> Result<ExtractedDocument, NoteCraftError> {
        self.stage(Stage::Extracting);
        let extracted = extract::extract(&self.document, &self.config, Arc::clone(&self.ocr)).await?;
        if extracted.is_empty() {
            return Err(NoteCraftError::DocumentRead {
                name: self.document.name.clone(),
                detail: "no text found in the selected pages; try a different page range".into(),
            });
        }
        Ok(extracted)
    }

    // ── Generation ───────────────────────────────────────────────────────

    /// Generate a note of about `word_range` words.
    ///
    /// With `images`, the provider is asked for image placeholders and each
    /// one is resolved (embedded when `config.embed_images` is set).
    /// Without, any placeholder the provider emits anyway is removed.
    pub async fn generate_note(&mut self, word_range: CountRange, images: bool) -> Result<&str, NoteCraftError> {
        let op = if images { "note with images" } else { "note" };
        self.run_start(op);
        let kind = if images { TaskKind::NoteWithImages } else { TaskKind::Note };
        let params = TaskParams {
            word_range: Some(word_range),
            ..Default::default()
        };

        let result = self.produce_note(kind, params, None, images).await;
        let note = self.finish(op, result, |n| n.rendered.len())?;
        Ok(self.note.insert(note).rendered.as_str())
    }

    /// Generate flashcards in one of the three tabular styles.
    pub async fn generate_flashcards(
        &mut self,
        style: TaskKind,
        record_range: CountRange,
    ) -> Result<&FlashcardSet, NoteCraftError> {
        if !style.is_tabular() || style == TaskKind::EditFlashcards {
            return Err(NoteCraftError::UnsupportedTask(style.to_string()));
        }
        self.run_start("flashcards");
        let params = TaskParams {
            record_range: Some(record_range),
            ..Default::default()
        };

        let result = self.produce_flashcards(style, params, None).await;
        let cards = self.finish("flashcards", result, |f| f.set.len())?;
        Ok(&self.flashcards.insert(cards).set)
    }

    /// Generate a cheatsheet from the document.
    pub async fn generate_cheatsheet(&mut self) -> Result<&str, NoteCraftError> {
        self.run_start("cheatsheet");
        let params = TaskParams::default();

        let result = self.produce_note(TaskKind::Cheatsheet, params, None, false).await;
        let sheet = self.finish("cheatsheet", result, |n| n.rendered.len())?;
        Ok(self.cheatsheet.insert(sheet.rendered).as_str())
    }

    // ── Edits ────────────────────────────────────────────────────────────

    /// Rewrite the current note following `instruction`.
    ///
    /// The edit sees the note with its placeholders, not the resolved
    /// images, and the result is resolved again the same way.
    pub async fn edit_note(&mut self, instruction: &str) -> Result<&str, NoteCraftError> {
        let current = self
            .note
            .as_ref()
            .map(|n| (n.raw.clone(), n.with_images))
            .ok_or(NoteCraftError::MissingArtifact { artifact: "note" })?;
        self.run_start("edit note");
        let (raw, images) = current;
        let params = TaskParams {
            instruction: Some(instruction.to_string()),
            ..Default::default()
        };

        let result = self.produce_note(TaskKind::EditNote, params, Some(raw), images).await;
        let note = self.finish("edit note", result, |n| n.rendered.len())?;
        Ok(self.note.insert(note).rendered.as_str())
    }

    /// Rewrite the current flashcards following `instruction`.
    pub async fn edit_flashcards(&mut self, instruction: &str) -> Result<&FlashcardSet, NoteCraftError> {
        let current = self
            .flashcards
            .as_ref()
            .map(|f| format_flashcards(&f.set))
            .ok_or(NoteCraftError::MissingArtifact { artifact: "flashcard set" })?;
        self.run_start("edit flashcards");
        let params = TaskParams {
            instruction: Some(instruction.to_string()),
            ..Default::default()
        };

        let result = self
            .produce_flashcards(TaskKind::EditFlashcards, params, Some(current))
            .await;
        let cards = self.finish("edit flashcards", result, |f| f.set.len())?;
        Ok(&self.flashcards.insert(cards).set)
    }

    // ── Questions ────────────────────────────────────────────────────────

    /// Answer `question` from the document, in the context of the
    /// conversation so far.
    ///
    /// Map-reduce does not apply: the answer is drawn from the
    /// `config.ask_context_chunks` passages that best match the question.
    /// Only the last `config.ask_history_turns` exchanges are remembered. A
    /// failed question leaves the conversation as it was.
    pub async fn ask(&mut self, question: &str) -> Result<&str, NoteCraftError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(NoteCraftError::EmptyQuestion);
        }
        self.run_start("answer");
        let result = self.answer(question).await;
        let (fresh, answer) = self.finish("answer", result, |(_, a)| a.len())?;

        let limit = self.config.ask_history_turns;
        let conversation = match fresh {
            Some(passages) => self.conversation.insert(Conversation {
                passages,
                history: VecDeque::new(),
                answer: String::new(),
            }),
            None => self
                .conversation
                .as_mut()
                .ok_or_else(|| NoteCraftError::Internal("conversation vanished between turns".into()))?,
        };
        conversation.history.push_back(ChatTurn {
            question: question.to_string(),
            answer: answer.clone(),
        });
        while conversation.history.len() > limit {
            conversation.history.pop_front();
        }
        conversation.answer = answer;
        Ok(conversation.answer.as_str())
    }

    // ── Packaging ────────────────────────────────────────────────────────

    /// Bundle the current note, flashcards and source document.
    pub fn study_kit(&self) -> Result<StudyKit, NoteCraftError> {
        let note = self.note.as_ref().ok_or(NoteCraftError::MissingArtifact { artifact: "note" })?;
        let cards = self
            .flashcards
            .as_ref()
            .ok_or(NoteCraftError::MissingArtifact { artifact: "flashcard set" })?;
        Ok(StudyKit {
            note: note.rendered.clone(),
            flashcards: cards.text.clone(),
            pages: self.config.pages,
            source_name: self.document.name.clone(),
            source_bytes: self.document.bytes.clone(),
        })
    }

    // ── Internal helpers ─────────────────────────────────────────────────

    /// One generation task; the input is the document unless `input` is given.
    ///
    /// Over the document with map-reduce on, the task runs as the combine
    /// step over chunk summaries and quota errors say so.
    async fn generate(
        &self,
        kind: TaskKind,
        params: TaskParams,
        input: Option<String>,
    ) -> Result<String, NoteCraftError> {
        let input = match input {
            Some(text) => text,
            None => {
                let extracted = self.extract().await?;
                if self.config.map_reduce {
                    let chunker = Chunker::from_config(&self.config)?;
                    let mut summarizer = MapReduceSummarizer::new(&self.dispatcher, chunker, self.config.min_page_words)
                        .with_progress(self.config.progress_callback.clone());
                    return Ok(summarizer.generate(kind, params, extracted.pages).await?.text);
                }
                extracted.text()
            }
        };
        self.stage(Stage::Generating);
        let request = GenerationRequest::new(kind, params, input);
        Ok(self.dispatcher.dispatch(&request).await?.text)
    }

    /// The source split into passages for question answering.
    async fn passages(&self) -> Result<Vec<Chunk>, NoteCraftError> {
        let text = self.extract().await?.text();
        let size = self.config.ask_chunk_chars;
        let chunker = Chunker::new(size, size / 5, self.config.split_boundaries.clone())?;
        let passages: Vec<Chunk> = chunker.chunks(&text).collect();
        debug!("{} passages of up to {} chars", passages.len(), size);
        Ok(passages)
    }

    /// Answer one question. Returns the passages too when they were built
    /// for this question, so the caller can keep them.
    async fn answer(&self, question: &str) -> Result<(Option<Vec<Chunk>>, String), NoteCraftError> {
        let fresh = match self.conversation {
            Some(_) => None,
            None => Some(self.passages().await?),
        };
        let passages: &[Chunk] = match (&fresh, &self.conversation) {
            (Some(p), _) => p,
            (None, Some(c)) => &c.passages,
            (None, None) => &[],
        };

        self.stage(Stage::Retrieving);
        let excerpts = best_chunks(passages, question, self.config.ask_context_chunks)
            .into_iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n[...]\n\n");
        let history: Vec<ChatTurn> = self.conversation().cloned().collect();

        self.stage(Stage::Generating);
        let params = TaskParams {
            instruction: Some(question.to_string()),
            ..Default::default()
        };
        let request = GenerationRequest::new(TaskKind::Ask, params, excerpts).with_history(history);
        let reply = self.dispatcher.dispatch(&request).await?;
        self.stage(Stage::Cleaning);
        Ok((fresh, tidy_layout(&reply.text)))
    }

    async fn produce_note(
        &self,
        kind: TaskKind,
        params: TaskParams,
        input: Option<String>,
        images: bool,
    ) -> Result<NoteArtifact, NoteCraftError> {
        let generated = self.generate(kind, params, input).await?;
        self.stage(Stage::Cleaning);
        let raw = clean_note(&generated);

        let rendered = if images {
            self.stage(Stage::ResolvingImages);
            let resolution = self.images.resolve(&raw, self.config.embed_images).await?;
            tidy_layout(&resolution.text)
        } else {
            tidy_layout(&strip_placeholders(&raw))
        };
        Ok(NoteArtifact {
            raw,
            rendered,
            with_images: images,
        })
    }

    async fn produce_flashcards(
        &self,
        kind: TaskKind,
        params: TaskParams,
        input: Option<String>,
    ) -> Result<FlashcardArtifact, NoteCraftError> {
        let generated = self.generate(kind, params, input).await?;
        self.stage(Stage::Cleaning);
        let text = clean_flashcards(&generated);
        let set = parse_flashcards(&text)?;
        Ok(FlashcardArtifact { text, set })
    }

    fn stage(&self, stage: Stage) {
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_stage(stage);
        }
    }

    fn run_start(&self, op: &str) {
        info!("Starting {} for {}", op, self.document.name);
        if let Some(ref cb) = self.config.progress_callback {
            cb.on_run_start(op);
        }
    }

    fn finish<T>(&self, op: &str, result: Result<T, NoteCraftError>, size: impl Fn(&T) -> usize) -> Result<T, NoteCraftError> {
        match result {
            Ok(artifact) => {
                let n = size(&artifact);
                info!("{} done ({})", op, n);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_run_complete(op, n);
                }
                Ok(artifact)
            }
            Err(e) => {
                warn!("{} failed: {}", op, e);
                if let Some(ref cb) = self.config.progress_callback {
                    cb.on_run_failed(op, &e.to_string());
                }
                Err(e)
            }
        }
    }
}
