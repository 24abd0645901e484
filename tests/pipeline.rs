//! Integration tests for the notecraft pipeline.
//!
//! Every external collaborator (provider, OCR, image search, page access)
//! is replaced by an in-memory fake, so these run offline and without a
//! pdfium library:
//!
//!   cargo test --test pipeline

use async_trait::async_trait;
use notecraft::pipeline::chunk::Chunker;
use notecraft::pipeline::extract::{extract_pages, select_pages, PageSource};
use notecraft::pipeline::images::{ImageFetcher, ImageResolver, ImageSearch, RetryPolicy, Sleeper};
use notecraft::pipeline::llm::{GenerationDispatcher, GenerationRequest, TextGenerator};
use notecraft::pipeline::ocr::OcrEngine;
use notecraft::pipeline::postprocess::{clean_flashcards, parse_flashcards};
use notecraft::prompts::Prompt;
use notecraft::{
    Capabilities, CountRange, Document, ExtractedDocument, GenerationFailure, NoteCraftError, PageRange,
    PipelineConfig, PipelineProgressCallback, Provenance, SearchFailure, SplitBoundary, StudyKit, StudySession,
    TaskKind, TaskParams,
};
use image::{DynamicImage, Rgba, RgbaImage};
use std::collections::VecDeque;
use std::io::{Cursor, Write};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ── Fakes ────────────────────────────────────────────────────────────────────

/// Replays canned replies and records every prompt.
#[derive(Default)]
struct RecordingGenerator {
    replies: Mutex<VecDeque<Result<String, GenerationFailure>>>,
    prompts: Mutex<Vec<Prompt>>,
}

impl RecordingGenerator {
    fn new(replies: Vec<Result<String, GenerationFailure>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn prompts(&self) -> Vec<Prompt> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerator for RecordingGenerator {
    async fn invoke(&self, prompt: &Prompt) -> Result<String, GenerationFailure> {
        self.prompts.lock().unwrap().push(prompt.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(GenerationFailure::Other("no reply scripted".into())))
    }
}

/// Rate-limited for the first `limited` calls, then one URL per query.
struct ThrottledSearch {
    limited: u32,
    calls: AtomicU32,
}

impl ThrottledSearch {
    fn new(limited: u32) -> Arc<Self> {
        Arc::new(Self {
            limited,
            calls: AtomicU32::new(0),
        })
    }
}

#[async_trait]
impl ImageSearch for ThrottledSearch {
    async fn search(&self, query: &str, _max_results: usize) -> Result<Vec<String>, SearchFailure> {
        if self.calls.fetch_add(1, Ordering::SeqCst) < self.limited {
            return Err(SearchFailure::RateLimited);
        }
        Ok(vec![format!("https://img.test/{}.png", query.replace(' ', "-"))])
    }
}

struct PngFetcher;

#[async_trait]
impl ImageFetcher for PngFetcher {
    async fn fetch(&self, _url: &str) -> Result<(Vec<u8>, String), String> {
        Ok((b"\x89PNG fake".to_vec(), "image/png".into()))
    }
}

#[derive(Default)]
struct CountingSleeper {
    sleeps: AtomicUsize,
}

#[async_trait]
impl Sleeper for CountingSleeper {
    async fn sleep(&self, _duration: Duration) {
        self.sleeps.fetch_add(1, Ordering::SeqCst);
    }
}

struct NoOcr;

impl OcrEngine for NoOcr {
    fn recognize(&self, _image: &DynamicImage) -> Result<String, String> {
        Ok("scanned text".into())
    }
}

/// Replays OCR results in page order.
struct ScriptedOcr(Mutex<VecDeque<&'static str>>);

impl ScriptedOcr {
    fn new(texts: Vec<&'static str>) -> Self {
        Self(Mutex::new(texts.into()))
    }
}

impl OcrEngine for ScriptedOcr {
    fn recognize(&self, _image: &DynamicImage) -> Result<String, String> {
        self.0
            .lock()
            .unwrap()
            .pop_front()
            .map(str::to_string)
            .ok_or_else(|| "no scan scripted".into())
    }
}

/// Paged document in memory; `None` is a scanned page.
struct MemoryPages(Vec<Option<&'static str>>);

impl PageSource for MemoryPages {
    fn page_count(&self) -> usize {
        self.0.len()
    }

    fn has_embedded_image(&self, index: usize) -> Result<bool, String> {
        Ok(self.0[index].is_none())
    }

    fn native_text(&self, index: usize) -> Result<String, String> {
        self.0[index].map(str::to_string).ok_or_else(|| "no text layer".into())
    }

    fn rasterize(&self, _index: usize, _max_pixels: u32) -> Result<DynamicImage, String> {
        Ok(DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255; 4]))))
    }
}

#[derive(Default)]
struct ChunkCounter {
    summarized: AtomicUsize,
    failed: AtomicUsize,
}

impl PipelineProgressCallback for ChunkCounter {
    fn on_chunk_summarized(&self, _chunk_num: usize, _total: usize) {
        self.summarized.fetch_add(1, Ordering::SeqCst);
    }

    fn on_run_failed(&self, _operation: &str, _error: &str) {
        self.failed.fetch_add(1, Ordering::SeqCst);
    }
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn resolver(search: Arc<ThrottledSearch>, sleeper: Arc<CountingSleeper>, max_retries: u32) -> ImageResolver {
    ImageResolver::new(
        search,
        Arc::new(PngFetcher),
        sleeper,
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(10),
        },
        3,
    )
}

fn capabilities(generator: Arc<RecordingGenerator>) -> Capabilities {
    Capabilities {
        generator,
        ocr: Arc::new(NoOcr),
        images: resolver(ThrottledSearch::new(0), Arc::new(CountingSleeper::default()), 2),
    }
}

/// Minimal .pptx with one text shape per slide.
fn deck(slides: &[&str]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let opts = zip::write::SimpleFileOptions::default();
    zip.start_file("[Content_Types].xml", opts).unwrap();
    zip.write_all(b"<Types/>").unwrap();
    for (i, text) in slides.iter().enumerate() {
        zip.start_file(format!("ppt/slides/slide{}.xml", i + 1), opts).unwrap();
        let xml = format!(
            "<p:sld><p:cSld><p:spTree><p:sp><p:txBody><a:p><a:r><a:t>{text}</a:t></a:r></a:p>\
             </p:txBody></p:sp></p:spTree></p:cSld></p:sld>"
        );
        zip.write_all(xml.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

/// Ten 80-character paragraphs, tagged P00..P09.
fn ten_paragraphs() -> String {
    (0..10)
        .map(|i| format!("P{i:02} {}", "x".repeat(76)))
        .collect::<Vec<_>>()
        .join("\n\n")
}

// ── Extraction ───────────────────────────────────────────────────────────────

#[test]
fn native_pages_concatenate_in_order() {
    let pages = MemoryPages(vec![Some("Page one."), Some("Page two."), Some("Page three.")]);
    let indices = select_pages(&PageRange::Range(1, 3), pages.page_count()).unwrap();
    let doc = ExtractedDocument {
        pages: extract_pages(&pages, &NoOcr, &indices, 1000, "three.pdf").unwrap(),
    };
    assert_eq!(doc.text(), "Page one.\n\nPage two.\n\nPage three.");
    assert_eq!(doc.ocr_pages(), 0);
}

#[test]
fn only_scanned_pages_go_through_ocr() {
    let pages = MemoryPages(vec![Some("typed"), None, Some("typed again")]);
    let extracted = extract_pages(&pages, &NoOcr, &[0, 1, 2], 1000, "mixed.pdf").unwrap();
    let provenance: Vec<_> = extracted.iter().map(|p| p.provenance).collect();
    assert_eq!(provenance, vec![Provenance::NativeText, Provenance::Ocr, Provenance::NativeText]);
    assert_eq!(extracted[1].text, "scanned text");
}

#[tokio::test]
async fn paged_document_mixes_text_layer_and_ocr_then_one_call() {
    let pages = MemoryPages(vec![
        Some("Cell theory."),
        None,
        None,
        Some("Cells divide."),
        Some("Appendix."),
    ]);
    let ocr = ScriptedOcr::new(vec!["Scanned diagram of a cell.", "  \n "]);
    let indices = select_pages(&PageRange::Range(1, 4), pages.page_count()).unwrap();
    let doc = ExtractedDocument {
        pages: extract_pages(&pages, &ocr, &indices, 1000, "lecture.pdf").unwrap(),
    };

    let kept: Vec<_> = doc.pages.iter().map(|p| (p.index, p.provenance)).collect();
    assert_eq!(
        kept,
        vec![(0, Provenance::NativeText), (1, Provenance::Ocr), (3, Provenance::NativeText)]
    );
    assert_eq!(doc.text(), "Cell theory.\n\nScanned diagram of a cell.\n\nCells divide.");

    let fake = RecordingGenerator::new(vec![Ok("# Cells\n\n!!!IMG cell diagram!!!\n\nThey divide.".into())]);
    let dispatcher = GenerationDispatcher::new(fake.clone());
    let request = GenerationRequest::new(TaskKind::NoteWithImages, TaskParams::default(), doc.text());
    let note = dispatcher.dispatch(&request).await.unwrap();
    let resolved = resolver(ThrottledSearch::new(0), Arc::new(CountingSleeper::default()), 1)
        .resolve(&note.text, false)
        .await
        .unwrap();

    assert_eq!(fake.prompts().len(), 1);
    assert_eq!(fake.prompts()[0].user, doc.text());
    assert!(!resolved.text.contains("!!!"));
    assert_eq!(resolved.resolved, 1);
}

#[test]
fn range_outside_document_is_rejected() {
    let err = select_pages(&PageRange::Range(5, 9), 3).unwrap_err();
    assert!(matches!(err, NoteCraftError::PageOutOfRange { total: 3, .. }));
}

// ── Chunking ─────────────────────────────────────────────────────────────────

#[test]
fn short_input_is_one_chunk() {
    let chunker = Chunker::new(1000, 100, SplitBoundary::default_order()).unwrap();
    let chunks: Vec<_> = chunker.chunks("A short page.").collect();
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].text, "A short page.");
}

#[test]
fn chunks_without_overlap_rebuild_the_text() {
    let text = "Cells divide. ".repeat(200) + "\n\n" + &"Mitochondria make ATP; ".repeat(150);
    for (max, overlap) in [(100, 0), (257, 40), (1000, 999), (64, 63)] {
        let chunker = Chunker::new(max, overlap, SplitBoundary::default_order()).unwrap();
        let rebuilt: String = chunker.chunks(&text).map(|c| c.fresh().to_string()).collect();
        assert_eq!(rebuilt, text, "max={max} overlap={overlap}");
    }
}

// ── Session scenarios ────────────────────────────────────────────────────────

#[tokio::test]
async fn three_slide_note_uses_one_call_and_resolves_images() {
    let fake = RecordingGenerator::new(vec![Ok(
        "# Photosynthesis\n\n!!!IMG chloroplast!!!\n\nLight reactions.\n\n!!!IMG calvin cycle!!!".into(),
    )]);
    let document = Document::from_bytes("bio.pptx", deck(&["Slide one", "Slide two", "Slide three"])).unwrap();
    let config = PipelineConfig::builder().pages(PageRange::Range(1, 3)).build().unwrap();
    let mut session = StudySession::with_capabilities(document, config, capabilities(fake.clone())).unwrap();

    assert_eq!(session.page_count().await.unwrap(), 3);
    let note = session
        .generate_note(CountRange::new(200, 300), true)
        .await
        .unwrap()
        .to_string();

    let prompts = fake.prompts();
    assert_eq!(prompts.len(), 1);
    assert_eq!(prompts[0].user, "Slide one\n\nSlide two\n\nSlide three");
    assert!(!note.contains("!!!IMG"));
    assert!(note.contains("![chloroplast](https://img.test/chloroplast.png)"));
    assert!(note.contains("![calvin cycle](https://img.test/calvin-cycle.png)"));
}

#[tokio::test]
async fn ten_chunks_make_ten_summaries_then_one_combine() {
    let mut replies: Vec<Result<String, GenerationFailure>> = (0..10).map(|i| Ok(format!("s{i}"))).collect();
    replies.push(Ok("Q1\tA1\nQ2\tA2".into()));
    let fake = RecordingGenerator::new(replies);
    let counter = Arc::new(ChunkCounter::default());

    let document = Document::from_bytes("long.md", ten_paragraphs().into_bytes()).unwrap();
    let config = PipelineConfig::builder()
        .map_reduce(true)
        .chunk_max_chars(100)
        .chunk_overlap_chars(0)
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    let mut session = StudySession::with_capabilities(document, config, capabilities(fake.clone())).unwrap();

    let cards = session
        .generate_flashcards(TaskKind::FlashcardsQuestionAnswer, CountRange::new(2, 4))
        .await
        .unwrap();
    assert_eq!(cards.len(), 2);

    let prompts = fake.prompts();
    assert_eq!(prompts.len(), 11);
    for (i, p) in prompts[..10].iter().enumerate() {
        assert!(p.user.starts_with(&format!("P{i:02} ")), "chunk {i} out of order");
    }
    let expected: Vec<String> = (0..10).map(|i| format!("s{i}")).collect();
    assert_eq!(prompts[10].user, expected.join("\n\n"));
    assert!(prompts[10].system.contains("Produce 2 to 4 questions"));
    assert!(prompts[10].system.contains("partial summaries"));
    assert_eq!(counter.summarized.load(Ordering::SeqCst), 10);
}

#[tokio::test]
async fn quota_on_the_last_map_reduce_call_suggests_disabling_it() {
    let mut replies: Vec<Result<String, GenerationFailure>> = (0..10).map(|i| Ok(format!("s{i}"))).collect();
    replies.push(Err(GenerationFailure::QuotaExhausted("RESOURCE_EXHAUSTED".into())));
    let fake = RecordingGenerator::new(replies);

    let document = Document::from_bytes("long.md", ten_paragraphs().into_bytes()).unwrap();
    let config = PipelineConfig::builder()
        .map_reduce(true)
        .chunk_max_chars(100)
        .chunk_overlap_chars(0)
        .build()
        .unwrap();
    let mut session = StudySession::with_capabilities(document, config, capabilities(fake.clone())).unwrap();

    let err = session.generate_cheatsheet().await.unwrap_err();
    assert!(matches!(
        err,
        NoteCraftError::QuotaExhausted {
            during_map_reduce: true,
            ..
        }
    ));
    assert!(err.to_string().contains("disable map-reduce"));
    assert_eq!(fake.prompts().len(), 11);
    assert!(session.cheatsheet().is_none());
}

#[tokio::test]
async fn quota_during_map_reduce_keeps_previous_note() {
    let fake = RecordingGenerator::new(vec![
        Ok("s0".into()),
        Err(GenerationFailure::QuotaExhausted("RESOURCE_EXHAUSTED".into())),
    ]);
    let counter = Arc::new(ChunkCounter::default());
    let document = Document::from_bytes("long.md", ten_paragraphs().into_bytes()).unwrap();
    let config = PipelineConfig::builder()
        .map_reduce(true)
        .chunk_max_chars(100)
        .chunk_overlap_chars(0)
        .progress_callback(counter.clone())
        .build()
        .unwrap();
    let mut session = StudySession::with_capabilities(document, config, capabilities(fake.clone())).unwrap();
    let before = session.note().map(str::to_string);

    let err = session
        .generate_note(CountRange::new(100, 200), false)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        NoteCraftError::QuotaExhausted {
            during_map_reduce: true,
            ..
        }
    ));
    assert!(err.to_string().contains("disable map-reduce"));
    assert_eq!(session.note().map(str::to_string), before);
    assert_eq!(fake.prompts().len(), 2);
    assert_eq!(counter.failed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn study_kit_round_trips_through_a_file() {
    let fake = RecordingGenerator::new(vec![
        Ok("```markdown\n# Genetics\n\nDNA stores information.\n```".into()),
        Ok("Term\tDefinition\nGene\tUnit of heredity\nAllele\tVariant of a gene".into()),
    ]);
    let document = Document::from_bytes("genetics.pptx", deck(&["DNA", "Genes", "Alleles", "Traits"])).unwrap();
    let config = PipelineConfig::builder().pages(PageRange::Range(2, 3)).build().unwrap();
    let mut session = StudySession::with_capabilities(document, config, capabilities(fake)).unwrap();

    session.generate_note(CountRange::new(100, 200), false).await.unwrap();
    session
        .generate_flashcards(TaskKind::FlashcardsTermDefinition, CountRange::new(2, 2))
        .await
        .unwrap();
    let kit = session.study_kit().unwrap();
    assert_eq!(kit.note, "# Genetics\n\nDNA stores information.\n");
    assert_eq!(kit.flashcards, "Gene\tUnit of heredity\nAllele\tVariant of a gene");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("genetics.kit");
    kit.save_to_file(&path).await.unwrap();
    let loaded = StudyKit::load_from_file(&path).await.unwrap();

    assert_eq!(loaded.note, kit.note);
    assert_eq!(loaded.flashcards, kit.flashcards);
    assert_eq!(loaded.pages, PageRange::Range(2, 3));
    assert_eq!(loaded.source_bytes, session.document().bytes);
}

// ── Image resolution ─────────────────────────────────────────────────────────

#[tokio::test]
async fn k_placeholders_become_k_images() {
    let sleeper = Arc::new(CountingSleeper::default());
    let r = resolver(ThrottledSearch::new(0), sleeper, 2);
    let text = "Intro\n!!!IMG heart!!!\n!!!IMG lung!!!\nMiddle !!!IMG kidney!!! end\n!!!IMG liver!!!";
    let out = r.resolve(text, true).await.unwrap();
    assert_eq!(out.resolved, 4);
    assert!(!out.text.contains("!!!IMG"));
    assert_eq!(out.text.matches("](data:image/png;base64,").count(), 4);
}

#[tokio::test]
async fn rate_limit_until_ceiling_recovers() {
    let sleeper = Arc::new(CountingSleeper::default());
    let r = resolver(ThrottledSearch::new(3), sleeper.clone(), 3);
    let out = r.resolve("!!!IMG neuron!!!", false).await.unwrap();
    assert_eq!(out.resolved, 1);
    assert_eq!(sleeper.sleeps.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn rate_limit_past_ceiling_aborts() {
    let sleeper = Arc::new(CountingSleeper::default());
    let r = resolver(ThrottledSearch::new(4), sleeper.clone(), 3);
    let err = r.resolve("!!!IMG neuron!!! and !!!IMG axon!!!", false).await.unwrap_err();
    assert!(matches!(err, NoteCraftError::RateLimited { attempts: 4 }));
    assert_eq!(sleeper.sleeps.load(Ordering::SeqCst), 3);
}

// ── Flashcard cleaning ───────────────────────────────────────────────────────

#[test]
fn cleaning_is_idempotent() {
    let inputs = [
        "```tsv\nQuestion\tAnswer\nWhat is ATP?\t\tEnergy\n\n\nWhat is DNA?\tGenetic code\n```",
        "\u{FEFF}Terms\tDefinitions\r\nOsmosis\tWater movement\r\n",
        "no tabs at all",
        "",
        "```\n```",
    ];
    for x in inputs {
        let once = clean_flashcards(x);
        assert_eq!(clean_flashcards(&once), once, "input {x:?}");
    }
}

#[test]
fn header_row_is_removed_case_insensitively() {
    let cleaned = clean_flashcards("QUESTIONS\tanswers\nWhat is a cell?\tThe unit of life");
    assert_eq!(cleaned, "What is a cell?\tThe unit of life");

    let set = parse_flashcards(&clean_flashcards("Term\tDefinition\nQuestion\tA prompt to answer")).unwrap();
    assert_eq!(set.questions(), vec!["Question"]);
}

#[test]
fn n_valid_rows_give_n_records() {
    let rows: Vec<String> = (1..=7).map(|i| format!("Q{i}\tA{i}")).collect();
    let mut text = rows.join("\n");
    text.push_str("\nlonely field\n");
    let set = parse_flashcards(&clean_flashcards(&text)).unwrap();
    assert_eq!(set.len(), 7);
    assert_eq!(set.rejected.len(), 1);
    assert!(!set.questions().contains(&"lonely field"));
}

#[test]
fn empty_generation_is_its_own_error() {
    assert!(matches!(
        parse_flashcards(&clean_flashcards("```tsv\n\n```")),
        Err(NoteCraftError::NoRecordsGenerated)
    ));
}
