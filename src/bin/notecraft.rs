//! CLI binary for notecraft.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `PipelineConfig`, runs one session operation and prints the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use notecraft::pipeline::input::{resolve_input, sibling_path};
use notecraft::pipeline::{extract, ocr::TesseractOcr};
use notecraft::{
    CountRange, PageRange, PipelineConfig, PipelineProgressCallback, ProgressCallback, Stage, StudyKit,
    StudySession, TaskKind,
};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Spinner that shows the current stage of a session operation.
struct CliProgressCallback {
    bar: ProgressBar,
    started: Instant,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}  {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Preparing");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            started: Instant::now(),
        })
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, operation: &str) {
        self.bar.set_prefix(operation.to_string());
    }

    fn on_stage(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_chunk_summarized(&self, chunk_num: usize, total: usize) {
        self.bar.set_message(format!("summarised chunk {chunk_num}/{total}"));
    }

    fn on_run_complete(&self, operation: &str, output_len: usize) {
        self.bar.finish_and_clear();
        eprintln!(
            "{} {} done  {}",
            green("✔"),
            bold(operation),
            dim(&format!("{output_len} · {:.1}s", self.started.elapsed().as_secs_f64())),
        );
    }

    fn on_run_failed(&self, operation: &str, error: &str) {
        self.bar.finish_and_clear();
        let first_line = error.lines().next().unwrap_or(error);
        eprintln!("{} {} failed: {}", red("✘"), bold(operation), red(first_line));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # How many pages?
  notecraft pages lecture.pdf

  # A 300-500 word note of pages 3-15
  notecraft --pages 3-15 note lecture.pdf --words 300-500 -o lecture.md

  # Note with images embedded for offline reading
  notecraft --embed-images note lecture.pdf --images -o lecture.md

  # Flashcards from a long book, compressed first
  notecraft --map-reduce flashcards book.pdf --style question-answer --count 20-30

  # Everything in one portable file, then unpack it
  notecraft kit slides.pptx -o slides.kit
  notecraft unpack slides.kit --dir slides/

  # Ask one question, or start a conversation on stdin
  notecraft ask lecture.pdf "What does the Krebs cycle produce?"
  notecraft --pages 1-20 ask lecture.pdf

  # Edit an existing note or deck
  notecraft edit-note lecture.md "add a summary table at the end" -o lecture.md
  notecraft edit-flashcards deck.tsv "make the answers shorter"

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory containing libpdfium
  NOTECRAFT_*             Any global flag, e.g. NOTECRAFT_PAGES=1-10
"#;

/// Turn documents into study notes, flashcards and cheatsheets.
#[derive(Parser, Debug)]
#[command(
    name = "notecraft",
    version,
    about = "Turn documents into study notes, flashcards and cheatsheets",
    long_about = "Extract text from PDF, PPTX and DOCX documents (with OCR for scanned pages), \
then generate notes, flashcards and cheatsheets with a text-generation provider. \
Supports OpenAI, Anthropic, Google Gemini, Azure OpenAI and Ollama.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct GlobalArgs {
    /// LLM model ID (e.g. gpt-4o-mini, claude-sonnet-4-20250514).
    #[arg(long, global = true, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, global = true, env = "NOTECRAFT_PROVIDER")]
    provider: Option<String>,

    /// Page range: all, 5, or 3-15 (1-indexed, inclusive).
    #[arg(long, global = true, env = "NOTECRAFT_PAGES", default_value = "all", value_parser = parse_pages)]
    pages: PageRange,

    /// Summarise chunk by chunk before generating (long documents).
    #[arg(long, global = true, env = "NOTECRAFT_MAP_REDUCE")]
    map_reduce: bool,

    /// Chunk size in characters for map-reduce.
    #[arg(long, global = true, env = "NOTECRAFT_CHUNK_SIZE", default_value_t = 12_000)]
    chunk_size: usize,

    /// Characters shared between consecutive chunks.
    #[arg(long, global = true, env = "NOTECRAFT_CHUNK_OVERLAP", default_value_t = 400)]
    chunk_overlap: usize,

    /// LLM temperature (0.0–2.0).
    #[arg(long, global = true, env = "NOTECRAFT_TEMPERATURE", default_value_t = 0.3)]
    temperature: f32,

    /// Max LLM output tokens per call.
    #[arg(long, global = true, env = "NOTECRAFT_MAX_TOKENS", default_value_t = 8192)]
    max_tokens: usize,

    /// Per-call LLM timeout in seconds.
    #[arg(long, global = true, env = "NOTECRAFT_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, global = true, env = "NOTECRAFT_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// PDF user password for encrypted documents.
    #[arg(long, global = true, env = "NOTECRAFT_PASSWORD")]
    password: Option<String>,

    /// Tesseract language code(s) for scanned pages, e.g. eng or eng+deu.
    #[arg(long, global = true, env = "NOTECRAFT_OCR_LANG", default_value = "eng")]
    ocr_lang: String,

    /// Path to the tesseract binary.
    #[arg(long, global = true, env = "NOTECRAFT_TESSERACT", default_value = "tesseract")]
    tesseract: PathBuf,

    /// Inline resolved images as base64 data URIs.
    #[arg(long, global = true, env = "NOTECRAFT_EMBED_IMAGES")]
    embed_images: bool,

    /// Image search retries when rate-limited.
    #[arg(long, global = true, env = "NOTECRAFT_SEARCH_RETRIES", default_value_t = 4)]
    search_retries: u32,

    /// Disable the progress spinner.
    #[arg(long, global = true, env = "NOTECRAFT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "NOTECRAFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "NOTECRAFT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the page (or slide) count. No API key needed.
    Pages { input: String },

    /// Print the extracted text of the selected pages. No API key needed.
    Extract {
        input: String,
        /// Output pages with provenance as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate a Markdown note.
    Note {
        input: String,
        /// Target length in words, e.g. 300-500.
        #[arg(long, default_value = "300-600", value_parser = parse_count)]
        words: CountRange,
        /// Ask for image placeholders and resolve them.
        #[arg(long)]
        images: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate tab-separated flashcards.
    Flashcards {
        input: String,
        #[arg(long, value_enum, default_value = "question-answer")]
        style: StyleArg,
        /// Number of cards, e.g. 10-20.
        #[arg(long, default_value = "10-20", value_parser = parse_count)]
        count: CountRange,
        /// Output records and rejected rows as JSON.
        #[arg(long)]
        json: bool,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate a one-page cheatsheet.
    Cheatsheet {
        input: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate note and flashcards and package them with the source.
    Kit {
        input: String,
        #[arg(long, default_value = "300-600", value_parser = parse_count)]
        words: CountRange,
        #[arg(long)]
        images: bool,
        #[arg(long, value_enum, default_value = "question-answer")]
        style: StyleArg,
        #[arg(long, default_value = "10-20", value_parser = parse_count)]
        count: CountRange,
        /// Bundle path (default: <input stem>.kit).
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Split a study kit into note.md, flashcards.tsv and the source file.
    Unpack {
        bundle: PathBuf,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
    },

    /// Answer questions about a document. Without a question, reads them from stdin.
    Ask {
        input: String,
        question: Option<String>,
    },

    /// Rewrite a Markdown note following an instruction.
    EditNote {
        /// Existing .md note.
        input: String,
        instruction: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rewrite a tab-separated flashcard file following an instruction.
    EditFlashcards {
        /// Existing .tsv or .csv flashcard file.
        input: String,
        instruction: String,
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum StyleArg {
    TermDefinition,
    QuestionAnswer,
    MultipleChoice,
}

impl From<StyleArg> for TaskKind {
    fn from(v: StyleArg) -> Self {
        match v {
            StyleArg::TermDefinition => TaskKind::FlashcardsTermDefinition,
            StyleArg::QuestionAnswer => TaskKind::FlashcardsQuestionAnswer,
            StyleArg::MultipleChoice => TaskKind::FlashcardsMultipleChoice,
        }
    }
}

fn parse_pages(s: &str) -> Result<PageRange, String> {
    s.parse().map_err(|e: notecraft::NoteCraftError| e.to_string())
}

fn parse_count(s: &str) -> Result<CountRange, String> {
    s.parse().map_err(|e: notecraft::NoteCraftError| e.to_string())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let g = &cli.global;

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner gives all the feedback that matters; keep INFO logs off
    // while it is drawing unless -v asks for them.
    let generates = !matches!(
        cli.command,
        Command::Pages { .. } | Command::Extract { .. } | Command::Unpack { .. }
    );
    // One spinner per process; a conversation reports through its own prompt.
    let conversing = matches!(cli.command, Command::Ask { question: None, .. });
    let show_progress = generates && !conversing && !g.quiet && !g.no_progress;
    let filter = if g.verbose {
        "debug"
    } else if g.quiet || show_progress {
        "error"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(io::stderr)
        .init();

    let progress: Option<ProgressCallback> = if show_progress {
        Some(CliProgressCallback::new() as Arc<dyn PipelineProgressCallback>)
    } else {
        None
    };
    let config = build_config(g, progress)?;

    match cli.command {
        // ── Provider-free queries ────────────────────────────────────────
        Command::Pages { input } => {
            let doc = resolve_input(&input, config.download_timeout_secs).await?;
            let count = extract::page_count(&doc, &config)
                .await
                .context("Failed to count pages")?;
            println!("{count}");
        }
        Command::Extract { input, json } => {
            let doc = resolve_input(&input, config.download_timeout_secs).await?;
            let ocr = Arc::new(TesseractOcr::new(&config.tesseract_binary, &config.ocr_language));
            let extracted = extract::extract(&doc, &config, ocr)
                .await
                .context("Extraction failed")?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&extracted).context("Failed to serialise pages")?
                );
            } else {
                write_output(None, &extracted.text())?;
            }
            if !g.quiet {
                eprintln!(
                    "{} {} pages, {} words, {} via OCR",
                    green("✔"),
                    extracted.pages.len(),
                    extracted.word_count(),
                    extracted.ocr_pages()
                );
            }
        }

        // ── Generation ───────────────────────────────────────────────────
        Command::Note {
            input,
            words,
            images,
            output,
        } => {
            let mut session = open(&input, config).await?;
            let note = session.generate_note(words, images).await?;
            write_output(output.as_deref(), note)?;
        }
        Command::Flashcards {
            input,
            style,
            count,
            json,
            output,
        } => {
            let mut session = open(&input, config).await?;
            let set = session.generate_flashcards(style.into(), count).await?;
            if !set.rejected.is_empty() && !g.quiet {
                eprintln!("  {} {} malformed rows skipped", dim("·"), set.rejected.len());
            }
            if json {
                let text = serde_json::to_string_pretty(set).context("Failed to serialise flashcards")?;
                write_output(output.as_deref(), &text)?;
            } else {
                let text = session.flashcards_text().unwrap_or_default().to_string();
                write_output(output.as_deref(), &text)?;
            }
        }
        Command::Cheatsheet { input, output } => {
            let mut session = open(&input, config).await?;
            let sheet = session.generate_cheatsheet().await?;
            write_output(output.as_deref(), sheet)?;
        }

        // ── Packaging ────────────────────────────────────────────────────
        Command::Kit {
            input,
            words,
            images,
            style,
            count,
            output,
        } => {
            let path = output.unwrap_or_else(|| sibling_path(&input, ".kit"));
            let mut session = open(&input, config).await?;
            session.generate_note(words, images).await?;
            session.generate_flashcards(style.into(), count).await?;
            session
                .study_kit()?
                .save_to_file(&path)
                .await
                .context("Failed to save study kit")?;
            if !g.quiet {
                eprintln!("{} study kit → {}", green("✔"), bold(&path.display().to_string()));
            }
        }
        Command::Unpack { bundle, dir } => {
            let kit = StudyKit::load_from_file(&bundle)
                .await
                .with_context(|| format!("Failed to read {}", bundle.display()))?;
            unpack(&kit, &dir).await?;
            if !g.quiet {
                eprintln!(
                    "{} unpacked {} (pages {}) into {}",
                    green("✔"),
                    kit.source_name,
                    kit.pages,
                    bold(&dir.display().to_string())
                );
            }
        }

        // ── Questions ────────────────────────────────────────────────────
        Command::Ask { input, question } => {
            let mut session = open(&input, config).await?;
            match question {
                Some(question) => {
                    let answer = session.ask(&question).await?;
                    write_output(None, answer)?;
                }
                None => converse(&mut session).await?,
            }
        }

        // ── Edits ────────────────────────────────────────────────────────
        Command::EditNote {
            input,
            instruction,
            output,
        } => {
            let mut session = open(&input, config).await?;
            let note = session.edit_note(&instruction).await?;
            write_output(output.as_deref(), note)?;
        }
        Command::EditFlashcards {
            input,
            instruction,
            output,
        } => {
            let mut session = open(&input, config).await?;
            session.edit_flashcards(&instruction).await?;
            let text = session.flashcards_text().unwrap_or_default().to_string();
            write_output(output.as_deref(), &text)?;
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(g: &GlobalArgs, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .pages(g.pages)
        .map_reduce(g.map_reduce)
        .chunk_max_chars(g.chunk_size)
        .chunk_overlap_chars(g.chunk_overlap)
        .temperature(g.temperature)
        .max_tokens(g.max_tokens)
        .api_timeout_secs(g.api_timeout)
        .download_timeout_secs(g.download_timeout)
        .ocr_language(g.ocr_lang.clone())
        .tesseract_binary(g.tesseract.clone())
        .embed_images(g.embed_images)
        .search_max_retries(g.search_retries);

    if let Some(ref model) = g.model {
        builder = builder.model(model.clone());
    }
    if let Some(ref provider) = g.provider {
        builder = builder.provider_name(provider.clone());
    }
    if let Some(ref password) = g.password {
        builder = builder.password(password.clone());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

async fn open(input: &str, config: PipelineConfig) -> Result<StudySession> {
    StudySession::open(input, config)
        .await
        .with_context(|| format!("Failed to open {input}"))
}

/// Answer questions read from stdin until EOF or `exit`.
async fn converse(session: &mut StudySession) -> Result<()> {
    eprintln!("{}", dim("Ask about the document. Ctrl-D or 'exit' to stop."));
    let stdin = io::stdin();
    loop {
        eprint!("{} ", bold("?"));
        io::stderr().flush().ok();

        let mut line = String::new();
        if stdin.read_line(&mut line).context("Failed to read stdin")? == 0 {
            break;
        }
        let question = line.trim();
        if question.is_empty() {
            continue;
        }
        if question.eq_ignore_ascii_case("exit") || question.eq_ignore_ascii_case("quit") {
            break;
        }
        match session.ask(question).await {
            Ok(answer) => write_output(None, answer)?,
            Err(e) => eprintln!("{} {}", red("✘"), red(&e.to_string())),
        }
    }
    Ok(())
}

/// Write to `path`, or stdout with a trailing newline.
fn write_output(path: Option<&Path>, text: &str) -> Result<()> {
    match path {
        Some(p) => std::fs::write(p, text).with_context(|| format!("Failed to write {}", p.display())),
        None => {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle
                .write_all(text.as_bytes())
                .context("Failed to write to stdout")?;
            if !text.ends_with('\n') {
                handle.write_all(b"\n").ok();
            }
            Ok(())
        }
    }
}

async fn unpack(kit: &StudyKit, dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let source_name = Path::new(&kit.source_name)
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "source".into());
    for (name, bytes) in [
        (PathBuf::from("note.md"), kit.note.as_bytes()),
        (PathBuf::from("flashcards.tsv"), kit.flashcards.as_bytes()),
        (PathBuf::from(source_name), kit.source_bytes.as_slice()),
    ] {
        let path = dir.join(name);
        tokio::fs::write(&path, bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    Ok(())
}
