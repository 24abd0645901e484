//! Post-processing: deterministic cleanup of generated notes and flashcards.
//!
//! ## Why is post-processing necessary?
//!
//! Even well-prompted models introduce artefacts that are harmless to a
//! reader but break the next consumer:
//!
//! - wrapping the reply in ` ```markdown ` or ` ```csv ` fences despite being
//!   told not to
//! - prefixing flashcards with a `Question<TAB>Answer` header row
//! - doubling the tab separator, which shifts the answer into a third column
//! - Windows line endings and zero-width characters
//!
//! Each rule is a pure `&str → String` function; notes and flashcards each
//! run their own ordered rule list. Flashcard cleaning repeats its list until
//! the text stops changing, which makes `clean_flashcards` idempotent even
//! when one rule exposes work for an earlier one (a collapsed separator can
//! turn a row into a header).

use crate::error::NoteCraftError;
use crate::output::{FlashcardRecord, FlashcardSet, RejectedRow};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

type Rule = fn(&str) -> String;

/// Rules for Markdown notes and cheatsheets, in order.
const NOTE_RULES: &[Rule] = &[
    strip_outer_fence,
    normalise_line_endings,
    remove_invisible_chars,
    remove_hallucinated_images,
    trim_trailing_whitespace,
    collapse_blank_lines,
    ensure_final_newline,
];

/// Rules for tab-separated flashcard text, in order.
const FLASHCARD_RULES: &[Rule] = &[
    strip_outer_fence,
    normalise_line_endings,
    remove_invisible_chars,
    drop_blank_lines,
    drop_header_rows,
    collapse_separators,
];

fn apply(rules: &[Rule], input: &str) -> String {
    rules.iter().fold(input.to_string(), |s, rule| rule(&s))
}

/// Whitespace-only rules, safe on notes whose images are already resolved.
const LAYOUT_RULES: &[Rule] = &[trim_trailing_whitespace, collapse_blank_lines, ensure_final_newline];

/// Clean a generated note or cheatsheet.
pub fn clean_note(input: &str) -> String {
    apply(NOTE_RULES, input)
}

/// Re-tidy a note after placeholder resolution removed or replaced lines.
pub fn tidy_layout(input: &str) -> String {
    apply(LAYOUT_RULES, input)
}

/// Clean generated flashcard text. `clean_flashcards(clean_flashcards(x)) == clean_flashcards(x)`.
pub fn clean_flashcards(input: &str) -> String {
    let mut current = input.to_string();
    loop {
        let next = apply(FLASHCARD_RULES, &current);
        if next == current {
            return next;
        }
        current = next;
    }
}

// ── Rule: strip an outer code fence ──────────────────────────────────────────
//
// Only the first and last non-blank lines are candidates. A trailing bare
// fence is removed only when it has no partner, so a fenced code block at
// the end of a note keeps its closing fence.

static RE_FENCE_OPEN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*```\s*(?:markdown|md|csv|tsv|text|plaintext)?\s*$").unwrap());

static RE_FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*```\s*$").unwrap());

static RE_FENCE_ANY: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*```").unwrap());

fn strip_outer_fence(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let Some(first) = lines.iter().position(|l| !l.trim().is_empty()) else {
        return input.to_string();
    };
    let opened = RE_FENCE_OPEN.is_match(lines[first]);
    let mut body = if opened { &lines[first + 1..] } else { &lines[..] };

    let fences = body.iter().filter(|l| RE_FENCE_ANY.is_match(l)).count();
    let mut closed = false;
    if fences % 2 == 1 {
        if let Some(last) = body.iter().rposition(|l| !l.trim().is_empty()) {
            if RE_FENCE_CLOSE.is_match(body[last]) {
                body = &body[..last];
                closed = true;
            }
        }
    }

    if opened || closed {
        body.join("\n")
    } else {
        input.to_string()
    }
}

fn normalise_line_endings(input: &str) -> String {
    input.replace("\r\n", "\n").replace('\r', "\n")
}

fn remove_invisible_chars(input: &str) -> String {
    input.replace(
        [
            '\u{200B}', '\u{FEFF}', '\u{00AD}', '\u{200C}', '\u{200D}', '\u{2060}',
        ],
        "",
    )
}

fn trim_trailing_whitespace(input: &str) -> String {
    input.lines().map(str::trim_end).collect::<Vec<_>>().join("\n")
}

static RE_BLANK_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").unwrap());

/// At most one blank line between blocks.
fn collapse_blank_lines(input: &str) -> String {
    RE_BLANK_RUN.replace_all(input, "\n\n").into_owned()
}

fn ensure_final_newline(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("{trimmed}\n")
    }
}

// ── Rule: hallucinated image links ───────────────────────────────────────────
//
// Models sometimes write `![figure](chart.png)` instead of a placeholder.
// Links that are not absolute http(s) URLs become italic captions so the
// description survives. Runs before placeholder resolution, so resolved
// `data:` URIs never reach it.

static RE_IMAGE_LINK: Lazy<Regex> = Lazy::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]*)\)").unwrap());

fn remove_hallucinated_images(input: &str) -> String {
    RE_IMAGE_LINK
        .replace_all(input, |caps: &regex::Captures<'_>| {
            let url = caps[2].trim();
            if url.starts_with("http://") || url.starts_with("https://") {
                caps[0].to_string()
            } else {
                match caps[1].trim() {
                    "" => String::new(),
                    alt => format!("*{alt}*"),
                }
            }
        })
        .into_owned()
}

// ── Flashcard rules ──────────────────────────────────────────────────────────

fn drop_blank_lines(input: &str) -> String {
    input
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

const PRIMARY_HEADERS: [&str; 4] = ["question", "questions", "term", "terms"];
const SECONDARY_HEADERS: [&str; 4] = ["answer", "answers", "definition", "definitions"];

/// A row whose first two fields are header words, case-insensitively.
fn is_header_row(line: &str) -> bool {
    let mut fields = line.split('\t').map(|f| {
        f.trim()
            .trim_matches(|c| c == '"' || c == '*')
            .to_lowercase()
    });
    match (fields.next(), fields.next()) {
        (Some(a), Some(b)) => {
            PRIMARY_HEADERS.contains(&a.as_str()) && SECONDARY_HEADERS.contains(&b.as_str())
        }
        _ => false,
    }
}

fn drop_header_rows(input: &str) -> String {
    let lines: Vec<&str> = input.lines().collect();
    let skip = lines.iter().take_while(|l| is_header_row(l)).count();
    if skip > 0 {
        debug!("Dropped {} flashcard header row(s)", skip);
    }
    lines[skip..].join("\n")
}

static RE_SEPARATOR_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\t{2,}").unwrap());

fn collapse_separators(input: &str) -> String {
    RE_SEPARATOR_RUN.replace_all(input, "\t").into_owned()
}

// ── Parsing ──────────────────────────────────────────────────────────────────

/// Parse cleaned flashcard text into records.
///
/// Rows with fewer than two non-empty fields are kept in
/// [`FlashcardSet::rejected`] for diagnostics. Fields beyond the second are
/// appended to the answer.
pub fn parse_flashcards(cleaned: &str) -> Result<FlashcardSet, NoteCraftError> {
    let mut set = FlashcardSet::default();
    let mut rows = 0usize;

    for (i, line) in cleaned.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        rows += 1;
        let fields: Vec<&str> = line
            .split('\t')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .collect();
        if fields.len() < 2 {
            set.rejected.push(RejectedRow {
                line: i + 1,
                raw: line.to_string(),
            });
            continue;
        }
        set.records.push(FlashcardRecord {
            primary: fields[0].to_string(),
            secondary: fields[1..].join(" "),
        });
    }

    if rows == 0 {
        return Err(NoteCraftError::NoRecordsGenerated);
    }
    if set.records.is_empty() {
        return Err(NoteCraftError::MalformedOutput {
            rejected: set.rejected.len(),
        });
    }
    debug!(
        "Parsed {} flashcards ({} rows rejected)",
        set.records.len(),
        set.rejected.len()
    );
    Ok(set)
}

/// Serialise records back to one `primary<TAB>secondary` line each.
pub fn format_flashcards(set: &FlashcardSet) -> String {
    set.records
        .iter()
        .map(|r| format!("{}\t{}", r.primary, r.secondary))
        .collect::<Vec<_>>()
        .join("\n")
}

// ── Tests ────────────────────────────────────────────────────────────────────
