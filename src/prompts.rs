//! Prompt templates, one per generation task.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth**: changing what a task asks for means
//!    editing exactly one template.
//!
//! 2. **Testability**: unit tests can render and inspect prompts directly
//!    without a provider, so prompt regressions are easy to catch.
//!
//! Structural requirements on the output (row-count range, two tab-separated
//! columns, the image placeholder syntax) are stated here in natural
//! language only. Nothing checks them at generation time; the flashcard
//! cleaner and the image resolver deal with whatever comes back.

use crate::config::CountRange;
use crate::error::NoteCraftError;
use crate::output::ChatTurn;
use std::fmt;
use std::str::FromStr;

/// Opening token of an inline image placeholder.
pub const IMAGE_PLACEHOLDER_OPEN: &str = "!!!IMG";
/// Closing token of an inline image placeholder.
pub const IMAGE_PLACEHOLDER_CLOSE: &str = "!!!";

/// Every generation task the dispatcher knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    Note,
    NoteWithImages,
    EditNote,
    FlashcardsTermDefinition,
    FlashcardsQuestionAnswer,
    FlashcardsMultipleChoice,
    EditFlashcards,
    Cheatsheet,
    Ask,
    PageSummary,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::Note,
        TaskKind::NoteWithImages,
        TaskKind::EditNote,
        TaskKind::FlashcardsTermDefinition,
        TaskKind::FlashcardsQuestionAnswer,
        TaskKind::FlashcardsMultipleChoice,
        TaskKind::EditFlashcards,
        TaskKind::Cheatsheet,
        TaskKind::Ask,
        TaskKind::PageSummary,
    ];

    /// Stable label used on the command line and in logs.
    pub fn label(&self) -> &'static str {
        match self {
            TaskKind::Note => "note",
            TaskKind::NoteWithImages => "note-with-images",
            TaskKind::EditNote => "edit-note",
            TaskKind::FlashcardsTermDefinition => "flashcards-term-definition",
            TaskKind::FlashcardsQuestionAnswer => "flashcards-question-answer",
            TaskKind::FlashcardsMultipleChoice => "flashcards-multiple-choice",
            TaskKind::EditFlashcards => "edit-flashcards",
            TaskKind::Cheatsheet => "cheatsheet",
            TaskKind::Ask => "ask",
            TaskKind::PageSummary => "page-summary",
        }
    }

    /// Whether the task's output is tab-separated flashcard text.
    pub fn is_tabular(&self) -> bool {
        matches!(
            self,
            TaskKind::FlashcardsTermDefinition
                | TaskKind::FlashcardsQuestionAnswer
                | TaskKind::FlashcardsMultipleChoice
                | TaskKind::EditFlashcards
        )
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for TaskKind {
    type Err = NoteCraftError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace('_', "-");
        TaskKind::ALL
            .into_iter()
            .find(|k| k.label() == wanted)
            .ok_or_else(|| NoteCraftError::UnsupportedTask(s.to_string()))
    }
}

/// Numeric and free-text parameters a template may reference.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskParams {
    /// Target length of a note or summary.
    pub word_range: Option<CountRange>,
    /// Target number of flashcards.
    pub record_range: Option<CountRange>,
    /// User's edit request, or the question for [`TaskKind::Ask`].
    pub instruction: Option<String>,
}

/// A rendered system + user message pair, after any earlier turns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    /// Earlier exchanges, sent between the system and user messages.
    pub history: Vec<ChatTurn>,
    pub user: String,
}

const DEFAULT_WORD_RANGE: CountRange = CountRange { min: 300, max: 600 };
const DEFAULT_RECORD_RANGE: CountRange = CountRange { min: 10, max: 20 };

const NOTE: &str = "You are a student writing study notes from the transcript you are given. \
Organise it under section headers and capture every main idea as bullets, sub-bullets or tables. \
Leave out incidental details such as page numbers or the lecturer's name. \
You may add background that is not in the transcript when it helps the reader understand the subject. \
Keep it as clear and easy to follow as possible. \
Reply with Markdown only, without wrapping it in a code fence. \
Write {word_range} words.";

const EDIT_NOTE: &str = "You are editing the study note below. Apply the user's request and return \
the complete revised note as Markdown only, without a code fence. Keep any image placeholders of the \
form !!!IMG description!!! that should remain, and use the same form for new images.\n\n\
<note>\n{input}\n</note>";

const TERM_DEFINITION: &str = "You are creating flashcards that help a student learn the important \
terms, proper nouns and concepts in the text. Only cover material directly related to its main ideas \
and make each definition as detailed as it needs to be. \
Write one flashcard per line as two fields separated by a single tab character: term<TAB>definition. \
Produce {record_range} flashcards. Do not add a header row, numbering, commentary or a code fence.";

const QUESTION_ANSWER: &str = "You are writing a mock test that checks a student's understanding of \
the text. Only ask about its main ideas, and mix fill-in-the-blank, short-answer, essay and true-or-false \
questions. Write one question per line as two fields separated by a single tab character: \
question<TAB>answer. Produce {record_range} questions, no fewer and no more. \
Do not add a header row, numbering, commentary or a code fence.";

const MULTIPLE_CHOICE: &str = "You are writing multiple-choice questions that check a student's \
understanding of the text. Each question lists four options labelled A) to D) inside the question \
field. Write one question per line as two fields separated by a single tab character: \
question with options<TAB>correct option and a one-sentence explanation. \
Produce {record_range} questions. Do not add a header row, numbering, commentary or a code fence.";

const EDIT_FLASHCARDS: &str = "You are editing the flashcards below, one per line with a tab between \
the two fields. Apply the user's request and return the complete revised set in the same two-field, \
tab-separated form. Do not add a header row, commentary or a code fence.\n\n\
<flashcards>\n{input}\n</flashcards>";

const CHEATSHEET: &str = "You are condensing the study note you are given into a one-page cheatsheet. \
Keep only definitions, formulas, key facts and short examples, grouped under headers, as terse bullets \
or compact tables. Reply with Markdown only, without a code fence.";

const PAGE_SUMMARY: &str = "Compress the passage you are given into a dense summary. \
Keep every fact, name, number and definition it contains, in the original order. \
Do not introduce any information that is not in the passage. Reply with plain text only.";

const ASK: &str = "You are a teacher answering a student's questions about a document. \
Reply in Markdown and explain in plain terms, with examples where they help. \
Base every answer on the excerpts below and on the earlier conversation; \
if they do not contain the answer, say so instead of guessing.\n\n\
<context>\n{input}\n</context>";

const OVER_SUMMARIES: &str = "\n\nThe text you are given is a sequence of partial summaries of one \
document, in document order. Treat it as the whole document: keep that order and ignore repetition \
where consecutive summaries overlap.";

/// Render the prompt for a task.
///
/// Edit tasks and [`TaskKind::Ask`] carry their material (the artifact being
/// edited, or the retrieved excerpts) as `input` in the system message and
/// the instruction or question as the user turn; every other task sends
/// `input` as the user turn.
pub fn render(kind: TaskKind, params: &TaskParams, input: &str) -> Prompt {
    let word_range = params.word_range.unwrap_or(DEFAULT_WORD_RANGE).to_string();
    let record_range = params.record_range.unwrap_or(DEFAULT_RECORD_RANGE).to_string();
    let instruction = params.instruction.clone().unwrap_or_default();

    let template = match kind {
        TaskKind::Note => NOTE.to_string(),
        TaskKind::NoteWithImages => format!(
            "{NOTE}\n\nWhere a picture would help, insert a placeholder on its own line \
in exactly this form: {IMAGE_PLACEHOLDER_OPEN} short description of the image{IMAGE_PLACEHOLDER_CLOSE}"
        ),
        TaskKind::EditNote => EDIT_NOTE.to_string(),
        TaskKind::FlashcardsTermDefinition => TERM_DEFINITION.to_string(),
        TaskKind::FlashcardsQuestionAnswer => QUESTION_ANSWER.to_string(),
        TaskKind::FlashcardsMultipleChoice => MULTIPLE_CHOICE.to_string(),
        TaskKind::EditFlashcards => EDIT_FLASHCARDS.to_string(),
        TaskKind::Cheatsheet => CHEATSHEET.to_string(),
        TaskKind::Ask => ASK.to_string(),
        TaskKind::PageSummary => PAGE_SUMMARY.to_string(),
    };

    let system = template
        .replace("{word_range}", &word_range)
        .replace("{record_range}", &record_range);

    match kind {
        TaskKind::EditNote | TaskKind::EditFlashcards | TaskKind::Ask => Prompt {
            system: system.replace("{input}", input),
            user: instruction,
            ..Default::default()
        },
        _ => Prompt {
            system,
            user: input.to_string(),
            ..Default::default()
        },
    }
}

/// Render a task whose input is the ordered per-chunk summaries of a
/// document rather than its text.
///
/// This is the combine step of map-reduce: the task's own template, with its
/// length and count targets, plus a note on how the input is laid out.
pub fn render_over_summaries(kind: TaskKind, params: &TaskParams, summaries: &str) -> Prompt {
    let mut prompt = render(kind, params, summaries);
    prompt.system.push_str(OVER_SUMMARIES);
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_round_trip() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.label().parse::<TaskKind>().unwrap(), kind);
        }
        assert_eq!("Edit_Note".parse::<TaskKind>().unwrap(), TaskKind::EditNote);
    }

    #[test]
    fn unknown_label_is_unsupported() {
        let err = "translate".parse::<TaskKind>().unwrap_err();
        assert!(matches!(err, NoteCraftError::UnsupportedTask(ref s) if s == "translate"));
    }

    #[test]
    fn ranges_are_substituted() {
        let params = TaskParams {
            record_range: Some(CountRange::new(5, 8)),
            ..Default::default()
        };
        let p = render(TaskKind::FlashcardsQuestionAnswer, &params, "cells");
        assert!(p.system.contains("Produce 5 to 8 questions"));
        assert_eq!(p.user, "cells");
        assert!(!p.system.contains('{'));
    }

    #[test]
    fn only_image_note_mentions_placeholders() {
        let params = TaskParams::default();
        assert!(render(TaskKind::NoteWithImages, &params, "x").system.contains("!!!IMG"));
        assert!(!render(TaskKind::Note, &params, "x").system.contains("!!!IMG"));
    }

    #[test]
    fn edit_tasks_embed_artifact_and_send_instruction() {
        let params = TaskParams {
            instruction: Some("add a table".into()),
            ..Default::default()
        };
        let p = render(TaskKind::EditNote, &params, "# Mitosis");
        assert!(p.system.contains("<note>\n# Mitosis\n</note>"));
        assert_eq!(p.user, "add a table");
    }

    #[test]
    fn ask_puts_excerpts_in_system_and_question_in_user() {
        let params = TaskParams {
            instruction: Some("What is osmosis?".into()),
            ..Default::default()
        };
        let p = render(TaskKind::Ask, &params, "Osmosis moves water.");
        assert!(p.system.contains("<context>\nOsmosis moves water.\n</context>"));
        assert_eq!(p.user, "What is osmosis?");
        assert!(p.history.is_empty());
    }

    #[test]
    fn summaries_keep_the_task_targets() {
        let params = TaskParams {
            record_range: Some(CountRange::new(4, 6)),
            ..Default::default()
        };
        let p = render_over_summaries(TaskKind::FlashcardsTermDefinition, &params, "s0\n\ns1");
        assert!(p.system.contains("Produce 4 to 6 flashcards"));
        assert!(p.system.contains("partial summaries"));
        assert_eq!(p.user, "s0\n\ns1");
    }

    #[test]
    fn no_template_leaves_unfilled_slots() {
        let params = TaskParams::default();
        for kind in TaskKind::ALL {
            let p = render(kind, &params, "body");
            assert!(!p.system.contains("{word_range}"), "{kind}");
            assert!(!p.system.contains("{record_range}"), "{kind}");
            assert!(!p.system.contains("{input}"), "{kind}");
        }
    }
}
