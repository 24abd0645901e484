//! Passage selection for question answering.
//!
//! A question is answered from a handful of passages, not the whole
//! document. Passages are scored by how many distinct question words they
//! contain (case-insensitive substring match, no stemming); the best ones
//! are returned in document order so the excerpt reads the way the source
//! does. When no passage shares a word with the question, the opening
//! passages are used instead.

use crate::output::Chunk;
use tracing::debug;

/// Words too common to say anything about relevance.
const STOPWORDS: &[&str] = &[
    "the", "and", "are", "was", "were", "what", "which", "who", "whom", "why", "how", "when", "where",
    "does", "did", "for", "with", "this", "that", "these", "those", "from", "about", "into", "can",
    "you", "your", "explain", "tell", "describe",
];

/// Lower-cased question words worth matching, without duplicates.
pub fn query_terms(question: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for token in question.split(|c: char| !c.is_alphanumeric()) {
        let token = token.to_lowercase();
        if token.chars().count() < 3 || STOPWORDS.contains(&token.as_str()) {
            continue;
        }
        if !terms.contains(&token) {
            terms.push(token);
        }
    }
    terms
}

/// The `top_k` passages most relevant to `question`, in document order.
pub fn best_chunks<'a>(chunks: &'a [Chunk], question: &str, top_k: usize) -> Vec<&'a Chunk> {
    let top_k = top_k.max(1);
    let terms = query_terms(question);

    let mut scored: Vec<(usize, &Chunk)> = chunks
        .iter()
        .map(|chunk| {
            let haystack = chunk.text.to_lowercase();
            let score = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
            (score, chunk)
        })
        .filter(|(score, _)| *score > 0)
        .collect();

    let mut picked: Vec<&Chunk> = if scored.is_empty() {
        debug!("No passage matches {:?}; using the opening passages", terms);
        chunks.iter().take(top_k).collect()
    } else {
        scored.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.start.cmp(&b.1.start)));
        scored.truncate(top_k);
        scored.into_iter().map(|(_, chunk)| chunk).collect()
    };
    picked.sort_by_key(|chunk| chunk.start);
    picked
}
