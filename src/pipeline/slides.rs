//! Slide decks (`.pptx`): one unit of text per slide.
//!
//! A pptx file is a zip archive with one XML part per slide under
//! `ppt/slides/slideN.xml`. Slide order is the numeric `N`, not archive
//! order. Within a slide, each shape (`<p:sp>`) contributes its text runs
//! (`<a:t>`), one line per paragraph.

use crate::document::Document;
use crate::error::NoteCraftError;
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

static RE_SLIDE_PART: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^ppt/slides/slide(\d+)\.xml$").unwrap());

static RE_SHAPE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<p:sp\b.*?</p:sp>").unwrap());

static RE_TEXT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<a:t(?:\s[^>]*)?>(.*?)</a:t>").unwrap());

static RE_ENTITY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"&(amp|lt|gt|quot|apos|#\d+|#x[0-9A-Fa-f]+);").unwrap());

fn read_error(doc: &Document, detail: impl Into<String>) -> NoteCraftError {
    NoteCraftError::DocumentRead {
        name: doc.name.clone(),
        detail: detail.into(),
    }
}

/// Slide part names sorted by slide number.
fn slide_parts(archive: &ZipArchive<Cursor<&[u8]>>) -> Vec<(u32, String)> {
    let mut parts: Vec<(u32, String)> = archive
        .file_names()
        .filter_map(|name| {
            let n = RE_SLIDE_PART.captures(name)?.get(1)?.as_str().parse().ok()?;
            Some((n, name.to_string()))
        })
        .collect();
    parts.sort_by_key(|(n, _)| *n);
    parts
}

fn open(doc: &Document) -> Result<ZipArchive<Cursor<&[u8]>>, NoteCraftError> {
    ZipArchive::new(Cursor::new(doc.bytes.as_slice()))
        .map_err(|e| read_error(doc, format!("not a valid slide deck: {e}")))
}

/// Number of slides.
pub fn slide_count(doc: &Document) -> Result<usize, NoteCraftError> {
    let archive = open(doc)?;
    Ok(slide_parts(&archive).len())
}

/// Text of every slide, in slide order.
pub fn slide_texts(doc: &Document) -> Result<Vec<String>, NoteCraftError> {
    let mut archive = open(doc)?;
    let parts = slide_parts(&archive);
    if parts.is_empty() {
        return Err(read_error(doc, "the archive contains no slides"));
    }

    let mut slides = Vec::with_capacity(parts.len());
    for (n, name) in parts {
        let mut xml = String::new();
        archive
            .by_name(&name)
            .map_err(|e| read_error(doc, format!("slide {n}: {e}")))?
            .read_to_string(&mut xml)
            .map_err(|e| read_error(doc, format!("slide {n}: {e}")))?;
        let text = slide_xml_text(&xml);
        debug!("Slide {}: {} chars", n, text.len());
        slides.push(text);
    }
    Ok(slides)
}

/// Concatenate the text of each shape in one slide's XML.
pub fn slide_xml_text(xml: &str) -> String {
    RE_SHAPE
        .find_iter(xml)
        .filter_map(|shape| {
            let paragraphs: Vec<String> = shape
                .as_str()
                .split("</a:p>")
                .map(|para| {
                    RE_TEXT_RUN
                        .captures_iter(para)
                        .filter_map(|c| c.get(1))
                        .map(|m| unescape_xml(m.as_str()))
                        .collect::<String>()
                })
                .filter(|p| !p.trim().is_empty())
                .collect();
            (!paragraphs.is_empty()).then(|| paragraphs.join("\n"))
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn unescape_xml(s: &str) -> String {
    RE_ENTITY
        .replace_all(s, |caps: &regex::Captures| {
            let entity = &caps[1];
            match entity {
                "amp" => "&".to_string(),
                "lt" => "<".to_string(),
                "gt" => ">".to_string(),
                "quot" => "\"".to_string(),
                "apos" => "'".to_string(),
                _ => {
                    let code = match entity.strip_prefix("#x") {
                        Some(hex) => u32::from_str_radix(hex, 16).ok(),
                        None => entity[1..].parse::<u32>().ok(),
                    };
                    code.and_then(char::from_u32)
                        .map(String::from)
                        .unwrap_or_else(|| caps[0].to_string())
                }
            }
        })
        .into_owned()
}
