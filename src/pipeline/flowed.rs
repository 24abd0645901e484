//! Flowed documents (`.docx`): no page concept, the whole body is one unit.

use crate::document::Document;
use crate::error::NoteCraftError;
use docx_rs::{DocumentChild, ParagraphChild, RunChild, TableCellContent, TableChild, TableRowChild};
use tracing::debug;

/// Body text of a docx document: one line per paragraph, table cells
/// separated by tabs with one line per row.
pub fn document_text(doc: &Document) -> Result<String, NoteCraftError> {
    let docx = docx_rs::read_docx(&doc.bytes).map_err(|e| NoteCraftError::DocumentRead {
        name: doc.name.clone(),
        detail: format!("not a valid docx: {e}"),
    })?;

    let mut out = String::new();
    for child in &docx.document.children {
        match child {
            DocumentChild::Paragraph(para) => {
                paragraph_text(&para.children, &mut out);
                out.push('\n');
            }
            DocumentChild::Table(table) => {
                for row in &table.rows {
                    let TableChild::TableRow(tr) = row;
                    let cells: Vec<String> = tr
                        .cells
                        .iter()
                        .map(|cell| {
                            let TableRowChild::TableCell(tc) = cell;
                            let mut text = String::new();
                            for content in &tc.children {
                                if let TableCellContent::Paragraph(para) = content {
                                    paragraph_text(&para.children, &mut text);
                                }
                            }
                            text
                        })
                        .collect();
                    out.push_str(&cells.join("\t"));
                    out.push('\n');
                }
            }
            _ => {}
        }
    }

    let text = out.trim_end().to_string();
    debug!("{}: {} chars of body text", doc.name, text.len());
    Ok(text)
}

fn paragraph_text(children: &[ParagraphChild], out: &mut String) {
    for child in children {
        match child {
            ParagraphChild::Run(run) => {
                for run_child in &run.children {
                    if let RunChild::Text(text) = run_child {
                        out.push_str(&text.text);
                    }
                }
            }
            ParagraphChild::Hyperlink(link) => paragraph_text(&link.children, out),
            _ => {}
        }
    }
}
