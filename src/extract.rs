//! Multi-format text extraction into labeled [`TextUnit`]s.
//!
//! Converts an uploaded file's bytes into an ordered sequence of text units,
//! each carrying a locator the frontend can highlight against:
//!
//! - **PDF** — one unit per non-blank page, `Page(n)`.
//! - **DOCX** — paragraph texts grouped ten at a time into sections,
//!   `Section(n)`; empty paragraphs skipped.
//! - **TXT** — fixed 15-line windows, `Lines(start, end)` inclusive.
//!
//! No OCR and no table extraction: scanned PDFs yield few or empty units,
//! which is a degraded-but-successful extraction, not an error.

use std::io::Read;

use crate::models::{FileType, Locator, TextUnit};

/// Non-empty paragraphs per DOCX section.
const DOCX_PARAGRAPHS_PER_SECTION: usize = 10;
/// Lines per TXT unit.
const TXT_LINES_PER_UNIT: usize = 15;
/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

/// Extraction failure. Unsupported formats are rejected before any parsing;
/// everything else that goes wrong inside a declared-valid format is `Corrupt`.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedFormat(String),
    Corrupt(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedFormat(ext) => {
                write!(f, "unsupported file format: {}", ext)
            }
            ExtractError::Corrupt(e) => write!(f, "file could not be parsed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts labeled text units from raw file bytes.
///
/// Every returned unit's locator variant matches the declared file type.
/// Returns an empty vector for files whose content is entirely blank.
pub fn extract_units(bytes: &[u8], file_type: FileType) -> Result<Vec<TextUnit>, ExtractError> {
    match file_type {
        FileType::Pdf => extract_pdf(bytes),
        FileType::Docx => extract_docx(bytes),
        FileType::Txt => extract_txt(bytes),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Corrupt(format!("PDF: {}", e)))?;

    let mut units = Vec::new();
    for (i, page) in pages.iter().enumerate() {
        let trimmed = page.trim();
        if trimmed.is_empty() {
            continue;
        }
        units.push(TextUnit {
            locator: Locator::Page(i as u32 + 1),
            text: trimmed.to_string(),
        });
    }
    Ok(units)
}

fn extract_docx(bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
        .map_err(|e| ExtractError::Corrupt(format!("DOCX: {}", e)))?;

    let mut doc_xml = Vec::new();
    {
        let entry = archive
            .by_name("word/document.xml")
            .map_err(|_| ExtractError::Corrupt("word/document.xml not found".to_string()))?;
        entry
            .take(MAX_XML_ENTRY_BYTES)
            .read_to_end(&mut doc_xml)
            .map_err(|e| ExtractError::Corrupt(format!("DOCX: {}", e)))?;
        if doc_xml.len() as u64 >= MAX_XML_ENTRY_BYTES {
            return Err(ExtractError::Corrupt(
                "word/document.xml exceeds size limit".to_string(),
            ));
        }
    }

    let paragraphs = docx_paragraphs(&doc_xml)?;

    let units = paragraphs
        .chunks(DOCX_PARAGRAPHS_PER_SECTION)
        .enumerate()
        .map(|(i, group)| TextUnit {
            locator: Locator::Section(i as u32 + 1),
            text: group.join("\n"),
        })
        .collect();
    Ok(units)
}

/// Walks `word/document.xml` collecting the text of each `<w:p>` paragraph
/// (its `<w:t>` runs joined). Empty paragraphs are dropped.
fn docx_paragraphs(xml: &[u8]) -> Result<Vec<String>, ExtractError> {
    let mut reader = quick_xml::Reader::from_reader(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut paragraphs = Vec::new();
    let mut current = String::new();
    let mut in_paragraph = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(quick_xml::events::Event::Start(e)) => {
                let is_p = e.local_name().as_ref() == b"p";
                let is_t = e.local_name().as_ref() == b"t";
                if is_p {
                    in_paragraph = true;
                    current.clear();
                } else if is_t && in_paragraph {
                    if let Ok(quick_xml::events::Event::Text(te)) = reader.read_event_into(&mut buf)
                    {
                        current.push_str(te.unescape().unwrap_or_default().as_ref());
                    }
                }
            }
            Ok(quick_xml::events::Event::End(e)) => {
                if e.local_name().as_ref() == b"p" && in_paragraph {
                    in_paragraph = false;
                    let trimmed = current.trim();
                    if !trimmed.is_empty() {
                        paragraphs.push(trimmed.to_string());
                    }
                }
            }
            Ok(quick_xml::events::Event::Eof) => break,
            Err(e) => return Err(ExtractError::Corrupt(format!("DOCX XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }
    Ok(paragraphs)
}

fn extract_txt(bytes: &[u8]) -> Result<Vec<TextUnit>, ExtractError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|_| ExtractError::Corrupt("text file is not valid UTF-8".to_string()))?;

    let lines: Vec<&str> = text.split('\n').collect();
    let mut units = Vec::new();
    for (i, window) in lines.chunks(TXT_LINES_PER_UNIT).enumerate() {
        let joined = window.join("\n");
        let trimmed = joined.trim();
        if trimmed.is_empty() {
            continue;
        }
        let start = (i * TXT_LINES_PER_UNIT + 1) as u32;
        let end = (i * TXT_LINES_PER_UNIT + window.len()) as u32;
        units.push(TextUnit {
            locator: Locator::Lines(start, end),
            text: trimmed.to_string(),
        });
    }
    Ok(units)
}
