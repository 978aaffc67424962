//! Core data types used throughout askdoc.
//!
//! These types represent the documents, text units, chunks, and answer
//! artifacts that flow through the extraction and question-answering pipeline.
//! The JSON shapes match what the frontend renders and highlights against:
//! locators serialize as `{"page": 3}`, `{"section": 2}`, or
//! `{"lines": "1-15"}`.

use serde::{Deserialize, Serialize};

/// Supported upload formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Docx,
    Txt,
}

impl FileType {
    /// Infer the file type from a filename extension. Returns `None` for
    /// anything other than `.pdf`, `.docx`, or `.txt` (case-insensitive).
    pub fn from_filename(name: &str) -> Option<Self> {
        let (_, ext) = name.rsplit_once('.')?;
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(FileType::Pdf),
            "docx" => Some(FileType::Docx),
            "txt" => Some(FileType::Txt),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Pdf => "pdf",
            FileType::Docx => "docx",
            FileType::Txt => "txt",
        }
    }
}

/// Position of a text unit within its source document.
///
/// Exactly one variant applies per unit, matching the source format:
/// PDF pages, DOCX sections (paragraph groupings), or TXT line ranges.
/// All indices are 1-based; line ranges are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "LocatorRepr", try_from = "LocatorRepr")]
pub enum Locator {
    Page(u32),
    Section(u32),
    Lines(u32, u32),
}

impl std::fmt::Display for Locator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Locator::Page(n) => write!(f, "Page {}", n),
            Locator::Section(n) => write!(f, "Section {}", n),
            Locator::Lines(start, end) => write!(f, "Lines {}-{}", start, end),
        }
    }
}

/// Wire form of [`Locator`]: one optional field per variant, with line
/// ranges flattened to a `"start-end"` string as the frontend expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct LocatorRepr {
    #[serde(skip_serializing_if = "Option::is_none")]
    page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    section: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    lines: Option<String>,
}

impl From<Locator> for LocatorRepr {
    fn from(loc: Locator) -> Self {
        let mut repr = LocatorRepr {
            page: None,
            section: None,
            lines: None,
        };
        match loc {
            Locator::Page(n) => repr.page = Some(n),
            Locator::Section(n) => repr.section = Some(n),
            Locator::Lines(start, end) => repr.lines = Some(format!("{}-{}", start, end)),
        }
        repr
    }
}

impl TryFrom<LocatorRepr> for Locator {
    type Error = String;

    fn try_from(repr: LocatorRepr) -> Result<Self, Self::Error> {
        match (repr.page, repr.section, repr.lines) {
            (Some(n), None, None) => Ok(Locator::Page(n)),
            (None, Some(n), None) => Ok(Locator::Section(n)),
            (None, None, Some(range)) => {
                let (start, end) = range
                    .split_once('-')
                    .ok_or_else(|| format!("invalid line range: {}", range))?;
                let start: u32 = start
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid line range: {}", range))?;
                let end: u32 = end
                    .trim()
                    .parse()
                    .map_err(|_| format!("invalid line range: {}", range))?;
                Ok(Locator::Lines(start, end))
            }
            _ => Err("locator must have exactly one of page, section, or lines".to_string()),
        }
    }
}

/// A labeled run of extracted text: one PDF page, one DOCX section, or one
/// TXT line window. Immutable once extracted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextUnit {
    #[serde(flatten)]
    pub locator: Locator,
    pub text: String,
}

/// A fixed-size overlapping slice of document text used as an LLM context
/// unit. `source_locators` lists every unit whose span the chunk window
/// intersects, in document order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub source_locators: Vec<Locator>,
}

/// An uploaded document: extracted units plus derived chunks. Created once
/// at upload completion and never mutated; there is no delete operation.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_type: FileType,
    pub units: Vec<TextUnit>,
    pub chunks: Vec<Chunk>,
    pub uploaded_at: i64,
}

/// Listing entry for `GET /api/documents`.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub filename: String,
    pub file_type: FileType,
    pub chunks_count: usize,
}

/// A prior question/answer pair supplied by the caller. The server does not
/// persist conversation state; context travels with each request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub question: String,
    pub answer: String,
}

/// A provenance reference attached to an answer. The locator is always
/// drawn from the top-ranked chunk set, so the frontend can highlight the
/// exact originating unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reference {
    pub text: String,
    pub metadata: Locator,
}

/// How well-grounded an answer is in cited references. Derived
/// deterministically by the answer composer, never user-settable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

/// A composed answer with provenance.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub references: Vec<Reference>,
    pub confidence: Confidence,
}
