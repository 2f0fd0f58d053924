//! Core data models shared by the processor, the store, and the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Where a chunk came from inside its source file.
///
/// Pages and rows are 1-based. `Span` is a byte range into the text
/// extracted from the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Locator {
    Page { page: u32 },
    Rows { sheet: String, first: u32, last: u32 },
    Span { start: usize, end: usize },
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Page { page } => write!(f, "page {}", page),
            Locator::Rows { sheet, first, last } if first == last => {
                write!(f, "sheet {}, row {}", sheet, first)
            }
            Locator::Rows { sheet, first, last } => {
                write!(f, "sheet {}, rows {}-{}", sheet, first, last)
            }
            Locator::Span { start, end } => write!(f, "bytes {}-{}", start, end),
        }
    }
}

/// A contiguous span of extracted text with its source metadata.
///
/// Immutable once created. `id` is derived from the document, position,
/// and text hash, so re-chunking the same bytes yields the same ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    /// SHA-256 of the source file bytes.
    pub document_id: String,
    /// File name (or path relative to an ingested directory).
    pub source: String,
    pub chunk_index: i64,
    pub text: String,
    /// SHA-256 of `text`.
    pub hash: String,
    pub locator: Locator,
}

/// A chunk paired with its similarity to a query.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    pub score: f64,
}

/// One indexed document as the store sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub document_id: String,
    pub source: String,
    pub chunks: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locator_display() {
        assert_eq!(Locator::Page { page: 3 }.to_string(), "page 3");
        assert_eq!(
            Locator::Rows {
                sheet: "Q1".into(),
                first: 2,
                last: 9
            }
            .to_string(),
            "sheet Q1, rows 2-9"
        );
        assert_eq!(
            Locator::Rows {
                sheet: "Q1".into(),
                first: 4,
                last: 4
            }
            .to_string(),
            "sheet Q1, row 4"
        );
        assert_eq!(Locator::Span { start: 0, end: 812 }.to_string(), "bytes 0-812");
    }

    #[test]
    fn test_locator_json_shape() {
        let json = serde_json::to_string(&Locator::Page { page: 1 }).unwrap();
        assert_eq!(json, r#"{"kind":"page","page":1}"#);
        let back: Locator = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Locator::Page { page: 1 });
    }
}
