//! Overlapping text chunker.
//!
//! Splits extracted text into [`Chunk`]s no longer than a configurable
//! character budget, with an optional overlap between neighbours so a
//! sentence cut at a boundary still appears whole in one of them.
//!
//! Every chunk is an exact slice of its input. Reading the chunks in
//! order and dropping the overlapping prefix of each one reproduces the
//! input byte for byte.
//!
//! # Algorithm
//!
//! 1. If the remainder fits in `max_chars`, emit it and stop.
//! 2. Otherwise look at the next `max_chars` bytes (snapped to a char
//!    boundary) and cut after the last `\n\n`, then `\n`, then space,
//!    provided the cut keeps at least half the window.
//! 3. With no usable separator, hard-cut at the window end.
//! 4. Start the next chunk `overlap_chars` before the cut, moved forward
//!    to the next word boundary.
//!
//! Format-aware builders wrap the splitter and attach a [`Locator`]:
//! [`chunk_pages`] (one page never shares a chunk with another),
//! [`chunk_rows`] (rows grouped per sheet), and [`chunk_text`] (byte
//! spans for flowing text).
//!
//! # Example
//!
//! ```rust
//! use docent_core::chunk::{chunk_text, ChunkOptions};
//!
//! let chunks = chunk_text("doc-1", "notes.txt", "Hello world.", &ChunkOptions::default());
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].text, "Hello world.");
//! ```

use std::ops::Range;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{Chunk, Locator};

/// Approximate characters-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Chunk size limits, in characters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkOptions {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkOptions {
    /// Build options from token counts using [`CHARS_PER_TOKEN`].
    pub fn from_tokens(max_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            max_chars: max_tokens * CHARS_PER_TOKEN,
            overlap_chars: overlap_tokens * CHARS_PER_TOKEN,
        }
    }
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self::from_tokens(250, 50)
    }
}

/// One worksheet's non-empty rows, as `(1-based row number, rendered text)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRows {
    pub name: String,
    pub rows: Vec<(u32, String)>,
}

/// Split `text` into byte ranges of at most `max_chars` bytes.
///
/// Ranges are ordered, start at 0, end at `text.len()`, and each range
/// starts no later than the previous one ends. Empty input yields no
/// ranges.
pub fn split_spans(text: &str, opts: &ChunkOptions) -> Vec<Range<usize>> {
    let max = opts.max_chars.max(1);
    let overlap = opts.overlap_chars.min(max - 1);
    let mut spans = Vec::new();
    if text.is_empty() {
        return spans;
    }

    let mut start = 0;
    loop {
        if text.len() - start <= max {
            spans.push(start..text.len());
            break;
        }
        let end = break_point(text, start, max);
        spans.push(start..end);
        start = overlap_start(text, start, end, overlap);
    }
    spans
}

/// Chunk flowing text (DOCX, plain text) with byte-span locators.
///
/// Whitespace-only slices are dropped.
pub fn chunk_text(document_id: &str, source: &str, text: &str, opts: &ChunkOptions) -> Vec<Chunk> {
    let mut builder = ChunkBuilder::new(document_id, source);
    for span in split_spans(text, opts) {
        let piece = &text[span.clone()];
        if piece.trim().is_empty() {
            continue;
        }
        builder.push(
            piece,
            Locator::Span {
                start: span.start,
                end: span.end,
            },
        );
    }
    builder.finish()
}

/// Chunk paginated text. `pages[0]` is page 1; blank pages yield nothing.
pub fn chunk_pages(
    document_id: &str,
    source: &str,
    pages: &[String],
    opts: &ChunkOptions,
) -> Vec<Chunk> {
    let mut builder = ChunkBuilder::new(document_id, source);
    for (i, page) in pages.iter().enumerate() {
        let locator = Locator::Page {
            page: i as u32 + 1,
        };
        for span in split_spans(page, opts) {
            let piece = &page[span];
            if !piece.trim().is_empty() {
                builder.push(piece, locator.clone());
            }
        }
    }
    builder.finish()
}

/// Chunk spreadsheet rows. Rows are joined with `\n` and grouped until the
/// next row would overflow `max_chars`; a single oversized row is split on
/// its own. Chunks never span sheets.
pub fn chunk_rows(
    document_id: &str,
    source: &str,
    sheets: &[SheetRows],
    opts: &ChunkOptions,
) -> Vec<Chunk> {
    let max = opts.max_chars.max(1);
    let mut builder = ChunkBuilder::new(document_id, source);

    for sheet in sheets {
        let mut buf = String::new();
        let mut first = 0u32;
        let mut last = 0u32;

        for (row, line) in &sheet.rows {
            let would_be = if buf.is_empty() {
                line.len()
            } else {
                buf.len() + 1 + line.len()
            };
            if would_be > max && !buf.is_empty() {
                builder.push(&buf, rows_locator(&sheet.name, first, last));
                buf.clear();
            }

            if line.len() > max {
                for span in split_spans(line, opts) {
                    builder.push(&line[span], rows_locator(&sheet.name, *row, *row));
                }
                continue;
            }

            if buf.is_empty() {
                first = *row;
            } else {
                buf.push('\n');
            }
            buf.push_str(line);
            last = *row;
        }

        if !buf.is_empty() {
            builder.push(&buf, rows_locator(&sheet.name, first, last));
        }
    }
    builder.finish()
}

/// Hex SHA-256 of arbitrary bytes. Used for document ids and chunk hashes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn rows_locator(sheet: &str, first: u32, last: u32) -> Locator {
    Locator::Rows {
        sheet: sheet.to_string(),
        first,
        last,
    }
}

/// Assigns contiguous indices across every builder call for one document.
struct ChunkBuilder<'a> {
    document_id: &'a str,
    source: &'a str,
    chunks: Vec<Chunk>,
}

impl<'a> ChunkBuilder<'a> {
    fn new(document_id: &'a str, source: &'a str) -> Self {
        Self {
            document_id,
            source,
            chunks: Vec::new(),
        }
    }

    fn push(&mut self, text: &str, locator: Locator) {
        let index = self.chunks.len() as i64;
        self.chunks
            .push(make_chunk(self.document_id, self.source, index, text, locator));
    }

    fn finish(self) -> Vec<Chunk> {
        self.chunks
    }
}

fn break_point(text: &str, start: usize, max: usize) -> usize {
    let mut hard = snap_to_char_boundary(text, start + max);
    if hard <= start {
        hard = next_char_boundary(text, start);
    }
    let window = &text[start..hard];
    let min_keep = window.len() / 2;
    for sep in SEPARATORS {
        if let Some(pos) = window.rfind(sep) {
            let cut = pos + sep.len();
            if cut > min_keep {
                return start + cut;
            }
        }
    }
    hard
}

fn overlap_start(text: &str, start: usize, end: usize, overlap: usize) -> usize {
    if overlap == 0 {
        return end;
    }
    let mut next = snap_to_char_boundary(text, end.saturating_sub(overlap));
    if next <= start {
        return end;
    }
    // Prefer to open the overlap on a word rather than mid-word.
    if let Some((pos, ws)) = text[next..end].char_indices().find(|(_, c)| c.is_whitespace()) {
        let after = next + pos + ws.len_utf8();
        if after < end {
            next = after;
        }
    }
    next
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn next_char_boundary(s: &str, index: usize) -> usize {
    s[index..]
        .chars()
        .next()
        .map(|c| index + c.len_utf8())
        .unwrap_or(s.len())
}

/// Create a [`Chunk`] with a content-derived UUIDv5 and SHA-256 text hash.
fn make_chunk(document_id: &str, source: &str, index: i64, text: &str, locator: Locator) -> Chunk {
    let hash = sha256_hex(text.as_bytes());
    let key = format!("{}:{}:{}", document_id, index, hash);

    Chunk {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, key.as_bytes()).to_string(),
        document_id: document_id.to_string(),
        source: source.to_string(),
        chunk_index: index,
        text: text.to_string(),
        hash,
        locator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opts(max_chars: usize, overlap_chars: usize) -> ChunkOptions {
        ChunkOptions {
            max_chars,
            overlap_chars,
        }
    }

    /// Rebuild the input by dropping each chunk's overlap with its predecessor.
    fn reassemble(text: &str, spans: &[Range<usize>]) -> String {
        let mut out = String::new();
        let mut covered = 0;
        for span in spans {
            let from = covered.max(span.start);
            if from < span.end {
                out.push_str(&text[from..span.end]);
            }
            covered = covered.max(span.end);
        }
        out
    }

    fn sample_text() -> String {
        (0..40)
            .map(|i| format!("Sentence number {} talks about quarterly figures.", i))
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = chunk_text("doc1", "a.txt", "Hello, world!", &opts(100, 20));
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].locator, Locator::Span { start: 0, end: 13 });
    }

    #[test]
    fn test_empty_text_yields_nothing() {
        assert!(split_spans("", &opts(100, 10)).is_empty());
        assert!(chunk_text("doc1", "a.txt", "   \n\n  ", &opts(100, 10)).is_empty());
    }

    #[test]
    fn test_spans_respect_max_and_reassemble() {
        let text = sample_text();
        let spans = split_spans(&text, &opts(120, 30));
        assert!(spans.len() > 1);
        for s in &spans {
            assert!(s.end - s.start <= 120, "span too long: {:?}", s);
        }
        assert_eq!(spans.first().unwrap().start, 0);
        assert_eq!(spans.last().unwrap().end, text.len());
        assert_eq!(reassemble(&text, &spans), text);
    }

    #[test]
    fn test_adjacent_chunks_overlap() {
        let text = sample_text();
        let spans = split_spans(&text, &opts(120, 30));
        for pair in spans.windows(2) {
            assert!(pair[1].start < pair[0].end, "expected overlap: {:?}", pair);
            assert!(pair[1].start > pair[0].start);
        }
    }

    #[test]
    fn test_zero_overlap_is_a_partition() {
        let text = sample_text();
        let spans = split_spans(&text, &opts(100, 0));
        for pair in spans.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        let joined: String = spans.iter().map(|s| &text[s.clone()]).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_prefers_paragraph_breaks() {
        let text = format!("{}\n\n{}", "a".repeat(60), "b".repeat(60));
        let spans = split_spans(&text, &opts(100, 0));
        assert_eq!(&text[spans[0].clone()], format!("{}\n\n", "a".repeat(60)));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘".repeat(5);
        let spans = split_spans(&text, &opts(7, 2));
        assert_eq!(reassemble(&text, &spans), text);
        for s in &spans {
            assert!(text.is_char_boundary(s.start) && text.is_char_boundary(s.end));
        }
    }

    #[test]
    fn test_pages_carry_page_locators() {
        let pages = vec![
            "Overview of the year.".to_string(),
            String::new(),
            "Revenue grew.".to_string(),
        ];
        let chunks = chunk_pages("doc1", "report.pdf", &pages, &opts(100, 10));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].locator, Locator::Page { page: 1 });
        assert_eq!(chunks[1].locator, Locator::Page { page: 3 });
        assert_eq!(chunks[1].chunk_index, 1);
    }

    #[test]
    fn test_rows_grouped_per_sheet() {
        let sheets = vec![
            SheetRows {
                name: "Sales".into(),
                rows: (1..=6).map(|r| (r, format!("row {} | 100", r))).collect(),
            },
            SheetRows {
                name: "Costs".into(),
                rows: vec![(2, "rent | 50".into())],
            },
        ];
        let chunks = chunk_rows("doc1", "book.xlsx", &sheets, &opts(30, 0));
        assert!(chunks.len() >= 3);
        assert_eq!(
            chunks[0].locator,
            Locator::Rows {
                sheet: "Sales".into(),
                first: 1,
                last: 2
            }
        );
        assert_eq!(chunks[0].text, "row 1 | 100\nrow 2 | 100");
        let last = chunks.last().unwrap();
        assert_eq!(
            last.locator,
            Locator::Rows {
                sheet: "Costs".into(),
                first: 2,
                last: 2
            }
        );
    }

    #[test]
    fn test_deterministic_ids() {
        let text = sample_text();
        let c1 = chunk_text("doc1", "a.txt", &text, &opts(80, 10));
        let c2 = chunk_text("doc1", "a.txt", &text, &opts(80, 10));
        assert_eq!(c1, c2);
        let other = chunk_text("doc2", "a.txt", &text, &opts(80, 10));
        assert_ne!(c1[0].id, other[0].id);
    }

    #[test]
    fn test_from_tokens() {
        let o = ChunkOptions::from_tokens(250, 50);
        assert_eq!(o.max_chars, 1000);
        assert_eq!(o.overlap_chars, 200);
    }
}
