//! Text extraction for the supported document formats.
//!
//! Extraction keeps the structure that locators need: PDFs yield one
//! string per page, spreadsheets yield numbered rows per sheet, and
//! everything else yields a single text body.

use std::io::{Cursor, Read};
use std::path::Path;

use calamine::Reader;
use docent_core::chunk::SheetRows;
use quick_xml::events::Event;
use thiserror::Error;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;
/// Maximum sheets to read from a workbook.
const MAX_SHEETS: usize = 100;

/// A supported input format, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Pdf,
    Docx,
    Xlsx,
    Xls,
    Text,
}

impl Format {
    /// Detect the format from the extension, case-insensitively.
    pub fn from_extension(ext: &str) -> Option<Format> {
        match ext.to_ascii_lowercase().as_str() {
            "pdf" => Some(Format::Pdf),
            "docx" => Some(Format::Docx),
            "xlsx" => Some(Format::Xlsx),
            "xls" => Some(Format::Xls),
            "txt" | "md" => Some(Format::Text),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Format> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Format::from_extension)
    }
}

/// Extracted content, shaped by format.
#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    /// One entry per page, in order.
    Pages(Vec<String>),
    Sheets(Vec<SheetRows>),
    Text(String),
}

impl Extracted {
    /// True when no extracted unit contains non-whitespace text.
    pub fn is_blank(&self) -> bool {
        match self {
            Extracted::Pages(pages) => pages.iter().all(|p| p.trim().is_empty()),
            Extracted::Sheets(sheets) => sheets.iter().all(|s| s.rows.is_empty()),
            Extracted::Text(text) => text.trim().is_empty(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("DOCX extraction failed: {0}")]
    Docx(String),
    #[error("spreadsheet extraction failed: {0}")]
    Spreadsheet(String),
    #[error("text is not valid UTF-8")]
    Encoding,
}

/// Extract content from `bytes` in the given format.
pub fn extract(bytes: &[u8], format: Format) -> Result<Extracted, ExtractError> {
    match format {
        Format::Pdf => extract_pdf(bytes).map(Extracted::Pages),
        Format::Docx => extract_docx(bytes).map(Extracted::Text),
        Format::Xlsx | Format::Xls => extract_workbook(bytes).map(Extracted::Sheets),
        Format::Text => String::from_utf8(bytes.to_vec())
            .map(|s| Extracted::Text(s.trim_start_matches('\u{feff}').to_string()))
            .map_err(|_| ExtractError::Encoding),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>, ExtractError> {
    let entry = archive
        .by_name(name)
        .map_err(|e| ExtractError::Docx(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| ExtractError::Docx(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(ExtractError::Docx(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

fn extract_docx(bytes: &[u8]) -> Result<String, ExtractError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|e| ExtractError::Docx(e.to_string()))?;
    let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
    docx_body_text(&xml)
}

/// Collect `w:t` runs, one line per `w:p` paragraph.
fn docx_body_text(xml: &[u8]) -> Result<String, ExtractError> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| ExtractError::Docx(e.to_string()))?;
                out.push_str(&text);
            }
            Ok(Event::Empty(e)) => match e.local_name().as_ref() {
                b"tab" => out.push('\t'),
                b"br" | b"cr" => out.push('\n'),
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(ExtractError::Docx(e.to_string())),
            _ => {}
        }
        buf.clear();
    }
    Ok(out.trim_end().to_string())
}

/// Read every sheet of an XLS or XLSX workbook into numbered rows.
///
/// Row numbers are 1-based as shown by spreadsheet applications. Cells
/// are rendered with their display value and joined with `" | "`; rows
/// with no non-empty cell are dropped.
fn extract_workbook(bytes: &[u8]) -> Result<Vec<SheetRows>, ExtractError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
        .map_err(|e| ExtractError::Spreadsheet(e.to_string()))?;

    let mut sheets = Vec::new();
    for name in workbook.sheet_names().into_iter().take(MAX_SHEETS) {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| ExtractError::Spreadsheet(format!("sheet '{}': {}", name, e)))?;
        let first_row = range.start().map(|(row, _)| row).unwrap_or(0);

        let rows = range
            .rows()
            .enumerate()
            .filter_map(|(offset, cells)| {
                let values: Vec<String> = cells
                    .iter()
                    .filter(|c| !matches!(c, calamine::Data::Empty))
                    .map(|c| c.to_string().trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect();
                if values.is_empty() {
                    None
                } else {
                    Some((first_row + offset as u32 + 1, values.join(" | ")))
                }
            })
            .collect();

        sheets.push(SheetRows { name, rows });
    }
    Ok(sheets)
}
