//! The document processor: file → extracted content → chunks.
//!
//! Format detection is by extension. Every failure is scoped to the one
//! file being processed, so callers can report it and continue.

use std::path::{Path, PathBuf};

use anyhow::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use tracing::debug;
use walkdir::WalkDir;

use docent_core::chunk::{chunk_pages, chunk_rows, chunk_text, sha256_hex, ChunkOptions};
use docent_core::models::Chunk;
use docent_core::RagError;

use crate::config::{ChunkingConfig, IngestConfig};
use crate::extract::{extract, Extracted, Format};

/// A processed file, ready for indexing.
#[derive(Debug, Clone)]
pub struct ProcessedDocument {
    /// SHA-256 of the file bytes.
    pub document_id: String,
    /// Display name recorded on every chunk.
    pub source: String,
    pub chunks: Vec<Chunk>,
}

pub struct DocumentProcessor {
    opts: ChunkOptions,
    max_file_bytes: u64,
    include: GlobSet,
    exclude: GlobSet,
    follow_symlinks: bool,
}

impl DocumentProcessor {
    pub fn new(chunking: &ChunkingConfig, ingest: &IngestConfig) -> Result<Self> {
        let mut default_excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
        default_excludes.extend(ingest.exclude_globs.clone());

        Ok(Self {
            opts: chunking.options(),
            max_file_bytes: ingest.max_file_bytes,
            include: build_globset(&ingest.include_globs)?,
            exclude: build_globset(&default_excludes)?,
            follow_symlinks: ingest.follow_symlinks,
        })
    }

    /// Process the file at `path`, naming its chunks `source`.
    ///
    /// # Errors
    ///
    /// - [`RagError::UnsupportedFormat`] for an unrecognized extension.
    /// - [`RagError::Extraction`] if the file cannot be read, exceeds the
    ///   size limit, cannot be parsed, or contains no text.
    pub fn process(&self, path: &Path, source: &str) -> Result<ProcessedDocument, RagError> {
        let format = Format::from_path(path).ok_or_else(|| RagError::UnsupportedFormat {
            path: path.to_path_buf(),
            extension: path
                .extension()
                .map(|e| e.to_string_lossy().to_string())
                .unwrap_or_default(),
        })?;

        let size = std::fs::metadata(path)
            .map_err(|e| RagError::extraction(path, e))?
            .len();
        if size > self.max_file_bytes {
            return Err(RagError::extraction(
                path,
                format!(
                    "file is {} bytes, larger than the {} byte limit",
                    size, self.max_file_bytes
                ),
            ));
        }

        let bytes = std::fs::read(path).map_err(|e| RagError::extraction(path, e))?;
        let document_id = sha256_hex(&bytes);
        let extracted = extract(&bytes, format).map_err(|e| RagError::extraction(path, e))?;
        if extracted.is_blank() {
            return Err(RagError::extraction(path, "no extractable text"));
        }

        let chunks = match &extracted {
            Extracted::Pages(pages) => chunk_pages(&document_id, source, pages, &self.opts),
            Extracted::Sheets(sheets) => chunk_rows(&document_id, source, sheets, &self.opts),
            Extracted::Text(text) => chunk_text(&document_id, source, text, &self.opts),
        };
        debug!(source, chunks = chunks.len(), ?format, "processed document");

        Ok(ProcessedDocument {
            document_id,
            source: source.to_string(),
            chunks,
        })
    }

    /// List the files under `dir` that pass the include/exclude globs.
    ///
    /// Returns `(path, source)` pairs sorted by source, where the source
    /// is the path relative to `dir`.
    pub fn collect_dir(&self, dir: &Path) -> Result<Vec<(PathBuf, String)>> {
        if !dir.is_dir() {
            anyhow::bail!("not a directory: {}", dir.display());
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).follow_links(self.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(dir).unwrap_or(path);
            let rel_str = relative.to_string_lossy().replace('\\', "/");

            if self.exclude.is_match(&rel_str) || !self.include.is_match(&rel_str) {
                continue;
            }
            files.push((path.to_path_buf(), rel_str));
        }

        files.sort_by(|a, b| a.1.cmp(&b.1));
        Ok(files)
    }
}

/// The display name for a single file: its file name.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.display().to_string())
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
