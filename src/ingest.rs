//! Ingestion: process files and index them into a document base.
//!
//! Each file is handled on its own. A file that cannot be processed or
//! embedded is reported and the rest of the batch continues. Base
//! metadata is saved after each file's chunks have been committed to the
//! index.
//!
//! Re-uploads: a file whose content hash is already indexed is skipped
//! as a duplicate; a file whose source name is already indexed with
//! different content replaces the earlier version.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::Utc;
use tracing::{info, warn};

use docent_core::index::VectorIndex;
use docent_core::RagError;

use crate::bases::{resolve_base_name, DocumentBase, DocumentBaseManager, DocumentRecord};
use crate::config::Config;
use crate::embedding::create_provider;
use crate::processor::{source_name, DocumentProcessor};

/// What happened to one input file.
#[derive(Debug, Clone, PartialEq)]
pub enum FileOutcome {
    Added { source: String, chunks: usize },
    Replaced { source: String, chunks: usize, removed: usize },
    Duplicate { source: String },
    Failed { source: String, error: String },
}

impl std::fmt::Display for FileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileOutcome::Added { source, chunks } => {
                write!(f, "added: {} ({} chunks)", source, chunks)
            }
            FileOutcome::Replaced {
                source,
                chunks,
                removed,
            } => write!(
                f,
                "replaced: {} ({} chunks, {} removed)",
                source, chunks, removed
            ),
            FileOutcome::Duplicate { source } => write!(f, "duplicate: {} (already indexed)", source),
            FileOutcome::Failed { source, error } => write!(f, "failed: {}: {}", source, error),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct IngestReport {
    pub outcomes: Vec<FileOutcome>,
    /// Chunk count of the index after ingestion.
    pub total_chunks: usize,
}

impl IngestReport {
    pub fn chunks_added(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                FileOutcome::Added { chunks, .. } | FileOutcome::Replaced { chunks, .. } => *chunks,
                _ => 0,
            })
            .sum()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Failed { .. }))
            .count()
    }

    fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(o)).count()
    }
}

/// Gather `(path, source)` pairs from explicit files and an optional directory.
pub fn collect_inputs(
    processor: &DocumentProcessor,
    files: &[PathBuf],
    dir: Option<&Path>,
) -> Result<Vec<(PathBuf, String)>> {
    let mut inputs: Vec<(PathBuf, String)> = files
        .iter()
        .map(|p| (p.clone(), source_name(p)))
        .collect();
    if let Some(dir) = dir {
        inputs.extend(processor.collect_dir(dir)?);
    }
    Ok(inputs)
}

/// Process and index `inputs` into `base` through `index`.
///
/// Returns an error only when the metadata itself cannot be saved or the
/// index cannot be queried; per-file failures are reported in the result.
pub async fn ingest_files(
    base: &mut DocumentBase,
    index: &VectorIndex<'_>,
    processor: &DocumentProcessor,
    inputs: &[(PathBuf, String)],
) -> Result<IngestReport, RagError> {
    let store = index.store();
    let mut report = IngestReport::default();

    for (path, source) in inputs {
        let outcome = match ingest_one(base, index, processor, path, source).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(source = %source, error = %e, "skipping file");
                FileOutcome::Failed {
                    source: source.clone(),
                    error: e.to_string(),
                }
            }
        };
        report.outcomes.push(outcome);
    }

    report.total_chunks = store.count().await?;
    Ok(report)
}

async fn ingest_one(
    base: &mut DocumentBase,
    index: &VectorIndex<'_>,
    processor: &DocumentProcessor,
    path: &Path,
    source: &str,
) -> Result<FileOutcome, RagError> {
    let store = index.store();
    let doc = processor.process(path, source)?;

    if store.contains_document(&doc.document_id).await? {
        warn!(source, document_id = %doc.document_id, "duplicate upload skipped");
        return Ok(FileOutcome::Duplicate {
            source: source.to_string(),
        });
    }

    let replacing = store.documents().await?.iter().any(|d| d.source == source);
    let removed = if replacing {
        store.remove_source(source).await?
    } else {
        0
    };

    let added = match index.add(&doc.chunks).await {
        Ok(n) => n,
        Err(e) => {
            if removed > 0 {
                // The earlier version is gone from the index; keep metadata in step.
                base.meta.documents.retain(|d| d.source != source);
                base.meta.num_chunks = store.count().await?;
                base.save()?;
            }
            return Err(e);
        }
    };

    base.meta.record_document(DocumentRecord {
        source: source.to_string(),
        document_id: doc.document_id.clone(),
        chunks: doc.chunks.len(),
        added_at: Utc::now(),
    });
    base.meta.num_chunks = store.count().await?;
    base.save()?;

    info!(source, chunks = added, replaced = removed, "indexed document");
    Ok(if replacing {
        FileOutcome::Replaced {
            source: source.to_string(),
            chunks: added,
            removed,
        }
    } else {
        FileOutcome::Added {
            source: source.to_string(),
            chunks: added,
        }
    })
}

/// `docent ingest`: index files and/or a directory into a base.
pub async fn run_ingest(
    config: &Config,
    base: Option<&str>,
    create: bool,
    files: &[PathBuf],
    dir: Option<&Path>,
) -> Result<()> {
    if files.is_empty() && dir.is_none() {
        bail!("Nothing to ingest: pass FILES or --dir");
    }

    let manager = DocumentBaseManager::new(&config.bases.root);
    let name = resolve_base_name(config, base)?;
    let mut base = match manager.load(&name) {
        Ok(base) => base,
        Err(RagError::NotFound(_)) if create => manager.create(&name, "")?,
        Err(RagError::NotFound(_)) => bail!(
            "document base not found: {} (create it with `docent base create` or pass --create)",
            name
        ),
        Err(e) => return Err(e.into()),
    };

    let processor = DocumentProcessor::new(&config.chunking, &config.ingest)?;
    let inputs = collect_inputs(&processor, files, dir)?;
    let embedder = create_provider(&config.embedding)?;
    let store = base.open_store().await?;
    let index =
        VectorIndex::new(&store, embedder.as_ref()).with_batch_size(config.embedding.batch_size);

    let report = ingest_files(&mut base, &index, &processor, &inputs).await;
    store.close().await;
    let report = report?;

    print_report(base.name(), &report);
    let failed = report.failed();
    if failed > 0 {
        bail!("{} of {} files failed", failed, report.outcomes.len());
    }
    println!("ok");
    Ok(())
}

pub fn print_report(base: &str, report: &IngestReport) {
    println!("ingest {}", base);
    for outcome in &report.outcomes {
        println!("  {}", outcome);
    }
    println!(
        "  files: {}  added: {}  replaced: {}  duplicates: {}  failed: {}",
        report.outcomes.len(),
        report.count(|o| matches!(o, FileOutcome::Added { .. })),
        report.count(|o| matches!(o, FileOutcome::Replaced { .. })),
        report.count(|o| matches!(o, FileOutcome::Duplicate { .. })),
        report.failed()
    );
    println!(
        "  chunks: {} new, {} total",
        report.chunks_added(),
        report.total_chunks
    );
}
