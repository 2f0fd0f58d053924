//! The document base manager.
//!
//! Each base is a directory under the configured root:
//!
//! ```text
//! <root>/
//!   handbook_1760841600/
//!     base.json      metadata (name, description, documents, counts)
//!     index.sqlite   the vector index
//! ```
//!
//! The directory name is derived once from the sanitized name and the
//! creation time; renaming a base only rewrites `base.json`. Metadata is
//! written with a temp-file-and-rename so readers never see a partial
//! file, and callers write it only after the index has committed.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use docent_core::store::Store;
use docent_core::RagError;

use crate::config::Config;
use crate::sqlite_store::SqliteStore;

pub const META_FILE: &str = "base.json";
pub const INDEX_FILE: &str = "index.sqlite";

/// One document recorded in a base.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source: String,
    pub document_id: String,
    pub chunks: usize,
    pub added_at: DateTime<Utc>,
}

/// Contents of `base.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaseMeta {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub documents: Vec<DocumentRecord>,
    #[serde(default)]
    pub num_chunks: usize,
}

impl BaseMeta {
    fn new(name: &str, description: &str) -> Self {
        let now = Utc::now();
        Self {
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
            documents: Vec::new(),
            num_chunks: 0,
        }
    }

    pub fn num_documents(&self) -> usize {
        self.documents.len()
    }

    /// Record `doc`, replacing any earlier record with the same source.
    pub fn record_document(&mut self, doc: DocumentRecord) {
        self.documents.retain(|d| d.source != doc.source);
        self.documents.push(doc);
        self.documents.sort_by(|a, b| a.source.cmp(&b.source));
    }
}

/// A loaded document base: its metadata plus where it lives.
#[derive(Debug, Clone)]
pub struct DocumentBase {
    pub meta: BaseMeta,
    pub dir: PathBuf,
}

impl DocumentBase {
    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn index_path(&self) -> PathBuf {
        self.dir.join(INDEX_FILE)
    }

    /// Open (creating if needed) this base's vector index.
    pub async fn open_store(&self) -> Result<SqliteStore> {
        SqliteStore::open(&self.index_path()).await
    }

    /// Empty `store` (this base's index) and the document list.
    pub async fn clear_documents(&mut self, store: &dyn Store) -> Result<()> {
        store.clear().await?;
        self.meta.documents.clear();
        self.meta.num_chunks = 0;
        self.save()?;
        info!(base = %self.name(), "cleared documents");
        Ok(())
    }

    /// Persist the metadata, stamping `updated_at`.
    pub fn save(&mut self) -> Result<()> {
        self.meta.updated_at = Utc::now();
        write_meta(&self.dir, &self.meta)
    }
}

/// A problem found by [`DocumentBaseManager::check`].
#[derive(Debug, Clone, PartialEq)]
pub enum CheckIssue {
    /// A base directory with an index but no readable metadata.
    Orphan { dir: PathBuf, reason: String },
    /// Metadata that records chunks but has no index file.
    MissingIndex { name: String },
    /// Metadata and index disagree.
    Mismatch {
        name: String,
        meta_chunks: usize,
        index_chunks: usize,
        meta_documents: usize,
        index_documents: usize,
    },
}

impl std::fmt::Display for CheckIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CheckIssue::Orphan { dir, reason } => {
                write!(f, "orphaned index at {} ({})", dir.display(), reason)
            }
            CheckIssue::MissingIndex { name } => {
                write!(f, "base '{}' records chunks but has no index", name)
            }
            CheckIssue::Mismatch {
                name,
                meta_chunks,
                index_chunks,
                meta_documents,
                index_documents,
            } => write!(
                f,
                "base '{}' metadata lists {} documents / {} chunks, index has {} / {}",
                name, meta_documents, meta_chunks, index_documents, index_chunks
            ),
        }
    }
}

pub struct DocumentBaseManager {
    root: PathBuf,
}

impl DocumentBaseManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create an empty base.
    ///
    /// # Errors
    ///
    /// [`RagError::InvalidInput`] for a blank name, [`RagError::AlreadyExists`]
    /// if a base with this name exists.
    pub fn create(&self, name: &str, description: &str) -> Result<DocumentBase, RagError> {
        let name = validate_name(name)?;
        if self.find(name)?.is_some() {
            return Err(RagError::AlreadyExists(name.to_string()));
        }

        std::fs::create_dir_all(&self.root)
            .with_context(|| format!("Failed to create {}", self.root.display()))?;
        let dir = self.unused_dir(name);
        std::fs::create_dir(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;

        let meta = BaseMeta::new(name, description);
        write_meta(&dir, &meta)?;
        info!(name, dir = %dir.display(), "created document base");
        Ok(DocumentBase { meta, dir })
    }

    /// Every base with readable metadata, sorted by name.
    pub fn list(&self) -> Result<Vec<DocumentBase>> {
        let mut bases = Vec::new();
        for dir in self.base_dirs()? {
            if !dir.join(META_FILE).exists() {
                continue;
            }
            match read_meta(&dir) {
                Ok(meta) => bases.push(DocumentBase { meta, dir }),
                Err(e) => {
                    let err = format!("{:#}", e);
                    warn!(dir = %dir.display(), error = %err, "skipping unreadable base");
                }
            }
        }
        bases.sort_by(|a, b| a.meta.name.cmp(&b.meta.name));
        Ok(bases)
    }

    /// Look a base up by name. Surrounding whitespace is ignored, as in
    /// [`create`](Self::create).
    pub fn load(&self, name: &str) -> Result<DocumentBase, RagError> {
        self.find(name)?
            .ok_or_else(|| RagError::NotFound(name.trim().to_string()))
    }

    /// Delete a base and everything in its directory.
    pub fn delete(&self, name: &str) -> Result<(), RagError> {
        let base = self.load(name)?;
        std::fs::remove_dir_all(&base.dir)
            .with_context(|| format!("Failed to remove {}", base.dir.display()))?;
        info!(name, "deleted document base");
        Ok(())
    }

    pub fn rename(&self, old: &str, new: &str) -> Result<DocumentBase, RagError> {
        let new = validate_name(new)?;
        let old = old.trim();
        let mut base = self.load(old)?;
        if old != new && self.find(new)?.is_some() {
            return Err(RagError::AlreadyExists(new.to_string()));
        }
        base.meta.name = new.to_string();
        base.save()?;
        info!(old, new, "renamed document base");
        Ok(base)
    }

    /// Compare every base's metadata with its index.
    pub async fn check(&self) -> Result<Vec<CheckIssue>> {
        let mut issues = Vec::new();
        for dir in self.base_dirs()? {
            let has_index = dir.join(INDEX_FILE).exists();
            let meta = if dir.join(META_FILE).exists() {
                read_meta(&dir).map_err(|e| format!("{:#}", e))
            } else {
                Err("no metadata".to_string())
            };

            match meta {
                Err(reason) => {
                    if has_index || dir.join(META_FILE).exists() {
                        issues.push(CheckIssue::Orphan { dir, reason });
                    }
                }
                Ok(meta) if !has_index => {
                    if meta.num_chunks > 0 {
                        issues.push(CheckIssue::MissingIndex { name: meta.name });
                    }
                }
                Ok(meta) => {
                    let store = SqliteStore::open(&dir.join(INDEX_FILE)).await?;
                    let index_chunks = store.count().await?;
                    let index_documents = store.documents().await?.len();
                    store.close().await;
                    if index_chunks != meta.num_chunks || index_documents != meta.num_documents() {
                        issues.push(CheckIssue::Mismatch {
                            name: meta.name.clone(),
                            meta_chunks: meta.num_chunks,
                            index_chunks,
                            meta_documents: meta.num_documents(),
                            index_documents,
                        });
                    }
                }
            }
        }
        Ok(issues)
    }

    /// Rebuild metadata from the index for each issue. The index is
    /// treated as the source of truth.
    pub async fn repair(&self, issues: &[CheckIssue]) -> Result<usize> {
        let mut repaired = 0;
        for issue in issues {
            match issue {
                CheckIssue::Orphan { dir, .. } => {
                    let name = self.recovered_name(dir)?;
                    let mut base = DocumentBase {
                        meta: BaseMeta::new(&name, "recovered"),
                        dir: dir.clone(),
                    };
                    self.sync_from_index(&mut base).await?;
                    info!(name = %name, dir = %dir.display(), "recovered orphaned base");
                }
                CheckIssue::MissingIndex { name } | CheckIssue::Mismatch { name, .. } => {
                    let mut base = self.load(name)?;
                    self.sync_from_index(&mut base).await?;
                    info!(name = %name, "rebuilt base metadata from index");
                }
            }
            repaired += 1;
        }
        Ok(repaired)
    }

    /// Overwrite `base.meta` document list and counts with the index contents.
    pub async fn sync_from_index(&self, base: &mut DocumentBase) -> Result<()> {
        let store = base.open_store().await?;
        let documents = store.documents().await?;
        let count = store.count().await?;
        store.close().await;

        let previous: HashMap<String, DateTime<Utc>> = base
            .meta
            .documents
            .iter()
            .map(|d| (d.document_id.clone(), d.added_at))
            .collect();
        let now = Utc::now();
        base.meta.documents = documents
            .into_iter()
            .map(|d| DocumentRecord {
                added_at: previous.get(&d.document_id).copied().unwrap_or(now),
                source: d.source,
                document_id: d.document_id,
                chunks: d.chunks,
            })
            .collect();
        base.meta.num_chunks = count;
        base.save()
    }

    fn find(&self, name: &str) -> Result<Option<DocumentBase>> {
        let name = name.trim();
        Ok(self.list()?.into_iter().find(|b| b.meta.name == name))
    }

    fn base_dirs(&self) -> Result<Vec<PathBuf>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut dirs = Vec::new();
        for entry in std::fs::read_dir(&self.root)
            .with_context(|| format!("Failed to read {}", self.root.display()))?
        {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.path());
            }
        }
        dirs.sort();
        Ok(dirs)
    }

    fn unused_dir(&self, name: &str) -> PathBuf {
        let stem = format!("{}_{}", sanitize_name(name), Utc::now().timestamp());
        let mut dir = self.root.join(&stem);
        let mut n = 2;
        while dir.exists() {
            dir = self.root.join(format!("{}_{}", stem, n));
            n += 1;
        }
        dir
    }

    /// A free base name for an orphaned directory, from its sanitized stem.
    fn recovered_name(&self, dir: &Path) -> Result<String> {
        let dir_name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "recovered".to_string());
        let stem = match dir_name.rsplit_once('_') {
            Some((stem, ts)) if !stem.is_empty() && ts.chars().all(|c| c.is_ascii_digit()) => {
                stem.to_string()
            }
            _ => dir_name,
        };
        let mut name = stem.clone();
        let mut n = 2;
        while self.find(&name)?.is_some() {
            name = format!("{} ({})", stem, n);
            n += 1;
        }
        Ok(name)
    }
}

/// The base a command should act on: `explicit`, else `[bases].default`.
pub fn resolve_base_name(config: &Config, explicit: Option<&str>) -> Result<String> {
    explicit
        .map(str::to_string)
        .or_else(|| config.bases.default.clone())
        .ok_or_else(|| {
            anyhow::anyhow!("No document base selected: pass --base NAME or set [bases].default")
        })
}

/// Replace every non-alphanumeric character with `_`.
pub fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() { c } else { '_' })
        .collect()
}

fn validate_name(name: &str) -> Result<&str, RagError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(RagError::InvalidInput(
            "document base name must not be empty".into(),
        ));
    }
    Ok(name)
}

fn read_meta(dir: &Path) -> Result<BaseMeta> {
    let path = dir.join(META_FILE);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn write_meta(dir: &Path, meta: &BaseMeta) -> Result<()> {
    let path = dir.join(META_FILE);
    let partial = dir.join(format!(".{}.{}.partial", META_FILE, uuid::Uuid::new_v4()));
    let json = serde_json::to_string_pretty(meta)?;
    std::fs::write(&partial, json)
        .with_context(|| format!("Failed to write {}", partial.display()))?;
    std::fs::rename(&partial, &path)
        .with_context(|| format!("Failed to replace {}", path.display()))?;
    Ok(())
}
