//! Storage abstraction for the vector index.
//!
//! The [`Store`] trait covers what the index needs from a backend:
//! persisting chunks with their vectors, brute-force or native similarity
//! search, and the per-document bookkeeping used for deduplication and
//! consistency checks.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, DocumentSummary, ScoredChunk};

/// Abstract storage backend for one document base's index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`bind_model`](Store::bind_model) | Pin the embedding model used by the index |
/// | [`bound_model`](Store::bound_model) | The pinned model, if any |
/// | [`add`](Store::add) | Insert chunks and vectors, skipping known chunk ids |
/// | [`search`](Store::search) | Top-k cosine similarity search |
/// | [`count`](Store::count) | Number of stored chunks |
/// | [`documents`](Store::documents) | Per-document chunk counts |
/// | [`contains_document`](Store::contains_document) | Content-hash dedup lookup |
/// | [`remove_source`](Store::remove_source) | Drop every chunk from one source |
/// | [`clear`](Store::clear) | Drop everything |
#[async_trait]
pub trait Store: Send + Sync {
    /// Record the embedding model for this index, or verify it matches.
    ///
    /// An empty index accepts any model. A non-empty index built with a
    /// different model or dimensionality is an error.
    async fn bind_model(&self, model: &str, dims: usize) -> Result<()>;

    /// The `(model, dims)` recorded by [`bind_model`](Store::bind_model).
    async fn bound_model(&self) -> Result<Option<(String, usize)>>;

    /// Insert chunks with their vectors (same length, same order).
    ///
    /// Chunks whose id is already stored are skipped. Returns the number
    /// of chunks actually inserted. The whole batch commits or none of it
    /// does.
    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize>;

    /// Return at most `k` chunks ordered by descending similarity.
    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    async fn count(&self) -> Result<usize>;

    /// Documents in the index, ordered by source name.
    async fn documents(&self) -> Result<Vec<DocumentSummary>>;

    async fn contains_document(&self, document_id: &str) -> Result<bool>;

    /// Remove all chunks whose source equals `source`. Returns chunks removed.
    async fn remove_source(&self, source: &str) -> Result<usize>;

    async fn clear(&self) -> Result<()>;
}

/// Ordering for ranked results: higher score first, then chunk id so
/// equal scores come back in a stable order.
pub fn rank_order(a_score: f64, a_id: &str, b_score: f64, b_id: &str) -> Ordering {
    b_score
        .partial_cmp(&a_score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a_id.cmp(b_id))
}

/// Check a requested model against the one an index was built with.
pub fn check_model(
    bound: Option<(&str, usize)>,
    chunk_count: usize,
    model: &str,
    dims: usize,
) -> Result<()> {
    match bound {
        Some((m, d)) if chunk_count > 0 && (m != model || d != dims) => anyhow::bail!(
            "index was built with embedding model '{}' ({} dims); configured model is '{}' ({} dims)",
            m,
            d,
            model,
            dims
        ),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order_ties_by_id() {
        let mut items = vec![(0.5, "b"), (0.9, "z"), (0.5, "a")];
        items.sort_by(|x, y| rank_order(x.0, x.1, y.0, y.1));
        assert_eq!(items, vec![(0.9, "z"), (0.5, "a"), (0.5, "b")]);
    }

    #[test]
    fn test_check_model() {
        assert!(check_model(None, 10, "m", 8).is_ok());
        assert!(check_model(Some(("m", 8)), 10, "m", 8).is_ok());
        assert!(check_model(Some(("other", 8)), 0, "m", 8).is_ok());
        let err = check_model(Some(("other", 8)), 3, "m", 8).unwrap_err();
        assert!(err.to_string().contains("'other'"));
    }
}
