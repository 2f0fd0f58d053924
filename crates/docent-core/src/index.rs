//! Vector Store Manager: embeds chunks and queries on top of a [`Store`].

use crate::embedding::EmbeddingProvider;
use crate::error::RagError;
use crate::models::{Chunk, ScoredChunk};
use crate::store::{check_model, Store};

/// Default number of texts sent to the embedder per call.
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Pairs a [`Store`] with the [`EmbeddingProvider`] that fills it.
///
/// Embedding failures surface as [`RagError::EmbeddingService`] and are
/// not retried here; providers apply their own retry policy.
pub struct VectorIndex<'a> {
    store: &'a dyn Store,
    embedder: &'a dyn EmbeddingProvider,
    batch_size: usize,
}

impl<'a> VectorIndex<'a> {
    pub fn new(store: &'a dyn Store, embedder: &'a dyn EmbeddingProvider) -> Self {
        Self {
            store,
            embedder,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn store(&self) -> &dyn Store {
        self.store
    }

    /// Embed and index `chunks`. Returns the number of newly stored chunks;
    /// chunks already present (same id) are not stored twice.
    ///
    /// Every batch is embedded before anything is written, so an embedding
    /// failure leaves the index untouched.
    pub async fn add(&self, chunks: &[Chunk]) -> Result<usize, RagError> {
        if chunks.is_empty() {
            return Ok(0);
        }
        self.store
            .bind_model(self.embedder.model_name(), self.embedder.dims())
            .await?;

        let mut vectors = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embedded = self.embed_checked(&texts).await?;
            vectors.extend(embedded);
        }

        Ok(self.store.add(chunks, &vectors).await?)
    }

    /// Return at most `k` chunks most similar to `query`, best first.
    ///
    /// An empty index or blank query returns no results without calling
    /// the embedder. A non-empty index built with another embedding model
    /// is an [`RagError::EmbeddingService`] error, since its vectors cannot
    /// be compared with the query's.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        let count = self.store.count().await?;
        if k == 0 || query.trim().is_empty() || count == 0 {
            return Ok(Vec::new());
        }
        let bound = self.store.bound_model().await?;
        check_model(
            bound.as_ref().map(|(m, d)| (m.as_str(), *d)),
            count,
            self.embedder.model_name(),
            self.embedder.dims(),
        )
        .map_err(|e| RagError::EmbeddingService(e.to_string()))?;

        let mut query_vec = self.embed_checked(&[query.to_string()]).await?;
        let query_vec = query_vec
            .pop()
            .ok_or_else(|| RagError::EmbeddingService("empty embedding response".into()))?;

        let mut results = self.store.search(&query_vec, k).await?;
        results.truncate(k);
        Ok(results)
    }

    async fn embed_checked(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let vectors = self
            .embedder
            .embed(texts)
            .await
            .map_err(|e| RagError::EmbeddingService(format!("{:#}", e)))?;
        if vectors.len() != texts.len() {
            return Err(RagError::EmbeddingService(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        let dims = self.embedder.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(RagError::EmbeddingService(format!(
                "embedder returned a {}-dim vector, expected {}",
                bad.len(),
                dims
            )));
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_pages, ChunkOptions};
    use crate::embedding::HashingProvider;
    use crate::store::memory::InMemoryStore;
    use async_trait::async_trait;

    struct FailingEmbedder;

    #[async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        fn model_name(&self) -> &str {
            "failing"
        }
        fn dims(&self) -> usize {
            4
        }
        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("503 service unavailable")
        }
    }

    fn pages() -> Vec<Chunk> {
        let pages = vec![
            "Company overview and mission statement.".to_string(),
            "The total revenue for the year was 4.2 million dollars.".to_string(),
            "Hiring plans and office expansion.".to_string(),
        ];
        chunk_pages("doc", "report.pdf", &pages, &ChunkOptions::default())
    }

    #[tokio::test]
    async fn test_search_is_bounded_and_sorted() {
        let store = InMemoryStore::new();
        let embedder = HashingProvider::new(256);
        let index = VectorIndex::new(&store, &embedder).with_batch_size(2);
        assert_eq!(index.add(&pages()).await.unwrap(), 3);

        for k in 0..5 {
            let results = index.search("total revenue", k).await.unwrap();
            assert!(results.len() <= k);
            for pair in results.windows(2) {
                assert!(pair[0].score >= pair[1].score);
            }
        }
        let top = index.search("total revenue", 1).await.unwrap();
        assert!(top[0].chunk.text.contains("revenue"));
    }

    #[tokio::test]
    async fn test_search_with_other_model_is_rejected() {
        let store = InMemoryStore::new();
        let narrow = HashingProvider::new(64);
        VectorIndex::new(&store, &narrow).add(&pages()).await.unwrap();

        let wide = HashingProvider::new(128);
        let err = VectorIndex::new(&store, &wide)
            .search("total revenue", 2)
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(ref m) if m.contains("64 dims")));

        let results = VectorIndex::new(&store, &narrow)
            .search("total revenue", 2)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn test_empty_index_skips_embedder() {
        let store = InMemoryStore::new();
        let index = VectorIndex::new(&store, &FailingEmbedder);
        assert!(index.search("anything", 4).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_embedding_failure_is_reported_and_nothing_written() {
        let store = InMemoryStore::new();
        let index = VectorIndex::new(&store, &FailingEmbedder);
        let err = index.add(&pages()).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService(ref m) if m.contains("503")));
        assert_eq!(store.count().await.unwrap(), 0);
    }
}
