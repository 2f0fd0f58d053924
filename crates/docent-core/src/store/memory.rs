//! In-memory [`Store`] implementation for tests and ephemeral sessions.
//!
//! Uses a `Vec` behind `std::sync::RwLock`. Search is brute-force cosine
//! similarity over every stored vector.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::Result;
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{Chunk, DocumentSummary, ScoredChunk};

use super::{check_model, rank_order, Store};

struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

/// In-memory store.
pub struct InMemoryStore {
    entries: RwLock<Vec<Entry>>,
    model: RwLock<Option<(String, usize)>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            model: RwLock::new(None),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<Entry>>> {
        self.entries
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<Entry>>> {
        self.entries
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn bind_model(&self, model: &str, dims: usize) -> Result<()> {
        let count = self.read()?.len();
        let mut bound = self
            .model
            .write()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?;
        check_model(
            bound.as_ref().map(|(m, d)| (m.as_str(), *d)),
            count,
            model,
            dims,
        )?;
        *bound = Some((model.to_string(), dims));
        Ok(())
    }

    async fn bound_model(&self) -> Result<Option<(String, usize)>> {
        Ok(self
            .model
            .read()
            .map_err(|_| anyhow::anyhow!("in-memory store lock poisoned"))?
            .clone())
    }

    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let mut entries = self.write()?;
        let mut inserted = 0;
        for (chunk, vector) in chunks.iter().zip(vectors) {
            if entries.iter().any(|e| e.chunk.id == chunk.id) {
                continue;
            }
            entries.push(Entry {
                chunk: chunk.clone(),
                vector: vector.clone(),
            });
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.read()?;
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: cosine_similarity(query_vec, &e.vector) as f64,
            })
            .collect();
        scored.sort_by(|a, b| rank_order(a.score, &a.chunk.id, b.score, &b.chunk.id));
        scored.truncate(k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>> {
        let entries = self.read()?;
        let mut docs: BTreeMap<(String, String), usize> = BTreeMap::new();
        for e in entries.iter() {
            *docs
                .entry((e.chunk.source.clone(), e.chunk.document_id.clone()))
                .or_default() += 1;
        }
        Ok(docs
            .into_iter()
            .map(|((source, document_id), chunks)| DocumentSummary {
                document_id,
                source,
                chunks,
            })
            .collect())
    }

    async fn contains_document(&self, document_id: &str) -> Result<bool> {
        Ok(self
            .read()?
            .iter()
            .any(|e| e.chunk.document_id == document_id))
    }

    async fn remove_source(&self, source: &str) -> Result<usize> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|e| e.chunk.source != source);
        Ok(before - entries.len())
    }

    async fn clear(&self) -> Result<()> {
        self.write()?.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{chunk_text, ChunkOptions};

    fn chunks(doc: &str, source: &str, text: &str) -> Vec<Chunk> {
        chunk_text(
            doc,
            source,
            text,
            &ChunkOptions {
                max_chars: 20,
                overlap_chars: 0,
            },
        )
    }

    fn unit(i: usize, dims: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[i % dims] = 1.0;
        v
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let store = InMemoryStore::new();
        let cs = chunks("d1", "a.txt", "one two three four five six seven eight");
        let vs: Vec<_> = (0..cs.len()).map(|i| unit(i, 4)).collect();
        let first = store.add(&cs, &vs).await.unwrap();
        assert_eq!(first, cs.len());
        assert_eq!(store.add(&cs, &vs).await.unwrap(), 0);
        assert_eq!(store.count().await.unwrap(), cs.len());
    }

    #[tokio::test]
    async fn test_search_orders_and_limits() {
        let store = InMemoryStore::new();
        let cs = chunks("d1", "a.txt", "alpha beta gamma delta epsilon zeta eta theta");
        let vs: Vec<_> = (0..cs.len()).map(|i| unit(i, 8)).collect();
        store.add(&cs, &vs).await.unwrap();

        let results = store.search(&unit(1, 8), 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, cs[1].id);
        assert!(results[0].score >= results[1].score);
        assert!(store.search(&unit(1, 8), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_documents_and_remove_source() {
        let store = InMemoryStore::new();
        let a = chunks("d1", "a.txt", "short");
        let b = chunks("d2", "b.txt", "also short");
        store.add(&a, &[unit(0, 2)]).await.unwrap();
        store.add(&b, &[unit(1, 2)]).await.unwrap();

        let docs = store.documents().await.unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].source, "a.txt");
        assert!(store.contains_document("d2").await.unwrap());

        assert_eq!(store.remove_source("b.txt").await.unwrap(), 1);
        assert!(!store.contains_document("d2").await.unwrap());
        store.clear().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_bind_model_rejects_mismatch_when_populated() {
        let store = InMemoryStore::new();
        store.bind_model("hash", 2).await.unwrap();
        store.add(&chunks("d1", "a.txt", "x"), &[unit(0, 2)]).await.unwrap();
        assert!(store.bind_model("hash", 2).await.is_ok());
        assert!(store.bind_model("other", 2).await.is_err());
    }
}
