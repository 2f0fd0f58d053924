//! SQLite-backed [`Store`] implementation.
//!
//! One database file per document base. Vectors are stored as
//! little-endian `f32` BLOBs and searched brute-force: every vector is
//! scored, the top `k` ids are kept, and only those chunk rows are read.

use std::path::Path;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use docent_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docent_core::models::{Chunk, DocumentSummary, Locator, ScoredChunk};
use docent_core::store::{check_model, rank_order, Store};

use crate::db;
use crate::migrate;

const META_MODEL: &str = "embedding_model";
const META_DIMS: &str = "embedding_dims";

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open the index at `path`, creating and migrating it if needed.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let locator_json: String = row.get("locator_json");
    let locator: Locator = serde_json::from_str(&locator_json)
        .with_context(|| format!("corrupt locator '{}'", locator_json))?;
    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        source: row.get("source"),
        chunk_index: row.get("chunk_index"),
        text: row.get("text"),
        hash: row.get("hash"),
        locator,
    })
}

#[async_trait]
impl Store for SqliteStore {
    async fn bind_model(&self, model: &str, dims: usize) -> Result<()> {
        let bound = self.bound_model().await?;
        let count = self.count().await?;
        check_model(
            bound.as_ref().map(|(m, d)| (m.as_str(), *d)),
            count,
            model,
            dims,
        )?;

        let mut tx = self.pool.begin().await?;
        for (key, value) in [(META_MODEL, model.to_string()), (META_DIMS, dims.to_string())] {
            sqlx::query(
                "INSERT INTO index_meta (key, value) VALUES (?, ?) \
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn bound_model(&self) -> Result<Option<(String, usize)>> {
        let model: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(META_MODEL)
            .fetch_optional(&self.pool)
            .await?;
        let dims: Option<String> = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
            .bind(META_DIMS)
            .fetch_optional(&self.pool)
            .await?;
        match (model, dims) {
            (Some(m), Some(d)) => Ok(Some((
                m,
                d.parse().with_context(|| format!("corrupt {} value '{}'", META_DIMS, d))?,
            ))),
            _ => Ok(None),
        }
    }

    async fn add(&self, chunks: &[Chunk], vectors: &[Vec<f32>]) -> Result<usize> {
        if chunks.len() != vectors.len() {
            anyhow::bail!(
                "chunk/vector count mismatch: {} chunks, {} vectors",
                chunks.len(),
                vectors.len()
            );
        }
        let now = chrono::Utc::now().timestamp();
        let mut inserted = 0;
        let mut tx = self.pool.begin().await?;

        for (chunk, vector) in chunks.iter().zip(vectors) {
            let locator_json = serde_json::to_string(&chunk.locator)?;
            let result = sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, source, chunk_index, text, hash, locator_json, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(id) DO NOTHING
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&chunk.source)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(&chunk.hash)
            .bind(&locator_json)
            .bind(now)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                continue;
            }

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                .bind(&chunk.id)
                .bind(vec_to_blob(vector))
                .execute(&mut *tx)
                .await?;
            inserted += 1;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn search(&self, query_vec: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }

        let rows = sqlx::query("SELECT chunk_id, embedding FROM chunk_vectors")
            .fetch_all(&self.pool)
            .await?;

        let mut scored: Vec<(f64, String)> = rows
            .iter()
            .map(|row| {
                let chunk_id: String = row.get("chunk_id");
                let blob: Vec<u8> = row.get("embedding");
                let score = cosine_similarity(query_vec, &blob_to_vec(&blob)) as f64;
                (score, chunk_id)
            })
            .collect();
        scored.sort_by(|a, b| rank_order(a.0, &a.1, b.0, &b.1));
        scored.truncate(k);

        let mut results = Vec::with_capacity(scored.len());
        for (score, chunk_id) in scored {
            let row = sqlx::query(
                "SELECT id, document_id, source, chunk_index, text, hash, locator_json \
                 FROM chunks WHERE id = ?",
            )
            .bind(&chunk_id)
            .fetch_optional(&self.pool)
            .await?;
            if let Some(row) = row {
                results.push(ScoredChunk {
                    chunk: row_to_chunk(&row)?,
                    score,
                });
            }
        }
        Ok(results)
    }

    async fn count(&self) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }

    async fn documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            "SELECT document_id, source, COUNT(*) AS chunks FROM chunks \
             GROUP BY document_id, source ORDER BY source, document_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunks: i64 = row.get("chunks");
                DocumentSummary {
                    document_id: row.get("document_id"),
                    source: row.get("source"),
                    chunks: chunks as usize,
                }
            })
            .collect())
    }

    async fn contains_document(&self, document_id: &str) -> Result<bool> {
        let found: bool =
            sqlx::query_scalar("SELECT COUNT(*) > 0 FROM chunks WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(found)
    }

    async fn remove_source(&self, source: &str) -> Result<usize> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT id FROM chunks WHERE source = ?)",
        )
        .bind(source)
        .execute(&mut *tx)
        .await?;
        let removed = sqlx::query("DELETE FROM chunks WHERE source = ?")
            .bind(source)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;
        Ok(removed as usize)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM chunk_vectors")
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM chunks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM index_meta")
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }
}
