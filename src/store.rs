//! PostgreSQL vector store.
//!
//! Persists chunk rows in a single `chunks` table partitioned by
//! `(workspace_id, model)` and answers cosine-similarity queries. Two
//! embedding column layouts are supported:
//!
//! - **Native** — a pgvector `vector(N)` column. Ordering and the k-limit
//!   are pushed into the database with the cosine-distance operator; the
//!   query over-fetches `2·k` candidates and the similarity threshold prunes
//!   them afterwards.
//! - **Legacy** — a `jsonb` array column from older deployments. All rows
//!   matching the non-vector predicates are fetched and ranked in memory.
//!
//! The store also exposes the cross-process advisory lock that serializes
//! index updates per workspace. The lock key is derived from the workspace
//! id, so distinct workspaces never contend.

use std::collections::HashMap;

use pgvector::Vector;
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::{debug, warn};

use crate::embedding::cosine_similarity;
use crate::error::Result;
use crate::models::{ChunkMetadata, ModelStats, NewChunk, SearchHit};
use crate::workspace;

/// Layout of the `embedding` column, discovered by introspection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingColumn {
    /// pgvector `vector(N)`.
    Vector(usize),
    /// `jsonb` array of numbers (legacy deployments).
    Json,
}

pub struct VectorStore {
    pool: PgPool,
    workspace_id: String,
    model: String,
}

impl VectorStore {
    pub fn new(pool: PgPool, workspace_id: String, model: String) -> Self {
        VectorStore {
            pool,
            workspace_id,
            model,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    // ── Schema ───────────────────────────────────────────────────────────

    /// Create the extension, table, and indexes. Idempotent. The ANN index
    /// prefers HNSW and falls back to IVF-flat on servers whose pgvector
    /// predates HNSW support.
    pub async fn migrate(&self, dimension: usize) -> Result<()> {
        sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id BIGSERIAL PRIMARY KEY,
                workspace_id TEXT NOT NULL,
                path TEXT NOT NULL,
                mtime BIGINT NOT NULL,
                content TEXT NOT NULL,
                model TEXT NOT NULL,
                dimension INTEGER NOT NULL,
                embedding vector({dimension}) NOT NULL,
                metadata JSONB NOT NULL DEFAULT '{{}}'
            )
            "#
        ))
        .execute(&self.pool)
        .await?;

        for ddl in [
            "CREATE INDEX IF NOT EXISTS idx_chunks_workspace ON chunks(workspace_id)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_model ON chunks(model)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_dimension ON chunks(dimension)",
            "CREATE INDEX IF NOT EXISTS idx_chunks_path ON chunks(path)",
        ] {
            sqlx::query(ddl).execute(&self.pool).await?;
        }

        let hnsw = sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON chunks \
             USING hnsw (embedding vector_cosine_ops) WITH (m = 16, ef_construction = 64)",
        )
        .execute(&self.pool)
        .await;
        if let Err(e) = hnsw {
            warn!("HNSW index unavailable ({e}); falling back to IVF-flat");
            sqlx::query(
                "CREATE INDEX IF NOT EXISTS idx_chunks_embedding ON chunks \
                 USING ivfflat (embedding vector_cosine_ops) WITH (lists = 100)",
            )
            .execute(&self.pool)
            .await?;
        }

        Ok(())
    }

    /// Declared length of the vector column, or `None` when the table (or
    /// a native vector column) is absent. Indexing must not proceed unless
    /// this equals the embedding client's dimension.
    pub async fn schema_dimension(&self) -> Result<Option<usize>> {
        match self.embedding_column().await? {
            Some(EmbeddingColumn::Vector(dim)) => Ok(Some(dim)),
            _ => Ok(None),
        }
    }

    /// Introspect the `embedding` column layout.
    pub async fn embedding_column(&self) -> Result<Option<EmbeddingColumn>> {
        let row = sqlx::query(
            r#"
            SELECT format_type(a.atttypid, a.atttypmod) AS col_type, a.atttypmod AS typmod
            FROM pg_attribute a
            JOIN pg_class c ON a.attrelid = c.oid
            WHERE c.relname = 'chunks' AND a.attname = 'embedding' AND NOT a.attisdropped
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.and_then(|r| {
            let col_type: String = r.get("col_type");
            if col_type.starts_with("vector") {
                let typmod: i32 = r.get("typmod");
                // pgvector stores the declared dimension directly in atttypmod.
                (typmod > 0).then_some(EmbeddingColumn::Vector(typmod as usize))
            } else if col_type == "jsonb" || col_type == "json" {
                Some(EmbeddingColumn::Json)
            } else {
                None
            }
        }))
    }

    // ── Row bookkeeping (workspace + model scoped) ───────────────────────

    /// Distinct paths currently holding rows.
    pub async fn indexed_paths(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT path FROM chunks WHERE workspace_id = $1 AND model = $2",
        )
        .bind(&self.workspace_id)
        .bind(&self.model)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| r.get("path")).collect())
    }

    /// `path → max(mtime)` for the given paths.
    pub async fn mtimes_for(&self, paths: &[String]) -> Result<HashMap<String, i64>> {
        if paths.is_empty() {
            return Ok(HashMap::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT path, MAX(mtime) AS mtime
            FROM chunks
            WHERE workspace_id = $1 AND model = $2 AND path = ANY($3)
            GROUP BY path
            "#,
        )
        .bind(&self.workspace_id)
        .bind(&self.model)
        .bind(paths)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("path"), r.get("mtime")))
            .collect())
    }

    /// Delete all rows for any of the given paths.
    pub async fn delete_for(&self, paths: &[String]) -> Result<()> {
        if paths.is_empty() {
            return Ok(());
        }
        sqlx::query(
            "DELETE FROM chunks WHERE workspace_id = $1 AND model = $2 AND path = ANY($3)",
        )
        .bind(&self.workspace_id)
        .bind(&self.model)
        .bind(paths)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete all rows whose path is NOT in `keep`. An empty set clears the
    /// whole workspace+model partition.
    pub async fn delete_absent(&self, keep: &[String]) -> Result<()> {
        if keep.is_empty() {
            return self.clear_all().await;
        }
        sqlx::query(
            "DELETE FROM chunks WHERE workspace_id = $1 AND model = $2 AND NOT (path = ANY($3))",
        )
        .bind(&self.workspace_id)
        .bind(&self.model)
        .bind(keep)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete everything for this workspace+model.
    pub async fn clear_all(&self) -> Result<()> {
        sqlx::query("DELETE FROM chunks WHERE workspace_id = $1 AND model = $2")
            .bind(&self.workspace_id)
            .bind(&self.model)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Batch insert inside one transaction, so readers never observe a
    /// partially written batch.
    pub async fn insert(&self, rows: &[NewChunk]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO chunks (workspace_id, path, mtime, content, model, dimension, embedding, metadata)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(&self.workspace_id)
            .bind(&row.path)
            .bind(row.mtime_ms)
            .bind(&row.content)
            .bind(&self.model)
            .bind(row.embedding.len() as i32)
            .bind(Vector::from(row.embedding.clone()))
            .bind(serde_json::to_value(&row.metadata)?)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    // ── Similarity search ────────────────────────────────────────────────

    /// Top-`k` rows by cosine similarity at or above `min_similarity`,
    /// excluding skipped markers. `scope_files` restricts by exact path
    /// match when present.
    pub async fn similar(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
        scope_files: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        match self.embedding_column().await? {
            Some(EmbeddingColumn::Vector(_)) => {
                self.similar_native(query, k, min_similarity, scope_files).await
            }
            Some(EmbeddingColumn::Json) => {
                self.similar_legacy(query, k, min_similarity, scope_files).await
            }
            None => Ok(Vec::new()),
        }
    }

    async fn similar_native(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
        scope_files: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let scope: Option<Vec<String>> = scope_files.map(|s| s.to_vec());
        let rows = sqlx::query(
            r#"
            SELECT path, content, metadata, 1 - (embedding <=> $1) AS similarity
            FROM chunks
            WHERE workspace_id = $2
              AND model = $3
              AND COALESCE((metadata->>'skipped')::boolean, false) = false
              AND ($4::text[] IS NULL OR path = ANY($4))
            ORDER BY embedding <=> $1
            LIMIT $5
            "#,
        )
        .bind(Vector::from(query.to_vec()))
        .bind(&self.workspace_id)
        .bind(&self.model)
        .bind(scope)
        .bind((2 * k) as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let similarity: f64 = row.get("similarity");
            if (similarity as f32) < min_similarity {
                continue;
            }
            hits.push(hit_from_row(&row, similarity as f32)?);
        }
        hits.truncate(k);
        Ok(hits)
    }

    /// Legacy layout: no vector operators available, so rank in memory over
    /// every row that passes the non-vector predicates.
    async fn similar_legacy(
        &self,
        query: &[f32],
        k: usize,
        min_similarity: f32,
        scope_files: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let scope: Option<Vec<String>> = scope_files.map(|s| s.to_vec());
        let rows = sqlx::query(
            r#"
            SELECT path, content, metadata, embedding
            FROM chunks
            WHERE workspace_id = $1
              AND model = $2
              AND COALESCE((metadata->>'skipped')::boolean, false) = false
              AND ($3::text[] IS NULL OR path = ANY($3))
            "#,
        )
        .bind(&self.workspace_id)
        .bind(&self.model)
        .bind(scope)
        .fetch_all(&self.pool)
        .await?;

        debug!(candidates = rows.len(), "legacy similarity scan");

        let mut scored = Vec::new();
        for row in rows {
            let embedding: serde_json::Value = row.get("embedding");
            let stored: Vec<f32> = match serde_json::from_value(embedding) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let similarity = cosine_similarity(query, &stored);
            if similarity < min_similarity {
                continue;
            }
            scored.push(hit_from_row(&row, similarity)?);
        }

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(k);
        Ok(scored)
    }

    // ── Status ───────────────────────────────────────────────────────────

    /// Distinct paths holding rows for this workspace+model.
    pub async fn indexed_file_count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(DISTINCT path) FROM chunks WHERE workspace_id = $1 AND model = $2",
        )
        .bind(&self.workspace_id)
        .bind(&self.model)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Most recent source mtime among this partition's rows.
    pub async fn last_updated(&self) -> Result<Option<i64>> {
        let max: Option<i64> = sqlx::query_scalar(
            "SELECT MAX(mtime) FROM chunks WHERE workspace_id = $1 AND model = $2",
        )
        .bind(&self.workspace_id)
        .bind(&self.model)
        .fetch_one(&self.pool)
        .await?;
        Ok(max)
    }

    /// Row counts and payload sizes per embedding model in this workspace.
    /// Models version independently, so several may coexist.
    pub async fn per_model_stats(&self) -> Result<Vec<ModelStats>> {
        let rows = sqlx::query(
            r#"
            SELECT model, COUNT(*) AS row_count, COALESCE(SUM(LENGTH(content)), 0)::bigint AS total_data_bytes
            FROM chunks
            WHERE workspace_id = $1
            GROUP BY model
            ORDER BY model
            "#,
        )
        .bind(&self.workspace_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| ModelStats {
                model: r.get("model"),
                row_count: r.get("row_count"),
                total_data_bytes: r.get("total_data_bytes"),
            })
            .collect())
    }

    // ── Advisory lock ────────────────────────────────────────────────────

    /// Run `f` while holding the workspace's cross-process advisory lock.
    ///
    /// Blocks until any other holder (in this process or another) releases
    /// the lock. The lock is released on every exit path; if the unlock
    /// round-trip itself fails, the holding connection is detached from the
    /// pool and dropped so the server frees the lock with the session.
    pub async fn with_workspace_lock<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let key = workspace::lock_key(&self.workspace_id) as i64;
        let mut conn = self.pool.acquire().await?;

        sqlx::query("SELECT pg_advisory_lock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await?;
        debug!(key, workspace = %self.workspace_id, "acquired workspace lock");

        let result = f().await;

        let unlocked = sqlx::query("SELECT pg_advisory_unlock($1)")
            .bind(key)
            .execute(&mut *conn)
            .await;
        if unlocked.is_err() {
            warn!(key, "advisory unlock failed; dropping connection to force release");
            let _ = conn.detach();
        }

        result
    }
}

fn hit_from_row(row: &sqlx::postgres::PgRow, similarity: f32) -> Result<SearchHit> {
    let metadata: serde_json::Value = row.get("metadata");
    let metadata: ChunkMetadata = serde_json::from_value(metadata).unwrap_or_default();
    Ok(SearchHit {
        path: row.get("path"),
        content: row.get("content"),
        similarity,
        start_line: metadata.start_line,
        end_line: metadata.end_line,
    })
}

// Store behavior against a live database is covered by the integration
// suite in tests/store_postgres.rs, gated on SEMDEX_TEST_DATABASE_URL.
