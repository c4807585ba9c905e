//! Relational backend: one Postgres table per collection.
//!
//! Rows carry the chunk text, JSONB metadata, a `tsvector` column for
//! lexical ranking, and a pgvector embedding column sized from a probe
//! embedding at connect time. Ids are SERIAL and may be reused after
//! deletion, which is why the collection always deletes old chunks before
//! inserting replacements.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::llm::Embedder;
use crate::models::{Chunk, ChunkRef, LexicalHit, Metadata, SearchResult};
use crate::search::{LexicalStore, VectorStore};

pub struct PostgresStore {
    pool: PgPool,
    collection: String,
    table: String,
    embedder: Arc<dyn Embedder>,
    dims: usize,
}

impl PostgresStore {
    pub async fn connect(
        database_url: &str,
        collection: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .map_err(|e| Error::Internal(format!("failed to connect to postgres: {e}")))?;

        // Probe the embedder to size the vector column.
        let probe = embedder.embed_one("test").await?;
        let dims = probe.len();

        let store = Self {
            pool,
            collection: collection.to_string(),
            table: sanitize_table_name(collection),
            embedder,
            dims,
        };
        store.setup_database().await?;
        Ok(store)
    }

    pub fn lexical(&self) -> PostgresLexical {
        PostgresLexical {
            pool: self.pool.clone(),
            table: self.table.clone(),
        }
    }

    async fn setup_database(&self) -> Result<()> {
        if let Err(e) = sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
            .execute(&self.pool)
            .await
        {
            tracing::warn!("Failed to enable vector extension (may already exist): {e}");
        }

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS collection_config (
                collection_name TEXT PRIMARY KEY,
                embedding_model TEXT NOT NULL DEFAULT '',
                embedding_dimensions INTEGER NOT NULL,
                created_at TIMESTAMPTZ DEFAULT NOW(),
                updated_at TIMESTAMPTZ DEFAULT NOW()
            )",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to create collection_config: {e}")))?;

        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id SERIAL PRIMARY KEY,
                title TEXT,
                content TEXT NOT NULL,
                metadata JSONB,
                search_vector TSVECTOR,
                embedding VECTOR({dims})
            )",
            table = self.table,
            dims = self.dims
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to create documents table: {e}")))?;

        // Dimensions are recorded only on first sight; a mismatch against a
        // live probe is detected by the collection, which resets and
        // repopulates through us.
        sqlx::query(
            "INSERT INTO collection_config (collection_name, embedding_dimensions)
             VALUES ($1, $2)
             ON CONFLICT (collection_name) DO NOTHING",
        )
        .bind(&self.collection)
        .bind(self.dims as i32)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to record collection config: {e}")))?;

        if let Err(e) = sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_search ON {table} USING GIN(search_vector)",
            table = self.table
        ))
        .execute(&self.pool)
        .await
        {
            tracing::warn!("Failed to create GIN index: {e}");
        }

        if let Err(e) = sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_embedding ON {table}
             USING hnsw(embedding vector_cosine_ops)",
            table = self.table
        ))
        .execute(&self.pool)
        .await
        {
            tracing::warn!("Failed to create HNSW index: {e}");
        }

        Ok(())
    }

    fn row_to_chunk(row: &sqlx::postgres::PgRow) -> Chunk {
        let id: String = row.get("id");
        let title: String = row.get("title");
        let content: String = row.get("content");
        let metadata_json: String = row.get("metadata");
        let mut metadata: Metadata = serde_json::from_str(&metadata_json).unwrap_or_default();
        if !title.is_empty() {
            metadata.entry("title".to_string()).or_insert(title);
        }
        Chunk {
            id,
            content,
            metadata,
        }
    }
}

#[async_trait]
impl VectorStore for PostgresStore {
    async fn store(&self, text: &str, metadata: &Metadata) -> Result<ChunkRef> {
        let mut refs = self.store_batch(&[text.to_string()], metadata).await?;
        refs.pop()
            .ok_or_else(|| Error::Internal("store returned no id".to_string()))
    }

    async fn store_batch(&self, texts: &[String], metadata: &Metadata) -> Result<Vec<ChunkRef>> {
        if texts.is_empty() {
            return Err(Error::Invalid("empty batch".to_string()));
        }
        if texts.iter().any(|t| t.is_empty()) {
            return Err(Error::Invalid("empty text".to_string()));
        }

        let embeddings = self.embedder.embed(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(Error::Transient(format!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let title = metadata
            .get("title")
            .or_else(|| metadata.get("source"))
            .cloned()
            .unwrap_or_default();
        let metadata_json = serde_json::to_string(metadata)?;

        let mut refs = Vec::with_capacity(texts.len());
        for (text, embedding) in texts.iter().zip(&embeddings) {
            let row = sqlx::query(&format!(
                "INSERT INTO {table} (title, content, metadata, search_vector, embedding)
                 VALUES ($1, $2, $3::jsonb,
                         to_tsvector('english', COALESCE($1, '') || ' ' || $2),
                         $4::vector)
                 RETURNING id::text AS id",
                table = self.table
            ))
            .bind(&title)
            .bind(text)
            .bind(&metadata_json)
            .bind(format_vector(embedding))
            .fetch_one(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("failed to insert chunk: {e}")))?;

            refs.push(ChunkRef {
                id: row.get("id"),
                metadata: metadata.clone(),
            });
        }

        Ok(refs)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed_one(query).await?;
        let vector_literal = format_vector(&query_embedding);

        let rows = sqlx::query(&format!(
            "SELECT id::text AS id,
                    COALESCE(title, '') AS title,
                    content,
                    COALESCE(metadata::text, '{{}}') AS metadata,
                    (1 - (embedding <=> $1::vector)) AS similarity
             FROM {table}
             WHERE embedding IS NOT NULL
             ORDER BY embedding <=> $1::vector
             LIMIT $2",
            table = self.table
        ))
        .bind(&vector_literal)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("vector search failed: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| {
                let chunk = Self::row_to_chunk(row);
                let similarity: f64 = row.get("similarity");
                SearchResult {
                    id: chunk.id,
                    content: chunk.content,
                    metadata: chunk.metadata,
                    similarity: similarity as f32,
                    vector_score: similarity as f32,
                    bm25_score: 0.0,
                }
            })
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Chunk> {
        let parsed: i32 = id
            .parse()
            .map_err(|_| Error::NotFound(format!("chunk {id}")))?;

        let row = sqlx::query(&format!(
            "SELECT id::text AS id,
                    COALESCE(title, '') AS title,
                    content,
                    COALESCE(metadata::text, '{{}}') AS metadata
             FROM {table}
             WHERE id = $1",
            table = self.table
        ))
        .bind(parsed)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to get chunk: {e}")))?;

        row.map(|r| Self::row_to_chunk(&r))
            .ok_or_else(|| Error::NotFound(format!("chunk {id}")))
    }

    async fn delete(
        &self,
        where_meta: &Metadata,
        where_docs: &Metadata,
        ids: &[String],
    ) -> Result<()> {
        if !ids.is_empty() {
            let parsed: Vec<i32> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            if parsed.is_empty() {
                return Ok(());
            }
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE id = ANY($1)",
                table = self.table
            ))
            .bind(&parsed)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("failed to delete by ids: {e}")))?;
            return Ok(());
        }

        if where_meta.is_empty() && where_docs.is_empty() {
            return Ok(());
        }

        let mut conditions = Vec::new();
        let mut arg_idx = 1usize;
        for _ in where_meta {
            conditions.push(format!("metadata->>${} = ${}", arg_idx, arg_idx + 1));
            arg_idx += 2;
        }
        for _ in where_docs {
            conditions.push(format!("content LIKE '%' || ${arg_idx} || '%'"));
            arg_idx += 1;
        }

        let sql = format!(
            "DELETE FROM {table} WHERE {cond}",
            table = self.table,
            cond = conditions.join(" AND ")
        );
        let mut query = sqlx::query(&sql);
        for (k, v) in where_meta {
            query = query.bind(k).bind(v);
        }
        for v in where_docs.values() {
            query = query.bind(v);
        }
        query
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("failed to delete by filter: {e}")))?;

        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        sqlx::query(&format!(
            "DROP TABLE IF EXISTS {table} CASCADE",
            table = self.table
        ))
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to drop table: {e}")))?;

        sqlx::query("DELETE FROM collection_config WHERE collection_name = $1")
            .bind(&self.collection)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("failed to delete collection config: {e}")))?;

        self.setup_database().await
    }

    async fn count(&self) -> Result<usize> {
        let row = sqlx::query(&format!(
            "SELECT COUNT(*) AS count FROM {table}",
            table = self.table
        ))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to count chunks: {e}")))?;
        let count: i64 = row.get("count");
        Ok(count as usize)
    }

    async fn embedding_dimension(&self) -> Result<usize> {
        if self.count().await? == 0 {
            return Err(Error::Invalid("no chunks stored".to_string()));
        }

        let config_row = sqlx::query(
            "SELECT embedding_dimensions FROM collection_config WHERE collection_name = $1",
        )
        .bind(&self.collection)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to read collection config: {e}")))?;

        if let Some(row) = config_row {
            let dims: i32 = row.get("embedding_dimensions");
            return Ok(dims as usize);
        }

        let row = sqlx::query(&format!(
            "SELECT vector_dims(embedding) AS dims FROM {table}
             WHERE embedding IS NOT NULL LIMIT 1",
            table = self.table
        ))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("failed to probe dimensions: {e}")))?;

        match row {
            Some(row) => {
                let dims: i32 = row.get("dims");
                Ok(dims as usize)
            }
            None => Err(Error::Invalid("no chunks stored".to_string())),
        }
    }
}

/// Lexical view over the same rows: the INSERT already populates
/// `search_vector`, so writes and deletes here are no-ops and only ranked
/// retrieval does work.
pub struct PostgresLexical {
    pool: PgPool,
    table: String,
}

#[async_trait]
impl LexicalStore for PostgresLexical {
    async fn index(&self, _id: &str, _content: &str, _title: &str, _metadata: &Metadata)
        -> Result<()> {
        Ok(())
    }

    async fn remove(&self, _ids: &[String]) -> Result<()> {
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        Ok(())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>> {
        let rows = sqlx::query(&format!(
            "SELECT id::text AS id,
                    COALESCE(title, '') AS title,
                    content,
                    COALESCE(metadata::text, '{{}}') AS metadata,
                    ts_rank(search_vector, plainto_tsquery('english', $1)) AS score
             FROM {table}
             WHERE search_vector @@ plainto_tsquery('english', $1)
             ORDER BY score DESC
             LIMIT $2",
            table = self.table
        ))
        .bind(query)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Internal(format!("lexical search failed: {e}")))?;

        Ok(rows
            .iter()
            .map(|row| {
                let metadata_json: String = row.get("metadata");
                let score: f32 = row.get("score");
                LexicalHit {
                    id: row.get("id"),
                    content: row.get("content"),
                    title: row.get("title"),
                    metadata: serde_json::from_str(&metadata_json).unwrap_or_default(),
                    score: score.min(1.0),
                }
            })
            .collect())
    }
}

/// Render an embedding as a pgvector literal: `[0.1,0.2,...]`.
fn format_vector(vec: &[f32]) -> String {
    let parts: Vec<String> = vec.iter().map(|v| format!("{v:.6}")).collect();
    format!("[{}]", parts.join(","))
}

/// Collection names become table names, so restrict to `[a-z0-9_]` and
/// ensure a leading letter.
fn sanitize_table_name(name: &str) -> String {
    let mut sanitized: String = name
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if !sanitized.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        sanitized = format!("col_{sanitized}");
    }
    format!("documents_{sanitized}")
}
