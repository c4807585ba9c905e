//! Hybrid index: one write path, two indexes, fused reads.
//!
//! Writes land in the vector store first; a vector failure fails the call
//! because vector presence is the source of truth. The lexical side is
//! best-effort on every write and delete so a corrupt lexical index can
//! never block ingestion. Searches pull `2k` candidates from each side and
//! fuse them with weighted linear scoring.

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::HybridConfig;
use crate::error::Result;
use crate::models::{Chunk, ChunkRef, Metadata, SearchResult};
use crate::search::{LexicalStore, VectorStore};

pub struct HybridIndex {
    vectors: Arc<dyn VectorStore>,
    lexical: Option<Box<dyn LexicalStore>>,
    weights: HybridConfig,
}

impl HybridIndex {
    pub fn new(
        vectors: Arc<dyn VectorStore>,
        lexical: Option<Box<dyn LexicalStore>>,
        weights: HybridConfig,
    ) -> Self {
        Self {
            vectors,
            lexical,
            weights,
        }
    }

    fn title_for(metadata: &Metadata) -> String {
        metadata
            .get("title")
            .or_else(|| metadata.get("source"))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn store(&self, text: &str, metadata: &Metadata) -> Result<ChunkRef> {
        let chunk_ref = self.vectors.store(text, metadata).await?;

        if let Some(lexical) = &self.lexical {
            let title = Self::title_for(metadata);
            if let Err(e) = lexical.index(&chunk_ref.id, text, &title, metadata).await {
                tracing::warn!("Failed to index chunk {} in lexical store: {e}", chunk_ref.id);
            }
        }

        Ok(chunk_ref)
    }

    pub async fn store_batch(&self, texts: &[String], metadata: &Metadata) -> Result<Vec<ChunkRef>> {
        let refs = self.vectors.store_batch(texts, metadata).await?;

        if let Some(lexical) = &self.lexical {
            let title = Self::title_for(metadata);
            for (chunk_ref, text) in refs.iter().zip(texts) {
                if let Err(e) = lexical.index(&chunk_ref.id, text, &title, metadata).await {
                    tracing::warn!(
                        "Failed to index chunk {} in lexical store: {e}",
                        chunk_ref.id
                    );
                }
            }
        }

        Ok(refs)
    }

    pub async fn delete(
        &self,
        where_meta: &Metadata,
        where_docs: &Metadata,
        ids: &[String],
    ) -> Result<()> {
        self.vectors.delete(where_meta, where_docs, ids).await?;

        if let Some(lexical) = &self.lexical {
            if !ids.is_empty() {
                if let Err(e) = lexical.remove(ids).await {
                    tracing::warn!("Failed to delete from lexical store: {e}");
                }
            } else if !where_meta.is_empty() || !where_docs.is_empty() {
                tracing::warn!("Lexical delete by metadata filter not supported; stale lexical entries possible until the next replace or reset");
            }
        }

        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.vectors.reset().await?;
        if let Some(lexical) = &self.lexical {
            if let Err(e) = lexical.reset().await {
                tracing::warn!("Failed to reset lexical store: {e}");
            }
        }
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Chunk> {
        self.vectors.get(id).await
    }

    pub async fn count(&self) -> Result<usize> {
        self.vectors.count().await
    }

    pub async fn embedding_dimension(&self) -> Result<usize> {
        self.vectors.embedding_dimension().await
    }

    /// Hybrid search: cosine candidates and BM25 candidates fused by id
    /// with `w_vec * sim + w_lex * score`, sorted descending, cut to `k`.
    /// When the lexical side is missing or errors, the vector results are
    /// returned unchanged.
    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let vector_results = self.vectors.search(query, k * 2).await?;

        let lexical = match &self.lexical {
            Some(lexical) => lexical,
            None => {
                let mut results = vector_results;
                results.truncate(k);
                return Ok(results);
            }
        };

        let lexical_hits = match lexical.search(query, k * 2).await {
            Ok(hits) => hits,
            Err(e) => {
                tracing::warn!("Lexical search failed, falling back to vector-only: {e}");
                let mut results = vector_results;
                results.truncate(k);
                return Ok(results);
            }
        };

        let w_vec = self.weights.vector_weight;
        let w_lex = self.weights.bm25_weight;

        let mut lexical_by_id: HashMap<String, crate::models::LexicalHit> = lexical_hits
            .into_iter()
            .map(|h| (h.id.clone(), h))
            .collect();

        let mut fused: Vec<SearchResult> = Vec::with_capacity(vector_results.len());
        for mut result in vector_results {
            match lexical_by_id.remove(&result.id) {
                Some(hit) => {
                    result.bm25_score = hit.score;
                    result.similarity = w_vec * result.vector_score + w_lex * hit.score;
                }
                None => {
                    result.similarity = w_vec * result.vector_score;
                }
            }
            fused.push(result);
        }

        // Hits the vector pass missed: rebuild content and metadata from
        // the lexical store's stored fields.
        for (id, hit) in lexical_by_id {
            let mut metadata = hit.metadata;
            if !hit.title.is_empty() {
                metadata
                    .entry("title".to_string())
                    .or_insert_with(|| hit.title.clone());
            }
            fused.push(SearchResult {
                id,
                content: hit.content,
                metadata,
                similarity: w_lex * hit.score,
                vector_score: 0.0,
                bm25_score: hit.score,
            });
        }

        fused.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        fused.truncate(k);
        Ok(fused)
    }
}
