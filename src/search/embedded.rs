//! File-backed vector store.
//!
//! Chunks, metadata, and embeddings live in memory behind an `RwLock` and
//! are persisted as a single JSON file on every mutation. Ids are
//! monotonically increasing integers; a live instance never reuses one,
//! though numbering restarts after a reset.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::llm::Embedder;
use crate::models::{Chunk, ChunkRef, Metadata, SearchResult};
use crate::search::VectorStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct VectorEntry {
    id: u64,
    content: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

struct Inner {
    entries: Vec<VectorEntry>,
    next_id: u64,
}

pub struct EmbeddedStore {
    inner: RwLock<Inner>,
    persist_path: PathBuf,
    embedder: Arc<dyn Embedder>,
}

impl EmbeddedStore {
    pub fn open(dir: &Path, embedder: Arc<dyn Embedder>) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let persist_path = dir.join("vectors.json");

        let entries: Vec<VectorEntry> = if persist_path.exists() {
            let data = std::fs::read_to_string(&persist_path)?;
            serde_json::from_str(&data).unwrap_or_default()
        } else {
            Vec::new()
        };

        let next_id = entries.iter().map(|e| e.id).max().map_or(1, |max| max + 1);

        Ok(Self {
            inner: RwLock::new(Inner { entries, next_id }),
            persist_path,
            embedder,
        })
    }

    fn save(&self, entries: &[VectorEntry]) -> Result<()> {
        let data = serde_json::to_string(entries)?;
        std::fs::write(&self.persist_path, data)?;
        Ok(())
    }
}

#[async_trait]
impl VectorStore for EmbeddedStore {
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

        // Embed outside the lock; the write below is the only critical part.
        let embeddings = self.embedder.embed(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(Error::Transient(format!(
                "embedding count mismatch: expected {}, got {}",
                texts.len(),
                embeddings.len()
            )));
        }

        let mut inner = self.inner.write();
        let mut refs = Vec::with_capacity(texts.len());
        for (text, embedding) in texts.iter().zip(embeddings) {
            let id = inner.next_id;
            inner.next_id += 1;
            inner.entries.push(VectorEntry {
                id,
                content: text.clone(),
                metadata: metadata.clone(),
                embedding,
            });
            refs.push(ChunkRef {
                id: id.to_string(),
                metadata: metadata.clone(),
            });
        }
        self.save(&inner.entries)?;

        Ok(refs)
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let query_embedding = self.embedder.embed_one(query).await?;

        let inner = self.inner.read();
        let mut scored: Vec<(f32, &VectorEntry)> = inner
            .entries
            .iter()
            .map(|e| (cosine_similarity(&query_embedding, &e.embedding), e))
            .collect();

        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(score, e)| SearchResult {
                id: e.id.to_string(),
                content: e.content.clone(),
                metadata: e.metadata.clone(),
                similarity: score,
                vector_score: score,
                bm25_score: 0.0,
            })
            .collect())
    }

    async fn get(&self, id: &str) -> Result<Chunk> {
        let parsed: u64 = id
            .parse()
            .map_err(|_| Error::NotFound(format!("chunk {id}")))?;
        let inner = self.inner.read();
        inner
            .entries
            .iter()
            .find(|e| e.id == parsed)
            .map(|e| Chunk {
                id: e.id.to_string(),
                content: e.content.clone(),
                metadata: e.metadata.clone(),
            })
            .ok_or_else(|| Error::NotFound(format!("chunk {id}")))
    }

    async fn delete(
        &self,
        where_meta: &Metadata,
        where_docs: &Metadata,
        ids: &[String],
    ) -> Result<()> {
        let mut inner = self.inner.write();

        if !ids.is_empty() {
            let targets: Vec<u64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            inner.entries.retain(|e| !targets.contains(&e.id));
        } else if !where_meta.is_empty() || !where_docs.is_empty() {
            inner.entries.retain(|e| {
                let meta_match = where_meta
                    .iter()
                    .all(|(k, v)| e.metadata.get(k) == Some(v));
                let doc_match = where_docs.values().all(|v| e.content.contains(v.as_str()));
                !(meta_match && doc_match)
            });
        } else {
            return Ok(());
        }

        self.save(&inner.entries)
    }

    async fn reset(&self) -> Result<()> {
        let mut inner = self.inner.write();
        inner.entries.clear();
        inner.next_id = 1;
        self.save(&inner.entries)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.inner.read().entries.len())
    }

    async fn embedding_dimension(&self) -> Result<usize> {
        let inner = self.inner.read();
        inner
            .entries
            .first()
            .map(|e| e.embedding.len())
            .ok_or_else(|| Error::Invalid("no chunks stored".to_string()))
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
