//! Remote vector-store client.
//!
//! Talks to a stores-style HTTP API (`/stores/set`, `/stores/find`) that
//! accepts raw key/value pairs and returns nearest neighbors. The service
//! exposes no ids, no deletion, and no reset, so those operations signal
//! `Unsupported`; collections on this backend should run with the
//! legacy-delete toggle and are repopulated on startup.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::llm::Embedder;
use crate::models::{Chunk, ChunkRef, Metadata, SearchResult};
use crate::search::VectorStore;

pub struct RemoteStore {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    embedder: Arc<dyn Embedder>,
    // Placeholder ids: the service has none, but the collection index
    // still records one per chunk.
    next_id: AtomicU64,
}

#[derive(Serialize)]
struct SetRequest {
    keys: Vec<Vec<f32>>,
    values: Vec<String>,
}

#[derive(Serialize)]
struct FindRequest {
    key: Vec<f32>,
    topk: usize,
}

#[derive(Deserialize)]
struct FindResponse {
    #[serde(default)]
    values: Vec<String>,
    #[serde(default)]
    similarities: Vec<f32>,
}

impl RemoteStore {
    pub fn new(base_url: String, api_key: Option<String>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
            embedder,
            next_id: AtomicU64::new(1),
        }
    }

    async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<reqwest::Response> {
        let mut request = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {key}"));
        }

        let resp = request
            .send()
            .await
            .map_err(|e| Error::Transient(format!("remote store request failed: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Transient(format!(
                "remote store returned {status}: {body}"
            )));
        }
        Ok(resp)
    }
}

#[async_trait]
impl VectorStore for RemoteStore {
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
        self.post(
            "/stores/set",
            &SetRequest {
                keys: embeddings,
                values: texts.to_vec(),
            },
        )
        .await?;

        Ok(texts
            .iter()
            .map(|_| ChunkRef {
                id: self.next_id.fetch_add(1, Ordering::Relaxed).to_string(),
                metadata: metadata.clone(),
            })
            .collect())
    }

    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let key = self.embedder.embed_one(query).await?;
        let resp = self.post("/stores/find", &FindRequest { key, topk: k }).await?;

        let body: FindResponse = resp
            .json()
            .await
            .map_err(|e| Error::Transient(format!("bad remote store response: {e}")))?;

        Ok(body
            .values
            .into_iter()
            .zip(body.similarities)
            .map(|(content, similarity)| SearchResult {
                id: String::new(),
                content,
                metadata: Metadata::new(),
                similarity,
                vector_score: similarity,
                bm25_score: 0.0,
            })
            .collect())
    }

    async fn get(&self, _id: &str) -> Result<Chunk> {
        Err(Error::Unsupported(
            "remote store cannot fetch by id".to_string(),
        ))
    }

    async fn delete(&self, _w: &Metadata, _d: &Metadata, _ids: &[String]) -> Result<()> {
        Err(Error::Unsupported("remote store cannot delete".to_string()))
    }

    async fn reset(&self) -> Result<()> {
        Err(Error::Unsupported("remote store cannot reset".to_string()))
    }

    async fn count(&self) -> Result<usize> {
        Err(Error::Unsupported("remote store cannot count".to_string()))
    }

    async fn embedding_dimension(&self) -> Result<usize> {
        Err(Error::Unsupported(
            "remote store cannot report dimensions".to_string(),
        ))
    }
}
