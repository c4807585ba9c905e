//! OpenAI-compatible embeddings client.
//!
//! Works against any `/v1/embeddings` endpoint (LocalAI, llama.cpp server,
//! OpenAI itself). Requests are batched; failures surface as transient
//! errors so callers may retry.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use crate::llm::Embedder;

/// Texts per request. Large ingests are split into consecutive calls.
const BATCH_SIZE: usize = 64;

pub struct OpenAiEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

#[derive(Serialize)]
struct EmbedRequest {
    model: String,
    input: Vec<String>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedData>,
}

#[derive(Deserialize)]
struct EmbedData {
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn new(client: reqwest::Client, config: EmbeddingConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/v1/embeddings", self.config.base_url);
        let mut all_embeddings = Vec::with_capacity(texts.len());

        for chunk in texts.chunks(BATCH_SIZE) {
            let req = EmbedRequest {
                model: self.config.model.clone(),
                input: chunk.to_vec(),
            };

            let mut request = self.client.post(&url).json(&req);
            if let Some(key) = &self.config.api_key {
                request = request.header("Authorization", format!("Bearer {key}"));
            }

            let resp = request
                .send()
                .await
                .map_err(|e| Error::Transient(format!("embeddings request failed: {e}")))?;

            if !resp.status().is_success() {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                return Err(Error::Transient(format!(
                    "embeddings API returned {status}: {body}"
                )));
            }

            let body: EmbedResponse = resp
                .json()
                .await
                .map_err(|e| Error::Transient(format!("bad embeddings response: {e}")))?;

            if body.data.len() != chunk.len() {
                return Err(Error::Transient(format!(
                    "embedding count mismatch: expected {}, got {}",
                    chunk.len(),
                    body.data.len()
                )));
            }

            all_embeddings.extend(body.data.into_iter().map(|d| d.embedding));
        }

        Ok(all_embeddings)
    }
}
