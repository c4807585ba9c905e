//! Embedding provider abstraction.
//!
//! The engine talks to a single external embeddings RPC. Stores hold the
//! provider behind [`Embedder`] so tests can substitute a deterministic
//! implementation.

pub mod embeddings;

use async_trait::async_trait;

use crate::error::Result;

/// A thread-safe embedding provider.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, preserving input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text.
    async fn embed_one(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| crate::error::Error::Transient("no embedding returned".to_string()))
    }
}
