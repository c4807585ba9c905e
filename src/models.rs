use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Chunk metadata: free-form string pairs. The engine reserves the keys
/// `source` (entry basename) and `type`; `title` and `url` are preserved
/// when supplied by the caller.
pub type Metadata = HashMap<String, String>;

/// A chunk reference recorded in a collection's index: the store-assigned
/// id plus the metadata it was stored with. Field names match the
/// persisted state-file format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRef {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "Metadata", default)]
    pub metadata: Metadata,
}

/// A stored chunk as returned by `get`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
}

/// A single ranked search result. `similarity` is the fused score after
/// hybrid weighting; the raw per-side scores ride along for rerankers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub id: String,
    pub content: String,
    pub metadata: Metadata,
    pub similarity: f32,
    #[serde(default)]
    pub vector_score: f32,
    #[serde(default)]
    pub bm25_score: f32,
}

/// A lexical (BM25) hit. `score` is normalized to [0, 1].
#[derive(Debug, Clone)]
pub struct LexicalHit {
    pub id: String,
    pub content: String,
    pub title: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// A URL periodically refetched into a collection. Field names match the
/// persisted state-file format; the interval is stored as whole seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSource {
    #[serde(rename = "URL")]
    pub url: String,
    #[serde(rename = "UpdateInterval")]
    pub update_interval_secs: u64,
    #[serde(rename = "LastUpdate", default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl ExternalSource {
    pub fn update_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.update_interval_secs)
    }

    /// Whether the source is due for a refresh at `now`.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        match self.last_update {
            None => true,
            Some(last) => {
                let elapsed = now.signed_duration_since(last);
                elapsed.num_seconds() >= self.update_interval_secs as i64
            }
        }
    }
}

// ─── API request types ───────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct CreateCollectionRequest {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub max_results: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveEntryRequest {
    pub entry: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddSourceRequest {
    pub url: String,
    /// Update interval in minutes; values below 1 default to 60.
    #[serde(default)]
    pub update_interval: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoveSourceRequest {
    pub url: String,
}
