use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where state files, copied assets, and embedded indexes are stored
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Vector backend: "embedded", "postgres", or "remote"
    pub backend: String,
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,
    /// Hybrid score-fusion weights
    pub hybrid: HybridConfig,
    /// Chunker defaults applied to every collection
    pub chunking: ChunkingConfig,
    /// Postgres connection URL (postgres backend only)
    pub database_url: Option<String>,
    /// Remote vector-store endpoint (remote backend only)
    pub remote_url: Option<String>,
    /// API key for the remote vector store
    pub remote_api_key: Option<String>,
    /// Base64-encoded SSH private key for cloning git sources
    pub git_ssh_key: Option<String>,
    /// When true, RemoveEntry rebuilds the collection instead of deleting
    /// individual chunks. For backends without per-chunk delete.
    pub legacy_delete: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Base URL of an OpenAI-compatible embeddings endpoint
    pub base_url: String,
    /// API key (only needed for hosted providers)
    pub api_key: Option<String>,
    /// Model name sent with every request
    pub model: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HybridConfig {
    pub vector_weight: f32,
    pub bm25_weight: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum bytes per chunk
    pub max_size: usize,
    /// Word-aligned overlap between consecutive chunks, in bytes
    pub overlap: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "127.0.0.1:9000".to_string(),
            backend: "embedded".to_string(),
            embedding: EmbeddingConfig::default(),
            hybrid: HybridConfig::default(),
            chunking: ChunkingConfig::default(),
            database_url: None,
            remote_url: None,
            remote_api_key: None,
            git_ssh_key: None,
            legacy_delete: false,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            api_key: None,
            model: "all-minilm-l6-v2".to_string(),
        }
    }
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            vector_weight: 0.5,
            bm25_weight: 0.5,
        }
    }
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_size: 1000,
            overlap: 0,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("KB_SEARCH_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Ok(addr) = std::env::var("KB_SEARCH_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(backend) = std::env::var("KB_SEARCH_BACKEND") {
            config.backend = backend;
        }
        if let Ok(url) = std::env::var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Ok(key) = std::env::var("EMBEDDING_API_KEY") {
            config.embedding.api_key = Some(key);
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Ok(val) = std::env::var("HYBRID_VECTOR_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.hybrid.vector_weight = v;
            }
        }
        if let Ok(val) = std::env::var("HYBRID_BM25_WEIGHT") {
            if let Ok(v) = val.parse() {
                config.hybrid.bm25_weight = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNK_MAX_SIZE") {
            if let Ok(v) = val.parse() {
                config.chunking.max_size = v;
            }
        }
        if let Ok(val) = std::env::var("CHUNK_OVERLAP") {
            if let Ok(v) = val.parse() {
                config.chunking.overlap = v;
            }
        }
        if let Ok(url) = std::env::var("DATABASE_URL") {
            config.database_url = Some(url);
        }
        if let Ok(url) = std::env::var("KB_SEARCH_REMOTE_URL") {
            config.remote_url = Some(url);
        }
        if let Ok(key) = std::env::var("KB_SEARCH_REMOTE_API_KEY") {
            config.remote_api_key = Some(key);
        }
        if let Ok(key) = std::env::var("KB_SEARCH_GIT_SSH_KEY") {
            config.git_ssh_key = Some(key);
        }
        if let Ok(val) = std::env::var("KB_SEARCH_LEGACY_DELETE") {
            config.legacy_delete = val == "true" || val == "1";
        }

        config
    }

    /// Directory holding `collection-<name>.json` state files.
    pub fn db_dir(&self) -> PathBuf {
        self.data_dir.join("collections")
    }

    /// Per-collection directory of copied original files.
    pub fn asset_dir(&self, collection: &str) -> PathBuf {
        self.data_dir.join("assets").join(collection)
    }

    /// Per-collection directory for embedded vector + lexical indexes.
    pub fn index_dir(&self, collection: &str) -> PathBuf {
        self.data_dir.join("index").join(collection)
    }
}
