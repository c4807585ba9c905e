//! Storage contracts and backends for hybrid retrieval.
//!
//! Every chunk lives in a vector store ([`VectorStore`]) and, best-effort,
//! in a lexical store ([`LexicalStore`]). The [`hybrid::HybridIndex`] fans
//! writes to both and fuses their scores on read.
//!
//! | Backend | Vector | Lexical |
//! |---------|--------|---------|
//! | `embedded` | JSON-file store ([`embedded`]) | tantivy ([`bm25`]) |
//! | `postgres` | pgvector table ([`postgres`]) | tsvector over the same rows |
//! | `remote` | stores-API client ([`remote`]) | none (vector-only) |

pub mod bm25;
pub mod embedded;
pub mod hybrid;
pub mod postgres;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::Embedder;
use crate::models::{Chunk, ChunkRef, LexicalHit, Metadata, SearchResult};

/// Persistent chunk storage with embedding-based nearest-neighbor search.
///
/// Ids are assigned by the store and returned as strings. The embedded
/// backend never reuses an id within a live instance; relational backends
/// may hand a deleted id to a new row, which is why replacement always
/// deletes before inserting.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Embed `text` and persist it with `metadata`. Empty text is invalid.
    async fn store(&self, text: &str, metadata: &Metadata) -> Result<ChunkRef>;

    /// Batch variant of [`store`](Self::store); ids preserve input order.
    async fn store_batch(&self, texts: &[String], metadata: &Metadata) -> Result<Vec<ChunkRef>>;

    /// K-nearest-neighbor search by cosine similarity, descending.
    async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>>;

    /// Fetch a chunk by id. NotFound when absent.
    async fn get(&self, id: &str) -> Result<Chunk>;

    /// Delete by id list, by metadata equality filter, or by document
    /// substring filter. An empty call deletes nothing.
    async fn delete(&self, where_meta: &Metadata, where_docs: &Metadata, ids: &[String])
        -> Result<()>;

    /// Drop every chunk. The collection keeps existing.
    async fn reset(&self) -> Result<()>;

    async fn count(&self) -> Result<usize>;

    /// Dimensionality of the persisted embeddings. Invalid when empty.
    async fn embedding_dimension(&self) -> Result<usize>;
}

/// BM25-style ranked text retrieval, keyed by the vector store's chunk ids.
///
/// Writes and deletes are best-effort from the hybrid index's point of
/// view: a broken lexical store degrades search to vector-only but never
/// corrupts ingestion.
#[async_trait]
pub trait LexicalStore: Send + Sync {
    async fn index(&self, id: &str, content: &str, title: &str, metadata: &Metadata)
        -> Result<()>;

    async fn remove(&self, ids: &[String]) -> Result<()>;

    async fn reset(&self) -> Result<()>;

    /// Top-k hits with scores normalized to [0, 1].
    async fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>>;
}

/// Open the hybrid index for `collection` using the configured backend.
pub async fn open_hybrid(
    config: &Config,
    collection: &str,
    embedder: Arc<dyn Embedder>,
) -> Result<hybrid::HybridIndex> {
    match config.backend.as_str() {
        "embedded" => {
            let index_dir = config.index_dir(collection);
            let vectors = embedded::EmbeddedStore::open(&index_dir, embedder)?;
            let lexical = match bm25::Bm25Index::open_or_create(&index_dir.join("lexical")) {
                Ok(index) => Some(Box::new(index) as Box<dyn LexicalStore>),
                Err(e) => {
                    tracing::warn!("Failed to open lexical index, continuing vector-only: {e}");
                    None
                }
            };
            Ok(hybrid::HybridIndex::new(
                Arc::new(vectors),
                lexical,
                config.hybrid,
            ))
        }
        "postgres" => {
            let database_url = config.database_url.as_deref().ok_or_else(|| {
                Error::Invalid("DATABASE_URL is required for the postgres backend".to_string())
            })?;
            let store =
                postgres::PostgresStore::connect(database_url, collection, embedder).await?;
            let lexical = store.lexical();
            Ok(hybrid::HybridIndex::new(
                Arc::new(store),
                Some(Box::new(lexical)),
                config.hybrid,
            ))
        }
        "remote" => {
            let base_url = config.remote_url.as_deref().ok_or_else(|| {
                Error::Invalid("KB_SEARCH_REMOTE_URL is required for the remote backend".to_string())
            })?;
            let store = remote::RemoteStore::new(
                base_url.to_string(),
                config.remote_api_key.clone(),
                embedder,
            );
            tracing::warn!("Remote backend has no lexical index; search is vector-only");
            Ok(hybrid::HybridIndex::new(
                Arc::new(store),
                None,
                config.hybrid,
            ))
        }
        other => Err(Error::Invalid(format!("unknown vector backend: {other}"))),
    }
}
