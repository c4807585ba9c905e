//! End-to-end tests for the collection engine on the embedded backend.
//!
//! A deterministic hashed bag-of-words embedder stands in for the
//! embeddings RPC, so the full ingest → index → search → replace → delete
//! flow runs without a network.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use kb_search::collection::Collection;
use kb_search::config::{ChunkingConfig, Config, HybridConfig};
use kb_search::error::{Error, Result};
use kb_search::llm::Embedder;
use kb_search::models::{Chunk, ChunkRef, Metadata, SearchResult};
use kb_search::search::hybrid::HybridIndex;
use kb_search::search::{open_hybrid, VectorStore};

/// Deterministic embedder: hashed bag-of-words, L2-normalized, with a
/// configurable dimension so tests can simulate switching models.
struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0f32; self.dim];
                for word in text.to_lowercase().split_whitespace() {
                    let mut h: u64 = 0xcbf29ce484222325;
                    for b in word.bytes() {
                        h ^= b as u64;
                        h = h.wrapping_mul(0x100000001b3);
                    }
                    v[(h % self.dim as u64) as usize] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for x in v.iter_mut() {
                        *x /= norm;
                    }
                }
                v
            })
            .collect())
    }
}

fn test_config(data_dir: &Path) -> Config {
    Config {
        data_dir: data_dir.to_path_buf(),
        chunking: ChunkingConfig {
            max_size: 40,
            overlap: 0,
        },
        ..Config::default()
    }
}

async fn open_collection(config: &Config, name: &str, dim: usize) -> Collection {
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(dim));
    let hybrid = open_hybrid(config, name, embedder.clone()).await.unwrap();
    Collection::open(
        name,
        &config.db_dir(),
        &config.asset_dir(name),
        config.chunking,
        hybrid,
        embedder,
        config.legacy_delete,
    )
    .await
    .unwrap()
}

fn write_file(dir: &Path, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_store_then_search_finds_matching_document() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 64).await;

    let fox = write_file(dir.path(), "fox.txt", "The quick brown fox");
    let cat = write_file(dir.path(), "cat.txt", "A feline rested on a rug");
    collection.store(&fox, Metadata::new()).await.unwrap();
    collection.store(&cat, Metadata::new()).await.unwrap();

    let results = collection.search("fox", 2).await.unwrap();
    assert!(!results.is_empty());
    assert!(
        results[0].content.contains("fox"),
        "top result was {:?}",
        results[0].content
    );
}

#[tokio::test]
async fn test_store_existing_basename_conflicts() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 32).await;

    let path = write_file(dir.path(), "a.txt", "original content");
    collection.store(&path, Metadata::new()).await.unwrap();
    assert!(matches!(
        collection.store(&path, Metadata::new()).await,
        Err(Error::AlreadyExists(_))
    ));
}

#[tokio::test]
async fn test_replace_removes_old_content() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 64).await;

    let path = write_file(dir.path(), "f.txt", "first version alpha marker");
    collection.store(&path, Metadata::new()).await.unwrap();

    std::fs::write(&path, "second version beta marker").unwrap();
    collection
        .store_or_replace(&path, Metadata::new())
        .await
        .unwrap();

    let results = collection.search("alpha", 10).await.unwrap();
    assert!(
        results.iter().all(|r| !r.content.contains("alpha")),
        "stale v1 chunk still retrievable"
    );
    let results = collection.search("beta", 10).await.unwrap();
    assert!(results.iter().any(|r| r.content.contains("beta")));
}

#[tokio::test]
async fn test_store_or_replace_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 32).await;

    let path = write_file(
        dir.path(),
        "doc.txt",
        "a reasonably long document that will span several chunks when split",
    );
    collection
        .store_or_replace(&path, Metadata::new())
        .await
        .unwrap();
    let count_once = collection.count().await.unwrap();
    let chunks_once = collection.get_entry_chunks("doc.txt").await.unwrap().len();

    collection
        .store_or_replace(&path, Metadata::new())
        .await
        .unwrap();
    assert_eq!(collection.count().await.unwrap(), count_once);
    assert_eq!(
        collection.get_entry_chunks("doc.txt").await.unwrap().len(),
        chunks_once
    );
    assert_eq!(collection.list_entries().await.len(), 1);
}

#[tokio::test]
async fn test_count_matches_index_and_chunks_carry_source() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 32).await;

    let a = write_file(dir.path(), "a.txt", "one two three four five six seven eight nine");
    let b = write_file(dir.path(), "b.txt", "lorem ipsum dolor sit amet consectetur");
    collection.store(&a, Metadata::new()).await.unwrap();
    collection.store(&b, Metadata::new()).await.unwrap();

    let mut total = 0;
    for entry in collection.list_entries().await {
        let chunks = collection.get_entry_chunks(&entry).await.unwrap();
        total += chunks.len();
        for chunk in chunks {
            assert_eq!(chunk.metadata.get("source").unwrap(), &entry);
            assert_eq!(chunk.metadata.get("type").unwrap(), "file");
        }
    }
    assert_eq!(collection.count().await.unwrap(), total);
}

#[tokio::test]
async fn test_remove_entry_deletes_chunks_and_asset() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 64).await;

    let keep = write_file(dir.path(), "keep.txt", "content that stays around");
    let drop_ = write_file(dir.path(), "drop.txt", "distinctive zebra phrase");
    collection.store(&keep, Metadata::new()).await.unwrap();
    collection.store(&drop_, Metadata::new()).await.unwrap();

    let keep_chunks = collection.get_entry_chunks("keep.txt").await.unwrap().len();
    collection.remove_entry("drop.txt").await.unwrap();

    assert!(!collection.entry_exists("drop.txt").await);
    assert!(collection.entry_exists("keep.txt").await);
    assert_eq!(collection.count().await.unwrap(), keep_chunks);
    assert!(!config.asset_dir("docs").join("drop.txt").exists());

    let results = collection.search("zebra", 10).await.unwrap();
    assert!(results.iter().all(|r| !r.content.contains("zebra")));

    assert!(matches!(
        collection.remove_entry("drop.txt").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn test_legacy_delete_rebuilds_collection() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.legacy_delete = true;
    let collection = open_collection(&config, "docs", 32).await;

    let a = write_file(dir.path(), "a.txt", "alpha bravo charlie delta echo foxtrot golf");
    let b = write_file(dir.path(), "b.txt", "hotel india juliet kilo lima mike november");
    collection.store(&a, Metadata::new()).await.unwrap();
    collection.store(&b, Metadata::new()).await.unwrap();

    collection.remove_entry("a.txt").await.unwrap();

    assert!(!collection.entry_exists("a.txt").await);
    let remaining = collection.get_entry_chunks("b.txt").await.unwrap();
    assert_eq!(collection.count().await.unwrap(), remaining.len());
    let results = collection.search("juliet kilo", 5).await.unwrap();
    assert!(results.iter().any(|r| r.content.contains("kilo")));
}

#[tokio::test]
async fn test_reset_is_idempotent_and_collection_stays_usable() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 32).await;

    let path = write_file(dir.path(), "a.txt", "some content here");
    collection.store(&path, Metadata::new()).await.unwrap();

    collection.reset().await.unwrap();
    assert_eq!(collection.count().await.unwrap(), 0);
    assert!(collection.list_entries().await.is_empty());

    collection.reset().await.unwrap();
    assert_eq!(collection.count().await.unwrap(), 0);

    let path = write_file(dir.path(), "b.txt", "fresh content after reset");
    collection.store(&path, Metadata::new()).await.unwrap();
    assert_eq!(collection.list_entries().await, vec!["b.txt".to_string()]);
    assert!(collection.count().await.unwrap() > 0);
}

#[tokio::test]
async fn test_entry_text_returns_original_not_chunk_concat() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    // overlap would duplicate words if the text were rebuilt from chunks
    config.chunking = ChunkingConfig {
        max_size: 20,
        overlap: 8,
    };
    let collection = open_collection(&config, "docs", 32).await;

    let text = "one two three four five six seven eight nine ten";
    let path = write_file(dir.path(), "doc.txt", text);
    collection.store(&path, Metadata::new()).await.unwrap();

    let (content, chunk_count) = collection.get_entry_text("doc.txt").await.unwrap();
    assert_eq!(content, text);
    assert!(chunk_count >= 2);
    assert_eq!(
        chunk_count,
        collection.get_entry_chunks("doc.txt").await.unwrap().len()
    );
}

#[tokio::test]
async fn test_unsupported_extension_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 32).await;

    let path = write_file(dir.path(), "image.png", "not really an image");
    assert!(matches!(
        collection.store(&path, Metadata::new()).await,
        Err(Error::Invalid(_))
    ));
    assert!(!collection.entry_exists("image.png").await);
}

#[tokio::test]
async fn test_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    {
        let collection = open_collection(&config, "docs", 32).await;
        let path = write_file(dir.path(), "a.txt", "durable content for reopening");
        collection.store(&path, Metadata::new()).await.unwrap();
    }

    let collection = open_collection(&config, "docs", 32).await;
    assert_eq!(collection.list_entries().await, vec!["a.txt".to_string()]);
    assert!(collection.count().await.unwrap() > 0);
    let results = collection.search("durable", 5).await.unwrap();
    assert!(results.iter().any(|r| r.content.contains("durable")));
}

#[tokio::test]
async fn test_dimension_drift_triggers_repopulation() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let count_before = {
        let collection = open_collection(&config, "docs", 16).await;
        let path = write_file(
            dir.path(),
            "doc.txt",
            "the quick brown fox jumps over the lazy dog again and again",
        );
        collection.store(&path, Metadata::new()).await.unwrap();
        collection.count().await.unwrap()
    };
    assert!(count_before > 0);

    // Reopen with a different embedding dimension: every stored vector is
    // stale, so the collection must rebuild from its asset files.
    let collection = open_collection(&config, "docs", 32).await;
    assert_eq!(collection.count().await.unwrap(), count_before);

    let results = collection.search("quick brown fox", 5).await.unwrap();
    assert!(!results.is_empty());
    assert!(results[0].content.contains("fox"));
}

#[tokio::test]
async fn test_legacy_state_file_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    std::fs::create_dir_all(config.db_dir()).unwrap();
    std::fs::create_dir_all(config.asset_dir("docs")).unwrap();
    std::fs::write(
        config.db_dir().join("collection-docs.json"),
        r#"["old.txt"]"#,
    )
    .unwrap();
    std::fs::write(
        config.asset_dir("docs").join("old.txt"),
        "content carried over from the legacy format",
    )
    .unwrap();

    let collection = open_collection(&config, "docs", 32).await;
    assert_eq!(collection.list_entries().await, vec!["old.txt".to_string()]);
    assert!(collection.get_external_sources().await.is_empty());

    // the legacy entry has no chunk ids until a repopulation rebuilds it
    collection.repopulate().await.unwrap();
    assert!(collection.count().await.unwrap() > 0);
    let results = collection.search("legacy format", 5).await.unwrap();
    assert!(results.iter().any(|r| r.content.contains("legacy")));
}

#[tokio::test]
async fn test_corrupt_state_file_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    std::fs::create_dir_all(config.db_dir()).unwrap();
    std::fs::write(config.db_dir().join("collection-docs.json"), "garbage{{{").unwrap();

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(16));
    let hybrid = open_hybrid(&config, "docs", embedder.clone()).await.unwrap();
    let result = Collection::open(
        "docs",
        &config.db_dir(),
        &config.asset_dir("docs"),
        config.chunking,
        hybrid,
        embedder,
        false,
    )
    .await;
    assert!(matches!(result, Err(Error::Corrupt(_))));
}

#[tokio::test]
async fn test_external_source_management() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 16).await;

    let source = kb_search::models::ExternalSource {
        url: "https://example.com/docs".to_string(),
        update_interval_secs: 600,
        last_update: None,
    };
    collection.add_external_source(source.clone()).await.unwrap();
    assert!(matches!(
        collection.add_external_source(source).await,
        Err(Error::AlreadyExists(_))
    ));

    let now = chrono::Utc::now();
    collection
        .touch_external_source("https://example.com/docs", now)
        .await
        .unwrap();

    // last_update round-trips through the state file
    let reopened = open_collection(&config, "docs", 16).await;
    let sources = reopened.get_external_sources().await;
    assert_eq!(sources.len(), 1);
    assert_eq!(sources[0].last_update.unwrap(), now);

    reopened
        .remove_external_source("https://example.com/docs")
        .await
        .unwrap();
    assert!(matches!(
        reopened
            .remove_external_source("https://example.com/docs")
            .await,
        Err(Error::NotFound(_))
    ));
}

/// Repeated source refreshes write the same synthetic filename through the
/// replace path; the entry count and chunk count must not grow.
#[tokio::test]
async fn test_source_refresh_replace_semantics() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());
    let collection = open_collection(&config, "docs", 32).await;

    let file_name = "source-docs-https-example-com-feed.txt";
    for round in 0..3 {
        let scratch = tempfile::tempdir().unwrap();
        let path = scratch.path().join(file_name);
        std::fs::write(&path, format!("feed content revision {round} with shared words")).unwrap();
        let metadata = Metadata::from([(
            "url".to_string(),
            "https://example.com/feed".to_string(),
        )]);
        collection.store_or_replace(&path, metadata).await.unwrap();
    }

    assert_eq!(collection.list_entries().await.len(), 1);
    let chunks = collection.get_entry_chunks(file_name).await.unwrap();
    assert_eq!(collection.count().await.unwrap(), chunks.len());
    // only the latest revision remains
    assert!(chunks.iter().any(|c| c.content.contains("revision 2")));
    assert!(chunks.iter().all(|c| !c.content.contains("revision 0")));
    // no duplicated chunk content within the entry
    let mut seen = std::collections::HashSet::new();
    for chunk in &chunks {
        assert!(seen.insert(chunk.content.clone()), "duplicate chunk content");
    }
}

// ─── id-reuse regression ─────────────────────────────────

/// Vector store that reassigns the lowest free id, like a relational
/// backend whose SERIAL ids get recycled. Replacements must delete old
/// chunks first or fresh content aliases onto stale index records.
struct ReusingStore {
    entries: Mutex<HashMap<u64, (String, Metadata)>>,
}

impl ReusingStore {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lowest_free_id(entries: &HashMap<u64, (String, Metadata)>) -> u64 {
        let mut id = 1;
        while entries.contains_key(&id) {
            id += 1;
        }
        id
    }
}

#[async_trait]
impl VectorStore for ReusingStore {
    async fn store(&self, text: &str, metadata: &Metadata) -> Result<ChunkRef> {
        let mut entries = self.entries.lock();
        let id = Self::lowest_free_id(&entries);
        entries.insert(id, (text.to_string(), metadata.clone()));
        Ok(ChunkRef {
            id: id.to_string(),
            metadata: metadata.clone(),
        })
    }

    async fn store_batch(&self, texts: &[String], metadata: &Metadata) -> Result<Vec<ChunkRef>> {
        let mut refs = Vec::new();
        for text in texts {
            refs.push(self.store(text, metadata).await?);
        }
        Ok(refs)
    }

    async fn search(&self, _query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let entries = self.entries.lock();
        let mut results: Vec<SearchResult> = entries
            .iter()
            .map(|(id, (content, metadata))| SearchResult {
                id: id.to_string(),
                content: content.clone(),
                metadata: metadata.clone(),
                similarity: 0.0,
                vector_score: 0.0,
                bm25_score: 0.0,
            })
            .collect();
        results.truncate(k);
        Ok(results)
    }

    async fn get(&self, id: &str) -> Result<Chunk> {
        let parsed: u64 = id.parse().map_err(|_| Error::NotFound(id.to_string()))?;
        let entries = self.entries.lock();
        entries
            .get(&parsed)
            .map(|(content, metadata)| Chunk {
                id: id.to_string(),
                content: content.clone(),
                metadata: metadata.clone(),
            })
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    async fn delete(
        &self,
        where_meta: &Metadata,
        _where_docs: &Metadata,
        ids: &[String],
    ) -> Result<()> {
        let mut entries = self.entries.lock();
        if !ids.is_empty() {
            let targets: Vec<u64> = ids.iter().filter_map(|s| s.parse().ok()).collect();
            entries.retain(|id, _| !targets.contains(id));
        } else if !where_meta.is_empty() {
            entries.retain(|_, (_, metadata)| {
                !where_meta.iter().all(|(k, v)| metadata.get(k) == Some(v))
            });
        }
        Ok(())
    }

    async fn reset(&self) -> Result<()> {
        self.entries.lock().clear();
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.entries.lock().len())
    }

    async fn embedding_dimension(&self) -> Result<usize> {
        Err(Error::Invalid("no chunks stored".to_string()))
    }
}

#[tokio::test]
async fn test_replace_on_id_reusing_backend() {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(dir.path());

    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(8));
    let hybrid = HybridIndex::new(Arc::new(ReusingStore::new()), None, HybridConfig::default());
    let collection = Collection::open(
        "docs",
        &config.db_dir(),
        &config.asset_dir("docs"),
        config.chunking,
        hybrid,
        embedder,
        false,
    )
    .await
    .unwrap();

    let path = write_file(
        dir.path(),
        "f.txt",
        "version one payload with enough words to make several chunks",
    );
    collection.store(&path, Metadata::new()).await.unwrap();
    let old_count = collection.count().await.unwrap();

    std::fs::write(&path, "version two payload with enough words to make several chunks").unwrap();
    collection
        .store_or_replace(&path, Metadata::new())
        .await
        .unwrap();

    // Ids were recycled; the index must point at the new rows.
    assert_eq!(collection.count().await.unwrap(), old_count);
    let chunks = collection.get_entry_chunks("f.txt").await.unwrap();
    assert!(chunks.iter().any(|c| c.content.contains("version two")));
    assert!(chunks.iter().all(|c| !c.content.contains("version one")));
}
