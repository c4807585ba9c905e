//! Persistent knowledge-base collections.
//!
//! A collection maps user-visible entries (files, fetched URLs) to the
//! ordered chunk ids that represent them in the hybrid index. All state
//! that cannot be derived from the stores lives in a single JSON file next
//! to the backend data, rewritten at every successful mutation, so a
//! restart resumes exactly where the last call returned.
//!
//! Mutations and reads both serialize on one async mutex; the expensive
//! part of any call is embedding or vector search, not the lock.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::chunking::{split_into_chunks, ChunkOptions};
use crate::config::ChunkingConfig;
use crate::error::{Error, Result};
use crate::extract::extract_text;
use crate::llm::Embedder;
use crate::models::{Chunk, ChunkRef, ExternalSource, Metadata, SearchResult};
use crate::search::hybrid::HybridIndex;

/// State files are named `collection-<name>.json`.
pub const COLLECTION_PREFIX: &str = "collection-";

/// The persisted half of a collection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CollectionState {
    #[serde(default)]
    pub external_sources: Vec<ExternalSource>,
    #[serde(default)]
    pub index: BTreeMap<String, Vec<ChunkRef>>,
}

pub struct Collection {
    name: String,
    state_path: PathBuf,
    asset_dir: PathBuf,
    chunking: ChunkingConfig,
    hybrid: HybridIndex,
    legacy_delete: bool,
    state: Mutex<CollectionState>,
}

impl Collection {
    /// Open or create the collection named `name`.
    ///
    /// When a prior index exists, a probe embedding is compared against the
    /// stored vectors' dimensionality; a mismatch means the embedding model
    /// changed and every vector is stale, so the collection rebuilds itself
    /// from its asset files. Probe failures skip the check (fail-open) —
    /// the collection opens with prior state.
    pub async fn open(
        name: &str,
        db_dir: &Path,
        asset_dir: &Path,
        chunking: ChunkingConfig,
        hybrid: HybridIndex,
        embedder: Arc<dyn Embedder>,
        legacy_delete: bool,
    ) -> Result<Self> {
        std::fs::create_dir_all(db_dir)?;
        std::fs::create_dir_all(asset_dir)?;

        let state_path = state_file_path(db_dir, name);

        let collection = if state_path.exists() {
            let state = load_state(&state_path)?;
            Self {
                name: name.to_string(),
                state_path,
                asset_dir: asset_dir.to_path_buf(),
                chunking,
                hybrid,
                legacy_delete,
                state: Mutex::new(state),
            }
        } else {
            let collection = Self {
                name: name.to_string(),
                state_path,
                asset_dir: asset_dir.to_path_buf(),
                chunking,
                hybrid,
                legacy_delete,
                state: Mutex::new(CollectionState::default()),
            };
            let state = collection.state.lock().await;
            collection.save_state(&state)?;
            drop(state);
            return Ok(collection);
        };

        if let Ok(probe) = embedder.embed_one("test").await {
            if let Ok(dims) = collection.hybrid.embedding_dimension().await {
                if dims != probe.len() {
                    tracing::info!(
                        collection = name,
                        stored = dims,
                        live = probe.len(),
                        "Embedding dimensions mismatch, repopulating"
                    );
                    let mut state = collection.state.lock().await;
                    collection.repopulate_locked(&mut state).await?;
                }
            }
        }

        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Store the file at `path` as a new entry. Fails with AlreadyExists
    /// when the basename is already indexed.
    pub async fn store(&self, path: &Path, metadata: Metadata) -> Result<()> {
        let mut state = self.state.lock().await;
        let file_name = basename(path)?;
        if state.index.contains_key(&file_name) {
            return Err(Error::AlreadyExists(file_name));
        }
        self.store_file_locked(&mut state, path, metadata).await
    }

    /// Store the file at `path`, replacing any existing entry under the
    /// same basename. The old chunks are deleted before the new ones go in:
    /// id-reusing backends would otherwise alias fresh content to stale
    /// index records.
    pub async fn store_or_replace(&self, path: &Path, metadata: Metadata) -> Result<()> {
        let mut state = self.state.lock().await;
        let file_name = basename(path)?;
        if state.index.contains_key(&file_name) {
            tracing::info!(entry = %file_name, "Entry exists, replacing");
            self.remove_entry_locked(&mut state, &file_name).await?;
        }
        self.store_file_locked(&mut state, path, metadata).await
    }

    /// Remove an entry, its chunks, and its asset file.
    pub async fn remove_entry(&self, entry: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = Path::new(entry)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| entry.to_string());
        if !state.index.contains_key(&entry) {
            return Err(Error::NotFound(format!("entry {entry}")));
        }
        self.remove_entry_locked(&mut state, &entry).await
    }

    pub async fn search(&self, query: &str, k: usize) -> Result<Vec<SearchResult>> {
        let _state = self.state.lock().await;
        self.hybrid.search(query, k).await
    }

    /// Drop everything: asset files, indexes, state file. The collection
    /// stays usable and a subsequent reset is a no-op.
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        for entry in state.index.keys() {
            let _ = std::fs::remove_file(self.asset_dir.join(entry));
        }
        state.index.clear();
        state.external_sources.clear();
        self.save_state(&state)?;
        self.hybrid.reset().await?;
        let _ = std::fs::remove_file(&self.state_path);
        Ok(())
    }

    pub async fn list_entries(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.index.keys().cloned().collect()
    }

    pub async fn entry_exists(&self, entry: &str) -> bool {
        let state = self.state.lock().await;
        let entry = Path::new(entry)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| entry.to_string());
        state.index.contains_key(&entry)
    }

    pub async fn count(&self) -> Result<usize> {
        let _state = self.state.lock().await;
        self.hybrid.count().await
    }

    /// Fetch every stored chunk of an entry, in concatenation order.
    pub async fn get_entry_chunks(&self, entry: &str) -> Result<Vec<Chunk>> {
        let state = self.state.lock().await;
        let refs = state
            .index
            .get(entry)
            .ok_or_else(|| Error::NotFound(format!("entry {entry}")))?;

        let mut chunks = Vec::with_capacity(refs.len());
        for chunk_ref in refs {
            chunks.push(self.hybrid.get(&chunk_ref.id).await?);
        }
        Ok(chunks)
    }

    /// The entry's original extracted text (not the overlapping chunk
    /// concatenation) plus the number of chunks it occupies.
    pub async fn get_entry_text(&self, entry: &str) -> Result<(String, usize)> {
        let state = self.state.lock().await;
        let refs = state
            .index
            .get(entry)
            .ok_or_else(|| Error::NotFound(format!("entry {entry}")))?;

        let asset_path = self.asset_dir.join(entry);
        let text = tokio::task::spawn_blocking(move || extract_text(&asset_path))
            .await
            .map_err(|e| Error::Internal(format!("extraction task failed: {e}")))??;
        Ok((text, refs.len()))
    }

    /// Rebuild the vector and lexical indexes from the asset files.
    pub async fn repopulate(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.repopulate_locked(&mut state).await
    }

    // ─── external sources ────────────────────────────────

    pub async fn get_external_sources(&self) -> Vec<ExternalSource> {
        let state = self.state.lock().await;
        state.external_sources.clone()
    }

    pub async fn add_external_source(&self, source: ExternalSource) -> Result<()> {
        let mut state = self.state.lock().await;
        if state.external_sources.iter().any(|s| s.url == source.url) {
            return Err(Error::AlreadyExists(format!("source {}", source.url)));
        }
        state.external_sources.push(source);
        self.save_state(&state)
    }

    pub async fn remove_external_source(&self, url: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let before = state.external_sources.len();
        state.external_sources.retain(|s| s.url != url);
        if state.external_sources.len() == before {
            return Err(Error::NotFound(format!("source {url}")));
        }
        self.save_state(&state)
    }

    /// Record a successful refresh of `url`. Called by the scheduler only
    /// after the content landed, so a failed update retries next tick.
    pub async fn touch_external_source(&self, url: &str, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock().await;
        let source = state
            .external_sources
            .iter_mut()
            .find(|s| s.url == url)
            .ok_or_else(|| Error::NotFound(format!("source {url}")))?;
        source.last_update = Some(at);
        self.save_state(&state)
    }

    // ─── internals ───────────────────────────────────────

    async fn store_file_locked(
        &self,
        state: &mut CollectionState,
        path: &Path,
        mut metadata: Metadata,
    ) -> Result<()> {
        let file_name = basename(path)?;
        tracing::info!(entry = %file_name, "Storing file");

        if !path.exists() {
            return Err(Error::NotFound(format!(
                "file does not exist: {}",
                path.display()
            )));
        }
        let asset_path = self.asset_dir.join(&file_name);
        if path != asset_path {
            std::fs::copy(path, &asset_path)?;
        }

        metadata.insert("type".to_string(), "file".to_string());
        metadata.insert("source".to_string(), file_name.clone());

        let refs = self.chunk_and_store(&asset_path, &metadata).await?;
        state.index.insert(file_name, refs);
        self.save_state(state)
    }

    async fn chunk_and_store(&self, asset_path: &Path, metadata: &Metadata) -> Result<Vec<ChunkRef>> {
        let path = asset_path.to_path_buf();
        let text = tokio::task::spawn_blocking(move || extract_text(&path))
            .await
            .map_err(|e| Error::Internal(format!("extraction task failed: {e}")))??;

        let opts = ChunkOptions {
            max_size: self.chunking.max_size,
            overlap: self.chunking.overlap,
            split_long_words: true,
        };
        let mut pieces = split_into_chunks(&text, &opts);
        pieces.retain(|p| !p.is_empty());
        if pieces.is_empty() {
            return Err(Error::Invalid(format!(
                "no text extracted from {}",
                asset_path.display()
            )));
        }

        self.hybrid.store_batch(&pieces, metadata).await
    }

    async fn remove_entry_locked(&self, state: &mut CollectionState, entry: &str) -> Result<()> {
        tracing::info!(entry, collection = %self.name, "Removing entry");

        if self.legacy_delete {
            // Backends without per-chunk delete: drop the entry and rebuild
            // the whole collection from the remaining assets.
            state.index.remove(entry);
            let _ = std::fs::remove_file(self.asset_dir.join(entry));
            self.save_state(state)?;
            return self.repopulate_locked(state).await;
        }

        let filter = Metadata::from([("source".to_string(), entry.to_string())]);
        self.hybrid.delete(&filter, &Metadata::new(), &[]).await?;

        // Second pass by recorded id, for backends whose filter delete is
        // incomplete, and to scrub lexical documents the filter pass could
        // not reach. The id may have been reassigned to a different entry
        // in the meantime, so a chunk that no longer claims this source is
        // left alone.
        let refs = state.index.get(entry).cloned().unwrap_or_default();
        for chunk_ref in refs {
            match self.hybrid.get(&chunk_ref.id).await {
                Ok(chunk) => {
                    if chunk.metadata.get("source").map(String::as_str) == Some(entry) {
                        self.hybrid
                            .delete(&Metadata::new(), &Metadata::new(), &[chunk_ref.id])
                            .await?;
                    }
                }
                Err(Error::NotFound(_)) => {
                    // already gone from the vector store; an id-targeted
                    // delete still clears any stale lexical copy
                    self.hybrid
                        .delete(&Metadata::new(), &Metadata::new(), &[chunk_ref.id])
                        .await?;
                }
                Err(e) => return Err(e),
            }
        }

        state.index.remove(entry);
        let _ = std::fs::remove_file(self.asset_dir.join(entry));
        self.save_state(state)
    }

    async fn repopulate_locked(&self, state: &mut CollectionState) -> Result<()> {
        tracing::info!(collection = %self.name, "Repopulating indexes from assets");
        self.hybrid.reset().await?;

        let entries: Vec<(String, Metadata)> = state
            .index
            .iter()
            .map(|(name, refs)| {
                let metadata = refs
                    .first()
                    .map(|r| r.metadata.clone())
                    .unwrap_or_default();
                (name.clone(), metadata)
            })
            .collect();

        for (entry, mut metadata) in entries {
            let asset_path = self.asset_dir.join(&entry);
            if !asset_path.exists() {
                tracing::warn!(entry = %entry, "Asset file missing, dropping entry from index");
                state.index.remove(&entry);
                continue;
            }
            metadata.insert("type".to_string(), "file".to_string());
            metadata.insert("source".to_string(), entry.clone());
            let refs = self.chunk_and_store(&asset_path, &metadata).await?;
            state.index.insert(entry, refs);
        }

        self.save_state(state)
    }

    fn save_state(&self, state: &CollectionState) -> Result<()> {
        let data = serde_json::to_string(state)?;
        let tmp_path = self.state_path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &data)?;
        std::fs::rename(&tmp_path, &self.state_path)?;
        Ok(())
    }
}

fn basename(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| Error::Invalid(format!("path has no file name: {}", path.display())))
}

pub fn state_file_path(db_dir: &Path, name: &str) -> PathBuf {
    db_dir.join(format!("{COLLECTION_PREFIX}{name}.json"))
}

fn load_state(path: &Path) -> Result<CollectionState> {
    let data = std::fs::read_to_string(path)?;

    match serde_json::from_str::<CollectionState>(&data) {
        Ok(state) => Ok(state),
        Err(_) => {
            // Legacy format: a bare list of entry names. Keep the names so
            // a later repopulation can rebuild them; everything else
            // defaults to empty.
            let legacy: Vec<String> = serde_json::from_str(&data).map_err(|_| {
                Error::Corrupt(format!("state file unreadable: {}", path.display()))
            })?;
            let mut state = CollectionState::default();
            for name in legacy {
                state.index.insert(name, Vec::new());
            }
            Ok(state)
        }
    }
}

/// Every collection with a state file under `db_dir`.
pub fn list_collections(db_dir: &Path) -> Vec<String> {
    let entries = match std::fs::read_dir(db_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!("Failed to read collections directory: {e}");
            return Vec::new();
        }
    };

    let mut names = Vec::new();
    for entry in entries.flatten() {
        let file_name = entry.file_name().to_string_lossy().to_string();
        if let Some(stem) = file_name
            .strip_prefix(COLLECTION_PREFIX)
            .and_then(|rest| rest.strip_suffix(".json"))
        {
            names.push(stem.to_string());
        }
    }
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_legacy_state_keeps_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection-old.json");
        std::fs::write(&path, r#"["a.txt", "b.txt"]"#).unwrap();

        let state = load_state(&path).unwrap();
        assert_eq!(state.index.len(), 2);
        assert!(state.index.get("a.txt").unwrap().is_empty());
        assert!(state.external_sources.is_empty());
    }

    #[test]
    fn test_load_garbage_state_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("collection-bad.json");
        std::fs::write(&path, "not json at all").unwrap();
        assert!(matches!(load_state(&path), Err(Error::Corrupt(_))));
    }

    #[test]
    fn test_state_round_trip_field_names() {
        let mut state = CollectionState::default();
        state.index.insert(
            "a.txt".to_string(),
            vec![ChunkRef {
                id: "3".to_string(),
                metadata: Metadata::from([("source".to_string(), "a.txt".to_string())]),
            }],
        );
        state.external_sources.push(ExternalSource {
            url: "https://example.com".to_string(),
            update_interval_secs: 600,
            last_update: None,
        });

        let json = serde_json::to_string(&state).unwrap();
        assert!(json.contains("\"external_sources\""));
        assert!(json.contains("\"index\""));
        assert!(json.contains("\"ID\":\"3\""));
        assert!(json.contains("\"URL\":\"https://example.com\""));

        let reloaded: CollectionState = serde_json::from_str(&json).unwrap();
        assert_eq!(reloaded.index["a.txt"][0].id, "3");
        assert_eq!(reloaded.external_sources[0].update_interval_secs, 600);
    }

    #[test]
    fn test_list_collections_filters_state_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("collection-docs.json"), "{}").unwrap();
        std::fs::write(dir.path().join("collection-notes.json"), "{}").unwrap();
        std::fs::write(dir.path().join("unrelated.json"), "{}").unwrap();
        std::fs::write(dir.path().join("collection-tmp.json.tmp"), "{}").unwrap();

        let names = list_collections(dir.path());
        assert_eq!(names, vec!["docs".to_string(), "notes".to_string()]);
    }
}
