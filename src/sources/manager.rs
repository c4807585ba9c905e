//! Periodic refresh of external sources.
//!
//! The manager keeps a process-wide registry of collections and their
//! sources. A single background ticker wakes every minute, finds the
//! sources whose interval has elapsed, and spawns one update task per
//! source. Updates write fetched content through the owning collection's
//! replace path under a deterministic synthetic filename, so each refresh
//! swaps the previous content instead of stacking new copies.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::Utc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::models::{ExternalSource, Metadata};
use crate::sources::{fetch_source, synthetic_filename, SourceConfig};

const TICK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Default)]
struct Registry {
    sources: HashMap<String, Vec<ExternalSource>>,
    collections: HashMap<String, Arc<Collection>>,
}

pub struct SourceManager {
    registry: Arc<RwLock<Registry>>,
    config: SourceConfig,
    cancel: CancellationToken,
}

impl SourceManager {
    pub fn new(config: SourceConfig) -> Arc<Self> {
        Arc::new(Self {
            registry: Arc::new(RwLock::new(Registry::default())),
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Register a collection and adopt its persisted sources. Every known
    /// source is refreshed immediately in the background.
    pub async fn register_collection(&self, collection: Arc<Collection>) {
        let name = collection.name().to_string();
        let sources = collection.get_external_sources().await;

        {
            let mut registry = self.registry.write().await;
            registry.collections.insert(name.clone(), collection.clone());
            registry.sources.insert(name.clone(), sources.clone());
        }

        for source in sources {
            tokio::spawn(update_source(
                self.config.clone(),
                self.registry.clone(),
                name.clone(),
                collection.clone(),
                source.url,
            ));
        }
    }

    /// Add a source to a registered collection and refresh it immediately.
    pub async fn add_source(
        &self,
        collection_name: &str,
        url: &str,
        update_interval: Duration,
    ) -> Result<()> {
        reqwest::Url::parse(url).map_err(|e| Error::Invalid(format!("malformed URL: {e}")))?;

        let collection = {
            let registry = self.registry.read().await;
            registry
                .collections
                .get(collection_name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("collection {collection_name}")))?
        };

        let source = ExternalSource {
            url: url.to_string(),
            update_interval_secs: update_interval.as_secs(),
            last_update: None,
        };
        collection.add_external_source(source.clone()).await?;

        {
            let mut registry = self.registry.write().await;
            registry
                .sources
                .entry(collection_name.to_string())
                .or_default()
                .push(source);
        }

        tokio::spawn(update_source(
            self.config.clone(),
            self.registry.clone(),
            collection_name.to_string(),
            collection,
            url.to_string(),
        ));

        Ok(())
    }

    /// Remove a source and the synthetic entry its updates created.
    pub async fn remove_source(&self, collection_name: &str, url: &str) -> Result<()> {
        let collection = {
            let registry = self.registry.read().await;
            registry
                .collections
                .get(collection_name)
                .cloned()
                .ok_or_else(|| Error::NotFound(format!("collection {collection_name}")))?
        };

        collection.remove_external_source(url).await?;

        // The entry only exists if at least one update succeeded.
        match collection
            .remove_entry(&synthetic_filename(collection_name, url))
            .await
        {
            Ok(()) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let mut registry = self.registry.write().await;
        if let Some(sources) = registry.sources.get_mut(collection_name) {
            sources.retain(|s| s.url != url);
        }
        Ok(())
    }

    /// Forget a collection without touching its persisted state.
    pub async fn unregister_collection(&self, collection_name: &str) {
        let mut registry = self.registry.write().await;
        registry.collections.remove(collection_name);
        registry.sources.remove(collection_name);
    }

    /// Start the background ticker. Runs until [`stop`](Self::stop).
    pub fn start(&self) {
        let registry = self.registry.clone();
        let config = self.config.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(TICK_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // the first tick fires immediately; sources were already
            // refreshed at registration
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Source manager stopped");
                        return;
                    }
                    _ = ticker.tick() => {
                        run_due_updates(&config, &registry).await;
                    }
                }
            }
        });
    }

    /// Stop the ticker. In-flight update tasks run to completion.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

async fn run_due_updates(config: &SourceConfig, registry: &Arc<RwLock<Registry>>) {
    let now = Utc::now();
    let due: Vec<(String, Arc<Collection>, String)> = {
        let registry = registry.read().await;
        let mut due = Vec::new();
        for (name, sources) in &registry.sources {
            let Some(collection) = registry.collections.get(name) else {
                continue;
            };
            for source in sources {
                if source.due(now) {
                    due.push((name.clone(), collection.clone(), source.url.clone()));
                }
            }
        }
        due
    };

    for (name, collection, url) in due {
        tokio::spawn(update_source(
            config.clone(),
            registry.clone(),
            name,
            collection,
            url,
        ));
    }
}

/// Fetch one source and write it through the collection. Failures are
/// logged and leave `last_update` untouched so the next tick retries.
async fn update_source(
    config: SourceConfig,
    registry: Arc<RwLock<Registry>>,
    collection_name: String,
    collection: Arc<Collection>,
    url: String,
) {
    tracing::info!(url = %url, collection = %collection_name, "Updating source");

    let content = match fetch_source(&url, &config).await {
        Ok(content) => content,
        Err(e) => {
            tracing::error!(url = %url, "Error updating source: {e}");
            return;
        }
    };
    if content.is_empty() {
        tracing::warn!(url = %url, "Empty content fetched from source");
        return;
    }
    tracing::info!(url = %url, content_length = content.len(), "Fetched content");

    // Consistent filename so the replace path finds the prior entry; a
    // unique scratch directory so concurrent updates cannot collide.
    let file_name = synthetic_filename(&collection_name, &url);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    let scratch_dir = std::env::temp_dir().join(format!("source-update-{nanos}"));
    if let Err(e) = std::fs::create_dir_all(&scratch_dir) {
        tracing::error!("Error creating scratch directory: {e}");
        return;
    }

    let scratch_file = scratch_dir.join(&file_name);
    let stored = match std::fs::write(&scratch_file, &content) {
        Ok(()) => {
            let metadata = Metadata::from([("url".to_string(), url.clone())]);
            collection.store_or_replace(&scratch_file, metadata).await
        }
        Err(e) => Err(e.into()),
    };
    let _ = std::fs::remove_dir_all(&scratch_dir);

    if let Err(e) = stored {
        tracing::error!(url = %url, "Error storing content in collection: {e}");
        return;
    }

    let now = Utc::now();
    if let Err(e) = collection.touch_external_source(&url, now).await {
        tracing::warn!(url = %url, "Failed to persist last-update timestamp: {e}");
    }
    let mut registry = registry.write().await;
    if let Some(sources) = registry.sources.get_mut(&collection_name) {
        if let Some(source) = sources.iter_mut().find(|s| s.url == url) {
            source.last_update = Some(now);
        }
    }
    tracing::info!(url = %url, entry = %file_name, "Content stored in collection");
}
