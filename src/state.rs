use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::collection::{self, Collection};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::llm::embeddings::OpenAiEmbedder;
use crate::llm::Embedder;
use crate::search::open_hybrid;
use crate::sources::manager::SourceManager;
use crate::sources::SourceConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub collections: Arc<RwLock<HashMap<String, Arc<Collection>>>>,
    pub manager: Arc<SourceManager>,
    pub embedder: Arc<dyn Embedder>,
}

impl AppState {
    pub fn new(config: Config) -> Result<Self> {
        std::fs::create_dir_all(config.db_dir())?;

        let http_client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| Error::Internal(format!("failed to build http client: {e}")))?;

        let embedder: Arc<dyn Embedder> =
            Arc::new(OpenAiEmbedder::new(http_client, config.embedding.clone()));

        let manager = SourceManager::new(SourceConfig {
            git_ssh_key: config.git_ssh_key.clone(),
        });

        Ok(Self {
            config,
            collections: Arc::new(RwLock::new(HashMap::new())),
            manager,
            embedder,
        })
    }

    /// Open every collection discovered on disk and register it with the
    /// source manager.
    pub async fn load_existing(&self) -> Result<()> {
        for name in collection::list_collections(&self.config.db_dir()) {
            match self.open_collection(&name).await {
                Ok(_) => tracing::info!(collection = %name, "Loaded collection"),
                Err(e) => tracing::error!(collection = %name, "Failed to load collection: {e}"),
            }
        }
        Ok(())
    }

    /// Fetch an open collection, or open (creating if needed) by name.
    pub async fn open_collection(&self, name: &str) -> Result<Arc<Collection>> {
        validate_collection_name(name)?;

        if let Some(existing) = self.collections.read().await.get(name) {
            return Ok(existing.clone());
        }

        let hybrid = open_hybrid(&self.config, name, self.embedder.clone()).await?;
        let collection = Arc::new(
            Collection::open(
                name,
                &self.config.db_dir(),
                &self.config.asset_dir(name),
                self.config.chunking,
                hybrid,
                self.embedder.clone(),
                self.config.legacy_delete,
            )
            .await?,
        );

        self.collections
            .write()
            .await
            .insert(name.to_string(), collection.clone());
        self.manager.register_collection(collection.clone()).await;

        Ok(collection)
    }

    /// Fetch an already-open collection.
    pub async fn get_collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("collection {name}")))
    }

    /// Drop the in-memory handle after a reset.
    pub async fn forget_collection(&self, name: &str) {
        self.collections.write().await.remove(name);
        self.manager.unregister_collection(name).await;
    }
}

/// Collection names end up in file paths and table names; keep them tame.
fn validate_collection_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 128 {
        return Err(Error::Invalid("collection name must be 1-128 chars".to_string()));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(Error::Invalid(
            "collection name may only contain letters, digits, '-' and '_'".to_string(),
        ));
    }
    Ok(())
}
