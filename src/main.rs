use axum::routing::{delete, get, post};
use axum::Router;
use tracing_subscriber::EnvFilter;

use kb_search::api;
use kb_search::config::Config;
use kb_search::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Backend: {}, embeddings: {} ({})",
        config.backend,
        config.embedding.model,
        config.embedding.base_url
    );

    let state = AppState::new(config.clone())?;
    state.load_existing().await?;
    state.manager.start();

    let app = Router::new()
        .route("/api/collections", get(api::collections::list_collections))
        .route("/api/collections", post(api::collections::create_collection))
        .route(
            "/api/collections/{name}/upload",
            post(api::collections::upload_file),
        )
        .route(
            "/api/collections/{name}/entries",
            get(api::collections::list_entries),
        )
        .route(
            "/api/collections/{name}/entries/{entry}",
            get(api::collections::get_entry_content),
        )
        .route(
            "/api/collections/{name}/search",
            post(api::collections::search),
        )
        .route(
            "/api/collections/{name}/reset",
            post(api::collections::reset),
        )
        .route(
            "/api/collections/{name}/entry",
            delete(api::collections::remove_entry),
        )
        .route(
            "/api/collections/{name}/sources",
            get(api::sources::list_sources),
        )
        .route(
            "/api/collections/{name}/sources",
            post(api::sources::register_source),
        )
        .route(
            "/api/collections/{name}/sources",
            delete(api::sources::remove_source),
        )
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(&state.config.bind_addr).await?;
    tracing::info!("Server listening on {}", state.config.bind_addr);

    let manager = state.manager.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
            manager.stop();
        })
        .await?;

    Ok(())
}
