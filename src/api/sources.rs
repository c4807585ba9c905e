//! External-source endpoints.

use axum::extract::{Path, State};
use axum::Json;
use serde_json::json;
use std::time::Duration;

use crate::api::{error_response, success, ApiResult};
use crate::models::{AddSourceRequest, RemoveSourceRequest};
use crate::state::AppState;

/// GET /api/collections/{name}/sources
pub async fn list_sources(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let collection = state
        .get_collection(&name)
        .await
        .map_err(|e| error_response(e, "Collection not found"))?;

    let sources: Vec<_> = collection
        .get_external_sources()
        .await
        .into_iter()
        .map(|s| {
            json!({
                "url": s.url,
                "update_interval": s.update_interval_secs / 60,
                "last_update": s.last_update.map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    Ok(success(
        "Sources retrieved successfully",
        json!({
            "collection": name,
            "count": sources.len(),
            "sources": sources,
        }),
    ))
}

/// POST /api/collections/{name}/sources
pub async fn register_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut req): Json<AddSourceRequest>,
) -> ApiResult {
    if req.update_interval < 1 {
        req.update_interval = 60;
    }

    state
        .manager
        .add_source(
            &name,
            &req.url,
            Duration::from_secs(req.update_interval * 60),
        )
        .await
        .map_err(|e| error_response(e, "Failed to register source"))?;

    Ok(success(
        "External source registered successfully",
        json!({
            "collection": name,
            "url": req.url,
            "update_interval": req.update_interval,
        }),
    ))
}

/// DELETE /api/collections/{name}/sources
pub async fn remove_source(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RemoveSourceRequest>,
) -> ApiResult {
    state
        .manager
        .remove_source(&name, &req.url)
        .await
        .map_err(|e| error_response(e, "Failed to remove source"))?;

    Ok(success(
        "External source removed successfully",
        json!({
            "collection": name,
            "url": req.url,
        }),
    ))
}
