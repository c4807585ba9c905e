//! Collection management endpoints.

use axum::extract::{Multipart, Path, State};
use axum::Json;
use chrono::Utc;
use serde_json::json;

use crate::api::{created, error_response, failure, success, ApiResult, ERR_CODE_INVALID_REQUEST};
use crate::collection;
use crate::models::{CreateCollectionRequest, Metadata, RemoveEntryRequest, SearchRequest};
use crate::state::AppState;

/// POST /api/collections
pub async fn create_collection(
    State(state): State<AppState>,
    Json(req): Json<CreateCollectionRequest>,
) -> ApiResult {
    state
        .open_collection(&req.name)
        .await
        .map_err(|e| error_response(e, "Failed to create collection"))?;

    Ok(created(
        "Collection created successfully",
        json!({
            "name": req.name,
            "created_at": Utc::now().to_rfc3339(),
        }),
    ))
}

/// GET /api/collections
pub async fn list_collections(State(state): State<AppState>) -> ApiResult {
    let collections = collection::list_collections(&state.config.db_dir());
    Ok(success(
        "Collections retrieved successfully",
        json!({
            "count": collections.len(),
            "collections": collections,
        }),
    ))
}

/// POST /api/collections/{name}/upload
pub async fn upload_file(
    State(state): State<AppState>,
    Path(name): Path<String>,
    mut multipart: Multipart,
) -> ApiResult {
    let collection = state
        .get_collection(&name)
        .await
        .map_err(|e| error_response(e, "Collection not found"))?;

    let field = multipart
        .next_field()
        .await
        .map_err(|e| {
            failure(
                axum::http::StatusCode::BAD_REQUEST,
                ERR_CODE_INVALID_REQUEST,
                "Failed to read file",
                e.to_string(),
            )
        })?
        .ok_or_else(|| {
            failure(
                axum::http::StatusCode::BAD_REQUEST,
                ERR_CODE_INVALID_REQUEST,
                "Failed to read file",
                "multipart body has no file field".to_string(),
            )
        })?;

    let file_name = field
        .file_name()
        .map(|n| n.to_string())
        .filter(|n| !n.is_empty() && !n.contains('/') && !n.contains('\\'))
        .ok_or_else(|| {
            failure(
                axum::http::StatusCode::BAD_REQUEST,
                ERR_CODE_INVALID_REQUEST,
                "Failed to read file",
                "upload is missing a usable filename".to_string(),
            )
        })?;

    let bytes = field.bytes().await.map_err(|e| {
        failure(
            axum::http::StatusCode::BAD_REQUEST,
            ERR_CODE_INVALID_REQUEST,
            "Failed to read file",
            e.to_string(),
        )
    })?;

    // Stage the upload outside the asset directory; the store call copies
    // it in only once the entry is accepted.
    let scratch = tempfile::tempdir().map_err(|e| {
        error_response(e.into(), "Failed to stage upload")
    })?;
    let staged_path = scratch.path().join(&file_name);
    std::fs::write(&staged_path, &bytes)
        .map_err(|e| error_response(e.into(), "Failed to stage upload"))?;

    collection
        .store(&staged_path, Metadata::new())
        .await
        .map_err(|e| error_response(e, "Failed to store file"))?;

    Ok(success(
        "File uploaded successfully",
        json!({
            "filename": file_name,
            "collection": name,
            "uploaded_at": Utc::now().to_rfc3339(),
        }),
    ))
}

/// GET /api/collections/{name}/entries
pub async fn list_entries(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult {
    let collection = state
        .get_collection(&name)
        .await
        .map_err(|e| error_response(e, "Collection not found"))?;

    let entries = collection.list_entries().await;
    Ok(success(
        "Entries retrieved successfully",
        json!({
            "collection": name,
            "count": entries.len(),
            "entries": entries,
        }),
    ))
}

/// GET /api/collections/{name}/entries/{entry}
///
/// Returns the entry's original extracted text (no chunk overlap) and the
/// number of chunks it occupies.
pub async fn get_entry_content(
    State(state): State<AppState>,
    Path((name, entry)): Path<(String, String)>,
) -> ApiResult {
    let collection = state
        .get_collection(&name)
        .await
        .map_err(|e| error_response(e, "Collection not found"))?;

    let (content, chunk_count) = collection
        .get_entry_text(&entry)
        .await
        .map_err(|e| error_response(e, "Failed to get entry content"))?;

    Ok(success(
        "Entry content retrieved successfully",
        json!({
            "collection": name,
            "entry": entry,
            "content": content,
            "chunk_count": chunk_count,
        }),
    ))
}

/// POST /api/collections/{name}/search
pub async fn search(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(mut req): Json<SearchRequest>,
) -> ApiResult {
    let collection = state
        .get_collection(&name)
        .await
        .map_err(|e| error_response(e, "Collection not found"))?;

    if req.max_results == 0 {
        req.max_results = if collection.list_entries().await.len() >= 5 {
            5
        } else {
            1
        };
    }

    let results = collection
        .search(&req.query, req.max_results)
        .await
        .map_err(|e| error_response(e, "Failed to search collection"))?;

    Ok(success(
        "Search completed successfully",
        json!({
            "query": req.query,
            "max_results": req.max_results,
            "count": results.len(),
            "results": results,
        }),
    ))
}

/// POST /api/collections/{name}/reset
pub async fn reset(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult {
    let collection = state
        .get_collection(&name)
        .await
        .map_err(|e| error_response(e, "Collection not found"))?;

    collection
        .reset()
        .await
        .map_err(|e| error_response(e, "Failed to reset collection"))?;
    state.forget_collection(&name).await;

    Ok(success(
        "Collection reset successfully",
        json!({
            "collection": name,
            "reset_at": Utc::now().to_rfc3339(),
        }),
    ))
}

/// DELETE /api/collections/{name}/entry
pub async fn remove_entry(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RemoveEntryRequest>,
) -> ApiResult {
    let collection = state
        .get_collection(&name)
        .await
        .map_err(|e| error_response(e, "Collection not found"))?;

    collection
        .remove_entry(&req.entry)
        .await
        .map_err(|e| error_response(e, "Failed to remove entry"))?;

    let remaining = collection.list_entries().await;
    Ok(success(
        "Entry deleted successfully",
        json!({
            "deleted_entry": req.entry,
            "entry_count": remaining.len(),
            "remaining_entries": remaining,
        }),
    ))
}
