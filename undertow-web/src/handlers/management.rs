//! Cache diagnostics and URL issuing.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use undertow_core::{CacheStatistics, FolderId};

use crate::error::WebError;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct SignQuery {
    pub folder: String,
    pub path: String,
}

pub async fn cache_stats(State(state): State<AppState>) -> Json<CacheStatistics> {
    Json(state.cache.statistics())
}

/// Purges the shared block cache.
pub async fn clear_cache(State(state): State<AppState>) -> StatusCode {
    let dropped = state.cache.len();
    state.cache.purge();
    info!("Block cache cleared ({} entries dropped)", dropped);
    StatusCode::NO_CONTENT
}

/// Issues a signed URL for a file the index knows about.
///
/// # Errors
///
/// - `WebError::NotFound` - If the index has no such file
pub async fn sign_url(
    State(state): State<AppState>,
    Query(query): Query<SignQuery>,
) -> Result<Json<serde_json::Value>, WebError> {
    let folder = FolderId::new(query.folder);
    let file = state.index.resolve_file(&folder, &query.path).await?;

    Ok(Json(json!({
        "url": state.signer.issue_url(&folder, &file.path),
        "size": file.size,
        "content_type": super::content_type_for(&file.path),
    })))
}
