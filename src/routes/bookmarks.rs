use crate::{
    error::Result,
    models::bookmark::{CreateBookmarkRequest, CreateOutcome},
    state::AppState,
    utils::middleware::CurrentSession,
};
use axum::{
    extract::{Path, State},
    response::Json,
    routing::{delete, get},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::debug;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_bookmarks).post(create_bookmark))
        .route("/:id", delete(delete_bookmark))
}

/// 获取当前用户的书签，按创建时间倒序
/// GET /api/bookmarks
async fn list_bookmarks(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
) -> Result<Json<Value>> {
    debug!("Listing bookmarks for user: {}", session.user_id());

    let bookmarks = state.bookmark_service.list(&session).await?;

    Ok(Json(json!({
        "success": true,
        "data": bookmarks
    })))
}

/// 创建书签
/// POST /api/bookmarks
async fn create_bookmark(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Json(request): Json<CreateBookmarkRequest>,
) -> Result<Json<Value>> {
    let outcome = state.bookmark_service.create(&session, request).await?;

    let message = match outcome {
        CreateOutcome::Saved => "Bookmark created successfully",
        CreateOutcome::Ignored => "Title and URL are required; nothing was saved",
    };

    Ok(Json(json!({
        "success": true,
        "data": { "saved": outcome == CreateOutcome::Saved },
        "message": message
    })))
}

/// 删除书签，不属于当前用户的行保持不变
/// DELETE /api/bookmarks/:id
async fn delete_bookmark(
    State(state): State<Arc<AppState>>,
    CurrentSession(session): CurrentSession,
    Path(bookmark_id): Path<String>,
) -> Result<Json<Value>> {
    state.bookmark_service.delete(&session, &bookmark_id).await?;

    Ok(Json(json!({
        "success": true,
        "message": "Bookmark deleted successfully"
    })))
}
