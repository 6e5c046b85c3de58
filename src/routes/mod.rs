pub mod auth;
pub mod bookmarks;
pub mod dashboard;
pub mod landing;
pub mod live;

use crate::{error::AppError, state::AppState};
use axum::Router;
use std::sync::Arc;

/// 应用路由（不含 CORS/压缩/追踪等外层中间件）
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(landing::router())
        .nest("/auth", auth::router())
        .nest("/dashboard", dashboard::router())
        .nest("/api/auth", auth::api_router())
        .nest("/api/bookmarks", bookmarks::router())
        .fallback(route_not_found)
        .with_state(state)
}

async fn route_not_found() -> AppError {
    AppError::not_found("Route")
}
