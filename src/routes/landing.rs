use crate::{state::AppState, utils::html};
use axum::{extract::State, response::Html, routing::get, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(landing))
        .route("/health", get(health_check))
}

async fn landing(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(html::landing_page(&state.config.oauth_provider))
}

async fn health_check(State(state): State<Arc<AppState>>) -> axum::Json<Value> {
    axum::Json(json!({
        "status": "ok",
        "service": "smart-bookmark",
        "backend": state.config.backend_mode.to_string(),
    }))
}
