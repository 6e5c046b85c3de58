pub mod config;
pub mod error;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;
pub mod utils;

use crate::{
    config::{BackendMode, Config},
    error::Result,
    services::{Backend, InMemoryBackend, SupabaseBackend},
    state::AppState,
};
use axum::{middleware, Router};
use std::sync::Arc;
use tracing::info;

/// 按配置选择后端实现
pub fn build_backend(config: &Config) -> Result<Arc<dyn Backend>> {
    let backend: Arc<dyn Backend> = match config.backend_mode {
        BackendMode::Supabase => {
            info!("Using Supabase backend at {}", config.supabase_url);
            Arc::new(SupabaseBackend::new(config)?)
        }
        BackendMode::Memory => {
            info!("Using in-memory backend (demo user {})", config.demo_user_email);
            Arc::new(InMemoryBackend::new(&config.bookmarks_table, &config.demo_user_email))
        }
    };
    Ok(backend)
}

/// 完整应用：路由加请求日志
pub fn app(state: Arc<AppState>) -> Router {
    routes::router(state).layer(middleware::from_fn(utils::middleware::request_logging_middleware))
}
