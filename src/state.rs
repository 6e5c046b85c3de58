use crate::{
    config::Config,
    services::{auth::AuthService, backend::Backend, bookmark::BookmarkService},
};
use std::sync::Arc;

/// 应用程序的共享状态
#[derive(Clone)]
pub struct AppState {
    /// 应用配置
    pub config: Config,

    /// 后端适配器（Supabase 或内存实现）
    pub backend: Arc<dyn Backend>,

    /// 认证服务
    pub auth_service: AuthService,

    /// 书签服务
    pub bookmark_service: BookmarkService,
}

impl AppState {
    pub fn new(config: Config, backend: Arc<dyn Backend>) -> Self {
        let auth_service = AuthService::new(&config, backend.clone());
        let bookmark_service = BookmarkService::new(backend.clone());
        Self {
            config,
            backend,
            auth_service,
            bookmark_service,
        }
    }
}
