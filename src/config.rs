use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{AppError, Result};

/// 后端协作服务的运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendMode {
    /// 托管的 Supabase 项目 (GoTrue + PostgREST + Realtime)
    Supabase,
    /// 进程内实现，用于本地演示和测试
    Memory,
}

impl std::fmt::Display for BackendMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendMode::Supabase => write!(f, "supabase"),
            BackendMode::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for BackendMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "supabase" => Ok(BackendMode::Supabase),
            "memory" => Ok(BackendMode::Memory),
            other => Err(AppError::Config(format!("Unknown BACKEND_MODE: {}", other))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    // Server configuration
    pub server_host: String,
    pub server_port: u16,
    pub environment: String,
    pub log_level: String,
    pub log_format: String,

    // Public URLs
    pub public_url: String,
    pub post_login_redirect: String,

    // Backend collaborator
    pub backend_mode: BackendMode,
    pub supabase_url: String,
    pub supabase_anon_key: String,
    pub supabase_jwt_secret: Option<String>,
    pub bookmarks_table: String,

    // Authentication configuration
    pub oauth_provider: String,
    pub demo_user_email: String,
    pub session_cookie: String,
    pub verifier_cookie: String,
    pub cookie_secure: bool,
    pub user_cache_ttl: u64,

    // Networking
    pub http_timeout: u64,
    pub realtime_heartbeat: u64,

    // CORS configuration
    pub cors_allowed_origins: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let public_url = env::var("PUBLIC_URL")
            .unwrap_or_else(|_| "http://localhost:3000".to_string());
        let post_login_redirect = env::var("POST_LOGIN_REDIRECT")
            .unwrap_or_else(|_| format!("{}/dashboard", public_url.trim_end_matches('/')));

        let config = Config {
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: parse_var("SERVER_PORT", "3000")?,
            environment: env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string()),
            log_level: env::var("LOG_LEVEL")
                .unwrap_or_else(|_| "smart_bookmark=debug,tower_http=debug".to_string()),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),

            public_url,
            post_login_redirect,

            backend_mode: parse_var("BACKEND_MODE", "supabase")?,
            supabase_url: env::var("SUPABASE_URL").unwrap_or_default(),
            supabase_anon_key: env::var("SUPABASE_ANON_KEY").unwrap_or_default(),
            supabase_jwt_secret: env::var("SUPABASE_JWT_SECRET").ok().filter(|s| !s.is_empty()),
            bookmarks_table: env::var("BOOKMARKS_TABLE")
                .unwrap_or_else(|_| "bookmarks".to_string()),

            oauth_provider: env::var("OAUTH_PROVIDER").unwrap_or_else(|_| "google".to_string()),
            demo_user_email: env::var("DEMO_USER_EMAIL")
                .unwrap_or_else(|_| "demo@example.com".to_string()),
            session_cookie: env::var("SESSION_COOKIE")
                .unwrap_or_else(|_| "sb-access-token".to_string()),
            verifier_cookie: env::var("VERIFIER_COOKIE")
                .unwrap_or_else(|_| "sb-code-verifier".to_string()),
            cookie_secure: parse_var("COOKIE_SECURE", "false")?,
            user_cache_ttl: parse_var("USER_CACHE_TTL", "300")?,

            http_timeout: parse_var("HTTP_TIMEOUT", "30")?,
            realtime_heartbeat: parse_var("REALTIME_HEARTBEAT", "25")?,

            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
        };

        config.validate()?;
        Ok(config)
    }

    /// 检查后端模式所需的配置项
    pub fn validate(&self) -> Result<()> {
        if self.backend_mode == BackendMode::Supabase {
            if self.supabase_url.is_empty() {
                return Err(AppError::Config("SUPABASE_URL must be set".to_string()));
            }
            if self.supabase_anon_key.is_empty() {
                return Err(AppError::Config("SUPABASE_ANON_KEY must be set".to_string()));
            }
            url::Url::parse(&self.supabase_url)
                .map_err(|e| AppError::Config(format!("Invalid SUPABASE_URL: {}", e)))?;
        }
        if self.realtime_heartbeat == 0 {
            return Err(AppError::Config("REALTIME_HEARTBEAT must be positive".to_string()));
        }
        Ok(())
    }

    /// 进程内后端的配置，供本地运行和测试使用
    pub fn for_memory_backend() -> Self {
        Config {
            server_host: "127.0.0.1".to_string(),
            server_port: 3000,
            environment: "test".to_string(),
            log_level: "smart_bookmark=debug".to_string(),
            log_format: "pretty".to_string(),
            public_url: "http://localhost:3000".to_string(),
            post_login_redirect: "http://localhost:3000/dashboard".to_string(),
            backend_mode: BackendMode::Memory,
            supabase_url: String::new(),
            supabase_anon_key: String::new(),
            supabase_jwt_secret: None,
            bookmarks_table: "bookmarks".to_string(),
            oauth_provider: "google".to_string(),
            demo_user_email: "demo@example.com".to_string(),
            session_cookie: "sb-access-token".to_string(),
            verifier_cookie: "sb-code-verifier".to_string(),
            cookie_secure: false,
            user_cache_ttl: 300,
            http_timeout: 30,
            realtime_heartbeat: 25,
            cors_allowed_origins: "http://localhost:3000".to_string(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

fn parse_var<T>(key: &str, default: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.parse::<T>()
        .map_err(|e| AppError::Config(format!("Invalid value for {}: {} ({})", key, raw, e)))
}
