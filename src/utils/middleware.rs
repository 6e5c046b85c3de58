use crate::{error::AppError, models::user::UserSession, state::AppState};
use axum::{
    body::Body,
    extract::FromRequestParts,
    headers::{authorization::Bearer, Authorization, Cookie, HeaderMapExt},
    http::{request::Parts, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use async_trait::async_trait;
use std::{net::SocketAddr, sync::Arc};
use tracing::{debug, info};

/// 读取指定名称的 cookie
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .typed_get::<Cookie>()
        .and_then(|cookie| cookie.get(name).map(str::to_string))
        .filter(|value| !value.is_empty())
}

/// 访问令牌：优先 `Authorization: Bearer`，其次会话 cookie
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    if let Some(Authorization(bearer)) = headers.typed_get::<Authorization<Bearer>>() {
        return Some(bearer.token().to_string());
    }
    cookie_value(headers, cookie_name)
}

/// 必须登录的提取器，未登录时返回 401
pub struct CurrentSession(pub UserSession);

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentSession {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers, state.auth_service.session_cookie_name());
        let session = state.auth_service.require_session(token.as_deref()).await?;
        Ok(CurrentSession(session))
    }
}

/// 请求日志中间件
pub async fn request_logging_middleware(request: Request<Body>, next: Next<Body>) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let client_ip = get_client_ip(&request);

    let start_time = std::time::Instant::now();

    debug!("Incoming request: {} {} from {}", method, uri.path(), client_ip);

    let response = next.run(request).await;

    info!(
        "Request completed: {} {} {} - {}ms",
        method,
        uri.path(),
        response.status().as_u16(),
        start_time.elapsed().as_millis()
    );

    response
}

/// 获取客户端 IP 地址
fn get_client_ip(request: &Request<Body>) -> String {
    let headers = request.headers();

    if let Some(ip) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
    {
        return ip.trim().to_string();
    }

    if let Some(ip) = headers.get("x-real-ip").and_then(|value| value.to_str().ok()) {
        return ip.to_string();
    }

    request
        .extensions()
        .get::<SocketAddr>()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
