use crate::{
    error::Result,
    models::response::ApiResponse,
    state::AppState,
    utils::middleware::{session_token, CurrentSession},
};
use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap},
    response::{AppendHeaders, IntoResponse, Json, Redirect},
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// 浏览器登录/登出路由，挂载在 `/auth`
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/login", get(login))
        .route("/logout", post(logout))
}

/// JSON 接口，挂载在 `/api/auth`
pub fn api_router() -> Router<Arc<AppState>> {
    Router::new().route("/me", get(get_current_user))
}

/// 发起 OAuth 登录
/// GET /auth/login
async fn login(State(state): State<Arc<AppState>>) -> Result<impl IntoResponse> {
    let start = state.auth_service.begin_sign_in()?;

    debug!("Redirecting to identity provider");
    Ok((
        AppendHeaders([(SET_COOKIE, state.auth_service.verifier_cookie(&start.code_verifier))]),
        Redirect::to(&start.authorize_url),
    ))
}

/// 登出后总是回到登录页，即使后端登出失败
/// POST /auth/logout
async fn logout(State(state): State<Arc<AppState>>, headers: HeaderMap) -> impl IntoResponse {
    if let Some(token) = session_token(&headers, state.auth_service.session_cookie_name()) {
        state.auth_service.sign_out(&token).await;
        info!("Session signed out");
    }

    (
        AppendHeaders([(SET_COOKIE, state.auth_service.clear_session_cookie())]),
        Redirect::to("/"),
    )
}

/// 获取当前用户信息
/// GET /api/auth/me
async fn get_current_user(CurrentSession(session): CurrentSession) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "id": session.user.id,
        "email": session.user.email,
    })))
}
