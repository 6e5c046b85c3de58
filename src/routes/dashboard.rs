use crate::{
    state::AppState,
    utils::{
        html,
        middleware::{cookie_value, session_token},
    },
};
use axum::{
    extract::{Query, State},
    http::{header::SET_COOKIE, HeaderMap},
    response::{AppendHeaders, Html, IntoResponse, Redirect, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Deserialize)]
pub struct DashboardQuery {
    pub code: Option<String>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(dashboard))
        .route("/live", get(super::live::live_handler))
}

/// 仪表盘入口：先处理 OAuth 回调，再做会话守卫
/// GET /dashboard
async fn dashboard(
    State(state): State<Arc<AppState>>,
    Query(query): Query<DashboardQuery>,
    headers: HeaderMap,
) -> Response {
    if let Some(code) = query.code.filter(|code| !code.is_empty()) {
        return complete_sign_in(&state, &headers, &code).await;
    }

    let auth = &state.auth_service;
    let token = session_token(&headers, auth.session_cookie_name());
    match auth.current_session(token.as_deref()).await {
        Some(session) => {
            debug!("Rendering dashboard for user: {}", session.user_id());
            Html(html::dashboard_page(session.user.display_name())).into_response()
        }
        // 未登录或查询失败都静默跳转
        None => Redirect::to("/").into_response(),
    }
}

async fn complete_sign_in(state: &AppState, headers: &HeaderMap, code: &str) -> Response {
    let auth = &state.auth_service;
    let Some(verifier) = cookie_value(headers, auth.verifier_cookie_name()) else {
        warn!("OAuth callback without a code verifier cookie");
        return Redirect::to("/").into_response();
    };

    match auth.complete_sign_in(code, &verifier).await {
        Ok(session) => {
            info!("Signed in user: {}", session.user_id());
            (
                AppendHeaders([
                    (SET_COOKIE, auth.session_cookie(&session.access_token)),
                    (SET_COOKIE, auth.clear_verifier_cookie()),
                ]),
                Redirect::to("/dashboard"),
            )
                .into_response()
        }
        Err(e) => {
            warn!("OAuth code exchange failed: {}", e);
            (
                AppendHeaders([(SET_COOKIE, auth.clear_verifier_cookie())]),
                Redirect::to("/"),
            )
                .into_response()
        }
    }
}
