use crate::{
    error::AppError,
    models::{
        bookmark::CreateBookmarkRequest,
        realtime::{LiveClientMessage, LiveServerMessage},
        user::UserSession,
    },
    services::dashboard::Dashboard,
    state::AppState,
    utils::middleware::session_token,
};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use std::sync::Arc;
use tracing::{debug, info, warn};

type LiveSink = SplitSink<WebSocket, Message>;

/// GET /dashboard/live
///
/// 连接存续期间即视图存续期间，任一方关闭时卸载仪表盘
pub async fn live_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Response {
    let token = session_token(&headers, state.auth_service.session_cookie_name());
    let Some(session) = state.auth_service.current_session(token.as_deref()).await else {
        return AppError::unauthorized("Not signed in").into_response();
    };

    info!("Live dashboard upgrade for user: {}", session.user_id());
    ws.on_upgrade(move |socket| run_live_session(socket, state, session))
}

async fn run_live_session(socket: WebSocket, state: Arc<AppState>, session: UserSession) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let dashboard = Dashboard::mount(state.backend.clone(), session).await;
    let mut snapshots = dashboard.watch();

    let initial = snapshots.borrow_and_update().clone();
    if send(&mut ws_tx, &LiveServerMessage::from(initial)).await {
        loop {
            tokio::select! {
                changed = snapshots.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let snapshot = snapshots.borrow_and_update().clone();
                    if !send(&mut ws_tx, &LiveServerMessage::from(snapshot)).await {
                        break;
                    }
                }
                incoming = ws_rx.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            if !handle_client_message(&dashboard, &mut ws_tx, &text).await {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(e)) => {
                            warn!("Live socket error for user {}: {}", dashboard.user().id, e);
                            break;
                        }
                    }
                }
            }
        }
    }

    dashboard.unmount().await;
}

/// 连接不可写时返回 false
async fn handle_client_message(dashboard: &Dashboard, ws_tx: &mut LiveSink, text: &str) -> bool {
    let message = match serde_json::from_str::<LiveClientMessage>(text) {
        Ok(message) => message,
        Err(e) => {
            debug!("Ignoring malformed live message: {}", e);
            return true;
        }
    };

    match message {
        LiveClientMessage::Create { title, url } => {
            let row = match dashboard.validate(CreateBookmarkRequest { title, url }) {
                Ok(Some(row)) => row,
                Ok(None) => return true,
                Err(e) => {
                    return send(ws_tx, &LiveServerMessage::Alert { message: alert_text(&e) }).await;
                }
            };

            if !send(ws_tx, &LiveServerMessage::Saving { value: true }).await {
                return false;
            }
            // 写入失败不提示用户，表单保持原样
            let saved = dashboard.save(row).await.is_ok();
            if !send(ws_tx, &LiveServerMessage::Saving { value: false }).await {
                return false;
            }
            if saved {
                return send(ws_tx, &LiveServerMessage::FormCleared).await;
            }
            true
        }
        LiveClientMessage::Delete { id } => {
            let _ = dashboard.delete(&id).await;
            true
        }
    }
}

fn alert_text(error: &AppError) -> String {
    match error {
        AppError::Validation(message) => message.clone(),
        other if other.is_user_facing() => other.to_string(),
        other => {
            warn!("Unexpected create failure: {}", other);
            "Could not save the bookmark".to_string()
        }
    }
}

async fn send(ws_tx: &mut LiveSink, message: &LiveServerMessage) -> bool {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize live message: {}", e);
            return true;
        }
    };
    ws_tx.send(Message::Text(text)).await.is_ok()
}
