use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use smart_bookmark::{
    app,
    config::Config,
    models::user::UserSession,
    services::{Backend, InMemoryBackend},
    state::AppState,
    utils::validation::INVALID_URL_MESSAGE,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{net::TcpStream, time::timeout};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Error as WsError, Message},
    MaybeTlsStream, WebSocketStream,
};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn spawn_app() -> (SocketAddr, InMemoryBackend) {
    let config = Config::for_memory_backend();
    let backend = InMemoryBackend::new(&config.bookmarks_table, &config.demo_user_email);
    let state = Arc::new(AppState::new(config, Arc::new(backend.clone())));

    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app(state).into_make_service());
    tokio::spawn(server);
    (addr, backend)
}

async fn connect(addr: SocketAddr, session: Option<&UserSession>) -> Result<Socket, WsError> {
    let mut request = format!("ws://{}/dashboard/live", addr)
        .into_client_request()
        .unwrap();
    if let Some(session) = session {
        let cookie = format!("sb-access-token={}", session.access_token);
        request
            .headers_mut()
            .insert("cookie", HeaderValue::from_str(&cookie).unwrap());
    }
    connect_async(request).await.map(|(socket, _)| socket)
}

async fn next_json(socket: &mut Socket) -> Value {
    timeout(Duration::from_secs(2), async {
        loop {
            match socket.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("socket ended: {:?}", other),
            }
        }
    })
    .await
    .expect("no message from server")
}

/// 下一条非快照消息
async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let message = next_json(socket).await;
        if message["type"] != "snapshot" {
            return message;
        }
    }
}

async fn send(socket: &mut Socket, message: Value) {
    socket.send(Message::Text(message.to_string())).await.unwrap();
}

async fn wait_for_release(backend: &InMemoryBackend) {
    timeout(Duration::from_secs(2), async {
        while backend.active_subscriptions() != 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("subscription not released");
}

#[tokio::test]
async fn upgrade_without_session_is_unauthorized() {
    let (addr, backend) = spawn_app().await;

    match connect(addr, None).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        other => panic!("expected 401, got {:?}", other.map(|_| ())),
    }
    assert_eq!(backend.active_subscriptions(), 0);
}

#[tokio::test]
async fn initial_snapshot_is_loaded_list() {
    let (addr, backend) = spawn_app().await;
    let session = backend.sign_in_as("alice@example.com");

    let mut socket = connect(addr, Some(&session)).await.unwrap();
    let first = next_json(&mut socket).await;
    assert_eq!(first, json!({ "type": "snapshot", "loading": false, "bookmarks": [] }));
    assert_eq!(backend.active_subscriptions(), 1);
}

#[tokio::test]
async fn create_reports_saving_then_clears_form() {
    let (addr, backend) = spawn_app().await;
    let session = backend.sign_in_as("alice@example.com");
    let mut socket = connect(addr, Some(&session)).await.unwrap();
    next_json(&mut socket).await;

    send(&mut socket, json!({ "type": "create", "title": "GitHub", "url": "https://github.com" })).await;

    let mut events = Vec::new();
    let snapshot = loop {
        let message = next_json(&mut socket).await;
        if message["type"] == "snapshot" && message["bookmarks"].as_array().unwrap().len() == 1 {
            break message;
        }
        if message["type"] != "snapshot" {
            events.push(message);
        }
    };

    assert_eq!(
        events,
        vec![
            json!({ "type": "saving", "value": true }),
            json!({ "type": "saving", "value": false }),
            json!({ "type": "form_cleared" }),
        ]
    );
    assert_eq!(snapshot["bookmarks"][0]["title"], "GitHub");
    assert_eq!(snapshot["bookmarks"][0]["url"], "https://github.com");
}

#[tokio::test]
async fn invalid_url_alerts_and_empty_fields_are_silent() {
    let (addr, backend) = spawn_app().await;
    let session = backend.sign_in_as("alice@example.com");
    let mut socket = connect(addr, Some(&session)).await.unwrap();
    next_json(&mut socket).await;

    // 空字段不产生任何消息，下一条应是非法地址的提示
    send(&mut socket, json!({ "type": "create", "title": "", "url": "" })).await;
    send(&mut socket, json!({ "type": "create", "title": "Bad", "url": "ftp-not-a-url" })).await;
    assert_eq!(
        next_event(&mut socket).await,
        json!({ "type": "alert", "message": INVALID_URL_MESSAGE })
    );

    send(&mut socket, json!({ "type": "create", "title": "Blank", "url": "   " })).await;
    assert_eq!(next_event(&mut socket).await["type"], "alert");
    assert_eq!(backend.row_count(), 0);
}

#[tokio::test]
async fn store_failure_keeps_form_populated() {
    let (addr, backend) = spawn_app().await;
    let session = backend.sign_in_as("alice@example.com");
    let mut socket = connect(addr, Some(&session)).await.unwrap();
    next_json(&mut socket).await;

    // 令牌在升级之后失效，写入请求会被后端拒绝
    backend.sign_out(&session.access_token).await.unwrap();

    send(&mut socket, json!({ "type": "create", "title": "GitHub", "url": "https://github.com" })).await;
    assert_eq!(next_event(&mut socket).await, json!({ "type": "saving", "value": true }));
    assert_eq!(next_event(&mut socket).await, json!({ "type": "saving", "value": false }));

    send(&mut socket, json!({ "type": "create", "title": "Bad", "url": "ftp-not-a-url" })).await;
    assert_eq!(next_event(&mut socket).await["type"], "alert");
    assert_eq!(backend.row_count(), 0);
}

#[tokio::test]
async fn closing_socket_releases_subscription() {
    let (addr, backend) = spawn_app().await;
    let session = backend.sign_in_as("alice@example.com");

    let mut socket = connect(addr, Some(&session)).await.unwrap();
    next_json(&mut socket).await;
    assert_eq!(backend.active_subscriptions(), 1);

    socket.close(None).await.unwrap();
    wait_for_release(&backend).await;

    let mut dropped = connect(addr, Some(&session)).await.unwrap();
    next_json(&mut dropped).await;
    drop(dropped);
    wait_for_release(&backend).await;
}
