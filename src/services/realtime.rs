use crate::{
    error::{AppError, Result},
    models::{
        realtime::{ChangeEvent, PhoenixMessage, PostgresChangeData},
        user::UserSession,
    },
    services::backend::{ChangeFeed, ChangeFeedProducer},
};
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

const JOIN_REF: &str = "1";
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct RealtimeClient {
    socket_url: String,
    table: String,
    heartbeat: Duration,
}

/// 收到一帧后的处理方式
#[derive(Debug, PartialEq)]
pub enum FrameAction {
    Change(ChangeEvent),
    JoinReply { ok: bool, reason: Option<String> },
    ChannelClosed,
    Ignore,
}

impl RealtimeClient {
    pub fn new(base_url: &str, anon_key: &str, table: &str, heartbeat: Duration) -> Result<Self> {
        let mut url = Url::parse(base_url)?;
        let scheme = match url.scheme() {
            "https" => "wss",
            "http" => "ws",
            other => {
                return Err(AppError::Config(format!(
                    "Unsupported scheme for realtime endpoint: {}",
                    other
                )))
            }
        };
        url.set_scheme(scheme)
            .map_err(|_| AppError::Config("Cannot derive realtime endpoint".to_string()))?;
        url.set_path("/realtime/v1/websocket");
        url.query_pairs_mut()
            .clear()
            .append_pair("apikey", anon_key)
            .append_pair("vsn", "1.0.0");

        Ok(Self {
            socket_url: url.to_string(),
            table: table.to_string(),
            heartbeat,
        })
    }

    pub fn socket_url(&self) -> &str {
        &self.socket_url
    }

    pub fn topic(&self) -> String {
        format!("realtime:{}-realtime", self.table)
    }

    /// 连接并加入按 owner 过滤的频道。加入确认之前的任何失败都会关闭连接
    pub async fn subscribe(&self, session: &UserSession) -> Result<ChangeFeed> {
        let topic = self.topic();
        let (socket, _) = connect_async(self.socket_url.as_str()).await?;
        let (mut sink, mut stream) = socket.split();

        let join = join_message(&topic, &self.table, session.user_id(), &session.access_token);
        sink.send(Message::Text(serde_json::to_string(&join)?)).await?;

        let joined = timeout(JOIN_TIMEOUT, async {
            while let Some(message) = stream.next().await {
                if let Message::Text(text) = message? {
                    match parse_frame(&text, &topic) {
                        FrameAction::JoinReply { ok: true, .. } => return Ok(()),
                        FrameAction::JoinReply { ok: false, reason } => {
                            return Err(AppError::Backend(format!(
                                "realtime join rejected: {}",
                                reason.unwrap_or_default()
                            )))
                        }
                        _ => {}
                    }
                }
            }
            Err::<(), AppError>(AppError::Backend(
                "realtime socket closed during join".to_string(),
            ))
        })
        .await
        .map_err(|_| AppError::Backend("realtime join timed out".to_string()))?;
        joined?;

        let (feed, producer) = ChangeFeed::channel();
        info!("Joined {} for user {} (subscription {})", topic, session.user_id(), producer.id);

        let heartbeat = self.heartbeat;
        tokio::spawn(async move {
            run_channel(sink, stream, producer, topic, heartbeat).await;
        });

        Ok(feed)
    }
}

async fn run_channel<S, R>(
    mut sink: S,
    mut stream: R,
    producer: ChangeFeedProducer,
    topic: String,
    heartbeat_every: Duration,
) where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
    R: futures::Stream<Item = std::result::Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin,
{
    let ChangeFeedProducer {
        id,
        events,
        mut cancelled,
    } = producer;
    let mut heartbeat = interval(heartbeat_every);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    heartbeat.tick().await;
    let mut next_ref: u64 = 2;

    loop {
        tokio::select! {
            _ = &mut cancelled => {
                leave(&mut sink, &topic, next_ref).await;
                break;
            }
            _ = events.closed() => {
                leave(&mut sink, &topic, next_ref).await;
                break;
            }
            _ = heartbeat.tick() => {
                let frame = heartbeat_message(next_ref);
                next_ref += 1;
                if let Err(e) = send_frame(&mut sink, &frame).await {
                    warn!("Realtime heartbeat failed for subscription {}: {}", id, e);
                    break;
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => match parse_frame(&text, &topic) {
                    FrameAction::Change(event) => {
                        debug!("Change {:?} on {} for subscription {}", event.kind, event.table, id);
                        // 队列满时丢弃，已排队的事件足以触发一次完整拉取
                        let _ = events.try_send(event);
                    }
                    FrameAction::ChannelClosed => {
                        warn!("Realtime channel {} closed by server", topic);
                        break;
                    }
                    FrameAction::JoinReply { .. } | FrameAction::Ignore => {}
                },
                Some(Ok(Message::Ping(data))) => {
                    if sink.send(Message::Pong(data)).await.is_err() {
                        break;
                    }
                }
                Some(Ok(Message::Close(_))) | None => {
                    warn!("Realtime socket closed for subscription {}", id);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("Realtime socket error for subscription {}: {}", id, e);
                    break;
                }
            },
        }
    }

    let _ = sink.close().await;
    debug!("Realtime task for subscription {} finished", id);
}

async fn leave<S>(sink: &mut S, topic: &str, msg_ref: u64)
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let frame = PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_leave".to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    };
    if let Err(e) = send_frame(sink, &frame).await {
        debug!("Failed to send phx_leave on {}: {}", topic, e);
    }
}

async fn send_frame<S>(sink: &mut S, frame: &PhoenixMessage) -> Result<()>
where
    S: futures::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let text = serde_json::to_string(frame)?;
    sink.send(Message::Text(text)).await?;
    Ok(())
}

pub fn join_message(topic: &str, table: &str, owner_id: &str, access_token: &str) -> PhoenixMessage {
    PhoenixMessage {
        topic: topic.to_string(),
        event: "phx_join".to_string(),
        payload: json!({
            "config": {
                "broadcast": { "self": false },
                "presence": { "key": "" },
                "postgres_changes": [{
                    "event": "*",
                    "schema": "public",
                    "table": table,
                    "filter": format!("user_id=eq.{}", owner_id),
                }]
            },
            "access_token": access_token,
        }),
        msg_ref: Some(JOIN_REF.to_string()),
        join_ref: Some(JOIN_REF.to_string()),
    }
}

pub fn heartbeat_message(msg_ref: u64) -> PhoenixMessage {
    PhoenixMessage {
        topic: "phoenix".to_string(),
        event: "heartbeat".to_string(),
        payload: json!({}),
        msg_ref: Some(msg_ref.to_string()),
        join_ref: None,
    }
}

pub fn parse_frame(text: &str, topic: &str) -> FrameAction {
    let frame: PhoenixMessage = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(e) => {
            debug!("Ignoring malformed realtime frame: {}", e);
            return FrameAction::Ignore;
        }
    };
    if frame.topic != topic {
        return FrameAction::Ignore;
    }

    match frame.event.as_str() {
        "postgres_changes" => {
            let data = frame.payload.get("data").cloned().unwrap_or(Value::Null);
            match serde_json::from_value::<PostgresChangeData>(data) {
                Ok(data) => FrameAction::Change(ChangeEvent {
                    kind: data.kind,
                    table: data.table,
                    commit_timestamp: data.commit_timestamp,
                }),
                Err(e) => {
                    debug!("Ignoring unrecognised postgres_changes payload: {}", e);
                    FrameAction::Ignore
                }
            }
        }
        "phx_reply" if frame.msg_ref.as_deref() == Some(JOIN_REF) => {
            let ok = frame.payload.get("status").and_then(Value::as_str) == Some("ok");
            let reason = frame
                .payload
                .get("response")
                .map(|response| response.to_string());
            FrameAction::JoinReply { ok, reason }
        }
        "phx_close" | "phx_error" => FrameAction::ChannelClosed,
        _ => FrameAction::Ignore,
    }
}
