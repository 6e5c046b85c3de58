use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use serde_json::Value;

use super::bookmark::{Bookmark, BookmarkSnapshot};

/// 变更类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// 一次已提交的变更通知。载荷只用于日志，列表总是整体重新拉取。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    pub table: String,
    pub commit_timestamp: Option<DateTime<Utc>>,
}

/// Phoenix channel 帧 (Supabase Realtime, vsn 1.0.0)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhoenixMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(rename = "ref", default)]
    pub msg_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// `postgres_changes` 事件中 `payload.data` 的部分字段
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresChangeData {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    #[serde(default)]
    pub table: String,
    #[serde(default)]
    pub commit_timestamp: Option<DateTime<Utc>>,
}

/// 服务端推送给仪表盘页面的消息
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveServerMessage {
    Snapshot {
        loading: bool,
        bookmarks: Vec<Bookmark>,
    },
    Saving {
        value: bool,
    },
    Alert {
        message: String,
    },
    FormCleared,
}

impl From<BookmarkSnapshot> for LiveServerMessage {
    fn from(snapshot: BookmarkSnapshot) -> Self {
        LiveServerMessage::Snapshot {
            loading: snapshot.loading,
            bookmarks: snapshot.bookmarks,
        }
    }
}

/// 仪表盘页面发来的操作
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveClientMessage {
    Create {
        #[serde(default)]
        title: String,
        #[serde(default)]
        url: String,
    },
    Delete {
        id: String,
    },
}
