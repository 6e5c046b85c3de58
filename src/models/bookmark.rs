use serde::{Deserialize, Serialize};
use chrono::{DateTime, Utc};
use validator::Validate;

/// 后端存储的书签行，`id` 和 `created_at` 由存储分配
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bookmark {
    #[serde(with = "crate::utils::serde_helpers::row_id")]
    pub id: String,
    #[serde(with = "crate::utils::serde_helpers::row_id")]
    pub user_id: String,
    pub title: String,
    pub url: String,
    pub created_at: DateTime<Utc>,
}

/// 创建表单
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
pub struct CreateBookmarkRequest {
    #[serde(default)]
    #[validate(length(max = 500, message = "Title is too long"))]
    pub title: String,
    #[serde(default)]
    #[validate(length(max = 2048, message = "URL is too long"))]
    pub url: String,
}

/// 插入数据，owner 只取自会话
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewBookmark {
    pub title: String,
    pub url: String,
    pub user_id: String,
}

/// 本地持有的列表，每次重新拉取整体替换
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BookmarkSnapshot {
    pub loading: bool,
    pub bookmarks: Vec<Bookmark>,
}

impl BookmarkSnapshot {
    pub fn loading() -> Self {
        Self {
            loading: true,
            bookmarks: Vec::new(),
        }
    }

    pub fn loaded(bookmarks: Vec<Bookmark>) -> Self {
        Self {
            loading: false,
            bookmarks,
        }
    }
}

/// Result of a create attempt that passed validation or was skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CreateOutcome {
    /// 标题或地址为空，未发送
    Ignored,
    /// The store accepted the row; the form should be cleared.
    Saved,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_row_with_numeric_id() {
        let row: Bookmark = serde_json::from_value(json!({
            "id": 42,
            "user_id": "7c4f0f1e-0000-4000-8000-000000000001",
            "title": "GitHub",
            "url": "https://github.com",
            "created_at": "2024-05-01T10:00:00.123456+00:00"
        }))
        .unwrap();

        assert_eq!(row.id, "42");
        assert_eq!(row.title, "GitHub");
    }

    #[test]
    fn test_create_request_defaults_missing_fields() {
        let request: CreateBookmarkRequest = serde_json::from_value(json!({ "title": "x" })).unwrap();
        assert_eq!(request.url, "");
    }

    #[test]
    fn test_create_request_length_limits() {
        let request = CreateBookmarkRequest {
            title: "a".repeat(501),
            url: "https://example.com".to_string(),
        };
        assert!(request.validate().is_err());
    }
}
