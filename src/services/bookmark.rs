use crate::{
    error::{AppError, Result},
    models::{
        bookmark::{Bookmark, CreateBookmarkRequest, CreateOutcome, NewBookmark},
        user::UserSession,
    },
    services::backend::Backend,
    utils::validation::{is_blank, validate_target_url},
};
use std::sync::Arc;
use tracing::{debug, info, warn};
use validator::Validate;

/// 书签的读取、创建和删除。所有权由后端规则保证，这里只负责校验和组装请求。
#[derive(Clone)]
pub struct BookmarkService {
    backend: Arc<dyn Backend>,
}

impl BookmarkService {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        Self { backend }
    }

    /// 当前用户的全部书签，按创建时间倒序
    pub async fn list(&self, session: &UserSession) -> Result<Vec<Bookmark>> {
        debug!("Fetching bookmarks for user: {}", session.user_id());
        self.backend.select_bookmarks(session).await
    }

    /// 校验创建表单。字段为空串时返回 `Ok(None)`，调用方静默忽略；
    /// 只含空白的地址不算空，会在 URL 校验时报错
    pub fn prepare(
        &self,
        session: &UserSession,
        request: CreateBookmarkRequest,
    ) -> Result<Option<NewBookmark>> {
        if request.title.is_empty() || request.url.is_empty() {
            debug!("Ignoring create with empty field for user: {}", session.user_id());
            return Ok(None);
        }

        request.validate().map_err(AppError::ValidatorError)?;

        let url = request.url.trim();
        validate_target_url(url)?;

        Ok(Some(NewBookmark {
            title: request.title.trim().to_string(),
            url: url.to_string(),
            user_id: session.user_id().to_string(),
        }))
    }

    pub async fn insert(&self, session: &UserSession, row: NewBookmark) -> Result<()> {
        let title = row.title.clone();
        match self.backend.insert_bookmark(session, row).await {
            Ok(()) => {
                info!("Created bookmark '{}' for user: {}", title, session.user_id());
                Ok(())
            }
            Err(e) => {
                warn!("Failed to create bookmark for user {}: {}", session.user_id(), e);
                Err(e)
            }
        }
    }

    pub async fn create(
        &self,
        session: &UserSession,
        request: CreateBookmarkRequest,
    ) -> Result<CreateOutcome> {
        match self.prepare(session, request)? {
            Some(row) => {
                self.insert(session, row).await?;
                Ok(CreateOutcome::Saved)
            }
            None => Ok(CreateOutcome::Ignored),
        }
    }

    pub async fn delete(&self, session: &UserSession, bookmark_id: &str) -> Result<()> {
        if is_blank(bookmark_id) {
            return Err(AppError::bad_request("Bookmark id is required"));
        }

        debug!("Deleting bookmark: {} by user: {}", bookmark_id, session.user_id());
        self.backend
            .delete_bookmark(session, bookmark_id)
            .await
            .map_err(|e| {
                warn!("Failed to delete bookmark {}: {}", bookmark_id, e);
                e
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::memory::InMemoryBackend;

    fn setup() -> (InMemoryBackend, BookmarkService, UserSession) {
        let backend = InMemoryBackend::new("bookmarks", "demo@example.com");
        let session = backend.sign_in_as("alice@example.com");
        let service = BookmarkService::new(Arc::new(backend.clone()));
        (backend, service, session)
    }

    fn request(title: &str, url: &str) -> CreateBookmarkRequest {
        CreateBookmarkRequest {
            title: title.to_string(),
            url: url.to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_valid_bookmark() {
        let (backend, service, session) = setup();

        let outcome = service
            .create(&session, request("  GitHub ", " https://github.com "))
            .await
            .unwrap();
        assert_eq!(outcome, CreateOutcome::Saved);

        let rows = service.list(&session).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].title, "GitHub");
        assert_eq!(rows[0].url, "https://github.com");
        assert_eq!(rows[0].user_id, session.user.id);
        assert_eq!(backend.row_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_fields_are_ignored() {
        let (backend, service, session) = setup();

        for (title, url) in [("", "https://github.com"), ("GitHub", ""), ("", "")] {
            let outcome = service.create(&session, request(title, url)).await.unwrap();
            assert_eq!(outcome, CreateOutcome::Ignored);
        }
        assert_eq!(backend.row_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_url_is_rejected_without_insert() {
        let (backend, service, session) = setup();

        for url in ["not a url", "ftp-not-a-url", "github.com"] {
            let result = service.create(&session, request("Bad", url)).await;
            assert!(matches!(result, Err(AppError::Validation(_))), "{} accepted", url);
        }
        assert_eq!(backend.row_count(), 0);
    }

    #[tokio::test]
    async fn test_whitespace_url_is_rejected_not_ignored() {
        let (backend, service, session) = setup();

        let result = service.create(&session, request("T", "   ")).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(backend.row_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_requires_id() {
        let (_backend, service, session) = setup();
        assert!(matches!(
            service.delete(&session, " ").await,
            Err(AppError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_is_returned() {
        let (backend, service, session) = setup();
        backend.sign_out(&session.access_token).await.unwrap();

        let result = service.create(&session, request("GitHub", "https://github.com")).await;
        assert!(result.is_err());
        assert!(service.list(&session).await.is_err());
    }
}
