use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;
use uuid::Uuid;

use crate::{
    error::Result,
    models::{
        bookmark::{Bookmark, NewBookmark},
        realtime::ChangeEvent,
        user::{SessionUser, UserSession},
    },
};

/// 每个订阅的事件队列容量。队列满时丢弃新事件，已排队的一个事件足以触发下一次重新拉取
pub const CHANGE_FEED_CAPACITY: usize = 64;

#[async_trait]
pub trait Backend: Send + Sync {
    /// OAuth 授权地址，完成后带着授权码跳回 `redirect_to`
    fn authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> Result<String>;

    /// 授权码换会话
    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<UserSession>;

    /// 令牌对应的用户；令牌无效或已失效时返回 `Ok(None)`
    async fn get_user(&self, access_token: &str) -> Result<Option<SessionUser>>;

    async fn sign_out(&self, access_token: &str) -> Result<()>;

    /// 会话用户的全部行，按创建时间倒序
    async fn select_bookmarks(&self, session: &UserSession) -> Result<Vec<Bookmark>>;

    async fn insert_bookmark(&self, session: &UserSession, row: NewBookmark) -> Result<()>;

    /// 按 ID 删除，不属于会话用户的行保持不变且不报错
    async fn delete_bookmark(&self, session: &UserSession, id: &str) -> Result<()>;

    /// 订阅会话用户行的插入、更新和删除
    async fn subscribe(&self, session: &UserSession) -> Result<ChangeFeed>;
}

/// 一个实时订阅的句柄
///
/// 通过 [`ChangeFeed::unsubscribe`] 或丢弃句柄释放，只释放一次。
/// 生产端通过取消通道和关闭的事件队列感知释放，随后注销上游订阅。
#[derive(Debug)]
pub struct ChangeFeed {
    id: Uuid,
    events: mpsc::Receiver<ChangeEvent>,
    cancel: Option<oneshot::Sender<()>>,
}

/// 交给后端实现的生产端
#[derive(Debug)]
pub struct ChangeFeedProducer {
    pub id: Uuid,
    pub events: mpsc::Sender<ChangeEvent>,
    pub cancelled: oneshot::Receiver<()>,
}

impl ChangeFeed {
    pub fn channel() -> (ChangeFeed, ChangeFeedProducer) {
        let id = Uuid::new_v4();
        let (events_tx, events_rx) = mpsc::channel(CHANGE_FEED_CAPACITY);
        let (cancel_tx, cancel_rx) = oneshot::channel();

        (
            ChangeFeed {
                id,
                events: events_rx,
                cancel: Some(cancel_tx),
            },
            ChangeFeedProducer {
                id,
                events: events_tx,
                cancelled: cancel_rx,
            },
        )
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// 下一个变更，上游断开后返回 `None`
    pub async fn recv(&mut self) -> Option<ChangeEvent> {
        self.events.recv().await
    }

    /// 不等待地清空已排队事件，返回丢弃数量和订阅是否仍然打开
    pub fn drain_pending(&mut self) -> (usize, bool) {
        let mut drained = 0;
        loop {
            match self.events.try_recv() {
                Ok(_) => drained += 1,
                Err(TryRecvError::Empty) => return (drained, true),
                Err(TryRecvError::Disconnected) => return (drained, false),
            }
        }
    }

    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            debug!("Releasing change subscription {}", self.id);
            let _ = cancel.send(());
            self.events.close();
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.release();
    }
}
