use crate::{
    error::Result,
    models::{
        bookmark::{BookmarkSnapshot, CreateBookmarkRequest, CreateOutcome, NewBookmark},
        user::{SessionUser, UserSession},
    },
    services::{
        backend::{Backend, ChangeFeed},
        bookmark::BookmarkService,
    },
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// 一个已挂载的仪表盘视图
///
/// 持有当前用户的变更订阅和书签快照。每次收到变更通知都整体重新拉取并替换快照，
/// 增删操作本身不修改快照。订阅由同步任务持有，卸载或丢弃视图时中止任务即释放订阅。
pub struct Dashboard {
    session: UserSession,
    bookmarks: BookmarkService,
    snapshot_tx: Arc<watch::Sender<BookmarkSnapshot>>,
    snapshot_rx: watch::Receiver<BookmarkSnapshot>,
    saving: Arc<AtomicBool>,
    sync_task: Option<JoinHandle<()>>,
}

/// 无论写入成功与否，离开作用域时清除保存标志
struct SavingGuard(Arc<AtomicBool>);

impl SavingGuard {
    fn set(flag: &Arc<AtomicBool>) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag.clone())
    }
}

impl Drop for SavingGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl Dashboard {
    /// 为已验证的会话挂载：先订阅，再加载。订阅失败时视图照常显示，只是没有实时更新
    pub async fn mount(backend: Arc<dyn Backend>, session: UserSession) -> Self {
        let bookmarks = BookmarkService::new(backend.clone());
        let (tx, snapshot_rx) = watch::channel(BookmarkSnapshot::loading());
        let snapshot_tx = Arc::new(tx);

        // 先订阅再加载，加载期间发生的变更不会丢失
        let feed = match backend.subscribe(&session).await {
            Ok(feed) => Some(feed),
            Err(e) => {
                warn!("Live subscription failed for user {}: {}", session.user_id(), e);
                None
            }
        };

        refetch(&bookmarks, &session, &snapshot_tx).await;

        let sync_task = feed.map(|feed| {
            tokio::spawn(sync_loop(
                bookmarks.clone(),
                session.clone(),
                feed,
                snapshot_tx.clone(),
            ))
        });

        info!("Dashboard mounted for user {}", session.user_id());
        Self {
            session,
            bookmarks,
            snapshot_tx,
            snapshot_rx,
            saving: Arc::new(AtomicBool::new(false)),
            sync_task,
        }
    }

    pub fn user(&self) -> &SessionUser {
        &self.session.user
    }

    pub fn snapshot(&self) -> BookmarkSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    /// 每次快照替换时唤醒
    pub fn watch(&self) -> watch::Receiver<BookmarkSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn is_saving(&self) -> bool {
        self.saving.load(Ordering::SeqCst)
    }

    pub fn is_live(&self) -> bool {
        self.sync_task
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// 只校验不发送，`Ok(None)` 表示字段为空
    pub fn validate(&self, request: CreateBookmarkRequest) -> Result<Option<NewBookmark>> {
        self.bookmarks.prepare(&self.session, request)
    }

    /// 保存标志只在写入请求期间置位
    pub async fn save(&self, row: NewBookmark) -> Result<()> {
        let _saving = SavingGuard::set(&self.saving);
        self.bookmarks.insert(&self.session, row).await
    }

    pub async fn create(&self, request: CreateBookmarkRequest) -> Result<CreateOutcome> {
        let Some(row) = self.validate(request)? else {
            return Ok(CreateOutcome::Ignored);
        };
        self.save(row).await?;
        Ok(CreateOutcome::Saved)
    }

    pub async fn delete(&self, bookmark_id: &str) -> Result<()> {
        self.bookmarks.delete(&self.session, bookmark_id).await
    }

    /// 重新拉取
    pub async fn refresh(&self) {
        refetch(&self.bookmarks, &self.session, &self.snapshot_tx).await;
    }

    /// 卸载视图并等待订阅释放
    pub async fn unmount(mut self) {
        if let Some(task) = self.sync_task.take() {
            task.abort();
            let _ = task.await;
        }
        info!("Dashboard unmounted for user {}", self.session.user_id());
    }
}

impl Drop for Dashboard {
    fn drop(&mut self) {
        if let Some(task) = self.sync_task.take() {
            debug!("Dashboard dropped for user {}; releasing subscription", self.session.user_id());
            task.abort();
        }
    }
}

/// 整体重新加载，读取失败时显示空列表
async fn refetch(
    bookmarks: &BookmarkService,
    session: &UserSession,
    snapshot_tx: &watch::Sender<BookmarkSnapshot>,
) {
    let rows = match bookmarks.list(session).await {
        Ok(rows) => rows,
        Err(e) => {
            warn!("Bookmark fetch failed for user {}: {}", session.user_id(), e);
            Vec::new()
        }
    };
    snapshot_tx.send_replace(BookmarkSnapshot::loaded(rows));
}

async fn sync_loop(
    bookmarks: BookmarkService,
    session: UserSession,
    mut feed: ChangeFeed,
    snapshot_tx: Arc<watch::Sender<BookmarkSnapshot>>,
) {
    while let Some(event) = feed.recv().await {
        // 一次拉取覆盖所有已排队的通知
        let (coalesced, _) = feed.drain_pending();
        debug!(
            "Change {:?} for user {} (+{} queued); refetching",
            event.kind,
            session.user_id(),
            coalesced
        );
        refetch(&bookmarks, &session, &snapshot_tx).await;
    }
    warn!(
        "Change feed {} for user {} ended; live updates stopped",
        feed.id(),
        session.user_id()
    );
}
