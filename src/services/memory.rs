use crate::{
    error::{AppError, Result},
    models::{
        bookmark::{Bookmark, NewBookmark},
        realtime::{ChangeEvent, ChangeKind},
        user::{SessionUser, UserSession},
    },
    services::backend::{Backend, ChangeFeed},
    utils::pkce,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// 进程内的后端实现：身份、书签存储和变更通知
///
/// 行级所有权规则在这里强制执行：查询和删除只作用于令牌所属用户的行，
/// 以其他用户身份插入会被拒绝。
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

struct Inner {
    table: String,
    demo_email: String,
    code_ttl: Duration,
    token_ttl: Duration,
    state: RwLock<State>,
    changes: broadcast::Sender<OwnedChange>,
    active_subscriptions: AtomicUsize,
}

#[derive(Default)]
struct State {
    users_by_email: HashMap<String, SessionUser>,
    tokens: HashMap<String, IssuedToken>,
    pending_codes: HashMap<String, PendingCode>,
    rows: Vec<Bookmark>,
    last_created_at: Option<DateTime<Utc>>,
}

struct PendingCode {
    user: SessionUser,
    challenge: String,
    expires_at: DateTime<Utc>,
}

struct IssuedToken {
    user: SessionUser,
    expires_at: DateTime<Utc>,
}

/// 授权码只需撑过一次跳转往返，与 verifier cookie 的有效期一致
const CODE_TTL_SECONDS: i64 = 600;
/// 与 GoTrue 默认的访问令牌有效期一致
const TOKEN_TTL_SECONDS: i64 = 3600;

impl State {
    // 过期的授权码和令牌在签发新条目时顺带清理
    fn prune_codes(&mut self, now: DateTime<Utc>) {
        self.pending_codes.retain(|_, code| code.expires_at > now);
    }

    fn prune_tokens(&mut self, now: DateTime<Utc>) {
        self.tokens.retain(|_, token| token.expires_at > now);
    }

    fn issue_token(&mut self, user: SessionUser, ttl: Duration) -> String {
        let now = Utc::now();
        self.prune_tokens(now);
        let access_token = format!("mem-{}", Uuid::new_v4());
        self.tokens.insert(
            access_token.clone(),
            IssuedToken {
                user,
                expires_at: now + ttl,
            },
        );
        access_token
    }

    fn token_user(&self, access_token: &str) -> Option<SessionUser> {
        self.tokens
            .get(access_token)
            .filter(|token| token.expires_at > Utc::now())
            .map(|token| token.user.clone())
    }
}

#[derive(Debug, Clone)]
struct OwnedChange {
    owner_id: String,
    event: ChangeEvent,
}

impl InMemoryBackend {
    pub fn new(table: &str, demo_email: &str) -> Self {
        Self::with_expiry(
            table,
            demo_email,
            Duration::seconds(CODE_TTL_SECONDS),
            Duration::seconds(TOKEN_TTL_SECONDS),
        )
    }

    /// 自定义授权码和访问令牌的有效期
    pub fn with_expiry(table: &str, demo_email: &str, code_ttl: Duration, token_ttl: Duration) -> Self {
        let (changes, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(Inner {
                table: table.to_string(),
                demo_email: demo_email.to_string(),
                code_ttl,
                token_ttl,
                state: RwLock::new(State::default()),
                changes,
                active_subscriptions: AtomicUsize::new(0),
            }),
        }
    }

    /// 直接为某个邮箱签发会话，跳过 OAuth 跳转
    pub fn sign_in_as(&self, email: &str) -> UserSession {
        let mut state = self.write();
        let user = Self::user_for(&mut state, email);
        let access_token = state.issue_token(user.clone(), self.inner.token_ttl);
        UserSession { access_token, user }
    }

    /// 当前仍然存活的变更订阅数
    pub fn active_subscriptions(&self) -> usize {
        self.inner.active_subscriptions.load(Ordering::SeqCst)
    }

    /// 当前存储的全部行（不区分用户）
    pub fn row_count(&self) -> usize {
        self.read().rows.len()
    }

    // 锁内不跨越 await，中毒时继续使用内部数据
    fn read(&self) -> RwLockReadGuard<'_, State> {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, State> {
        self.inner.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn user_for(state: &mut State, email: &str) -> SessionUser {
        state
            .users_by_email
            .entry(email.to_string())
            .or_insert_with(|| SessionUser {
                id: Uuid::new_v4().to_string(),
                email: Some(email.to_string()),
            })
            .clone()
    }

    fn authorize(&self, session: &UserSession) -> Result<SessionUser> {
        self.read()
            .token_user(&session.access_token)
            .ok_or_else(|| AppError::unauthorized("Session is not valid"))
    }

    fn publish(&self, owner_id: &str, kind: ChangeKind, at: DateTime<Utc>) {
        let change = OwnedChange {
            owner_id: owner_id.to_string(),
            event: ChangeEvent {
                kind,
                table: self.inner.table.clone(),
                commit_timestamp: Some(at),
            },
        };
        // 没有订阅者时发送失败是正常的
        let _ = self.inner.changes.send(change);
    }
}

#[async_trait]
impl Backend for InMemoryBackend {
    fn authorize_url(&self, provider: &str, redirect_to: &str, code_challenge: &str) -> Result<String> {
        // 自动批准演示用户：直接带着授权码跳回
        let code = Uuid::new_v4().to_string();
        let mut url = url::Url::parse(redirect_to)?;
        url.query_pairs_mut().append_pair("code", &code);

        let now = Utc::now();
        let mut state = self.write();
        state.prune_codes(now);
        let user = Self::user_for(&mut state, &self.inner.demo_email);
        state.pending_codes.insert(
            code,
            PendingCode {
                user,
                challenge: code_challenge.to_string(),
                expires_at: now + self.inner.code_ttl,
            },
        );

        debug!("Issued in-memory {} authorization code", provider);
        Ok(url.to_string())
    }

    async fn exchange_code(&self, auth_code: &str, code_verifier: &str) -> Result<UserSession> {
        let mut state = self.write();
        let pending = state
            .pending_codes
            .remove(auth_code)
            .filter(|code| code.expires_at > Utc::now())
            .ok_or_else(|| AppError::unauthorized("Unknown, used or expired authorization code"))?;

        if pkce::challenge_for(code_verifier) != pending.challenge {
            warn!("PKCE verifier mismatch for in-memory authorization code");
            return Err(AppError::unauthorized("Code verifier does not match"));
        }

        let access_token = state.issue_token(pending.user.clone(), self.inner.token_ttl);
        info!("In-memory sign-in for user {}", pending.user.id);

        Ok(UserSession {
            access_token,
            user: pending.user,
        })
    }

    async fn get_user(&self, access_token: &str) -> Result<Option<SessionUser>> {
        Ok(self.read().token_user(access_token))
    }

    async fn sign_out(&self, access_token: &str) -> Result<()> {
        self.write().tokens.remove(access_token);
        Ok(())
    }

    async fn select_bookmarks(&self, session: &UserSession) -> Result<Vec<Bookmark>> {
        let user = self.authorize(session)?;
        let state = self.read();

        let mut rows: Vec<Bookmark> = state
            .rows
            .iter()
            .filter(|row| row.user_id == user.id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_bookmark(&self, session: &UserSession, row: NewBookmark) -> Result<()> {
        let user = self.authorize(session)?;
        if row.user_id != user.id {
            return Err(AppError::backend("new row violates row-level security policy"));
        }

        let created_at = {
            let mut state = self.write();
            // 保证创建时间严格递增，排序结果稳定
            let mut created_at = Utc::now();
            if let Some(last) = state.last_created_at {
                if created_at <= last {
                    created_at = last + Duration::microseconds(1);
                }
            }
            state.last_created_at = Some(created_at);
            state.rows.push(Bookmark {
                id: Uuid::new_v4().to_string(),
                user_id: row.user_id.clone(),
                title: row.title,
                url: row.url,
                created_at,
            });
            created_at
        };

        self.publish(&user.id, ChangeKind::Insert, created_at);
        Ok(())
    }

    async fn delete_bookmark(&self, session: &UserSession, id: &str) -> Result<()> {
        let user = self.authorize(session)?;

        let removed = {
            let mut state = self.write();
            let before = state.rows.len();
            state.rows.retain(|row| !(row.id == id && row.user_id == user.id));
            before != state.rows.len()
        };

        if removed {
            self.publish(&user.id, ChangeKind::Delete, Utc::now());
        } else {
            debug!("Delete of {} matched no rows owned by {}", id, user.id);
        }
        Ok(())
    }

    async fn subscribe(&self, session: &UserSession) -> Result<ChangeFeed> {
        let user = self.authorize(session)?;
        let (feed, producer) = ChangeFeed::channel();
        let mut upstream = self.inner.changes.subscribe();
        let backend = self.clone();
        let owner_id = user.id;
        let table = self.inner.table.clone();

        self.inner.active_subscriptions.fetch_add(1, Ordering::SeqCst);
        debug!("Opened in-memory subscription {} for {}", producer.id, owner_id);

        tokio::spawn(async move {
            let mut cancelled = producer.cancelled;
            loop {
                tokio::select! {
                    _ = &mut cancelled => break,
                    _ = producer.events.closed() => break,
                    change = upstream.recv() => match change {
                        Ok(change) if change.owner_id == owner_id => {
                            // 队列已满时丢弃：已有待处理事件会触发重新拉取
                            let _ = producer.events.try_send(change.event);
                        }
                        Ok(_) => {}
                        Err(RecvError::Lagged(skipped)) => {
                            warn!("Subscription {} lagged by {} changes", producer.id, skipped);
                            let _ = producer.events.try_send(ChangeEvent {
                                kind: ChangeKind::Update,
                                table: table.clone(),
                                commit_timestamp: None,
                            });
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
            backend.inner.active_subscriptions.fetch_sub(1, Ordering::SeqCst);
            debug!("Closed in-memory subscription {}", producer.id);
        });

        Ok(feed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration as StdDuration};

    fn backend() -> InMemoryBackend {
        InMemoryBackend::new("bookmarks", "demo@example.com")
    }

    fn new_row(session: &UserSession, title: &str) -> NewBookmark {
        NewBookmark {
            title: title.to_string(),
            url: format!("https://{}.example.com", title.to_lowercase()),
            user_id: session.user.id.clone(),
        }
    }

    #[tokio::test]
    async fn test_select_is_owner_scoped_and_newest_first() {
        let backend = backend();
        let alice = backend.sign_in_as("alice@example.com");
        let bob = backend.sign_in_as("bob@example.com");

        backend.insert_bookmark(&alice, new_row(&alice, "First")).await.unwrap();
        backend.insert_bookmark(&bob, new_row(&bob, "Other")).await.unwrap();
        backend.insert_bookmark(&alice, new_row(&alice, "Second")).await.unwrap();

        let rows = backend.select_bookmarks(&alice).await.unwrap();
        let titles: Vec<_> = rows.iter().map(|r| r.title.as_str()).collect();
        assert_eq!(titles, vec!["Second", "First"]);
        assert!(rows.iter().all(|r| r.user_id == alice.user.id));
    }

    #[tokio::test]
    async fn test_insert_for_foreign_owner_is_rejected() {
        let backend = backend();
        let alice = backend.sign_in_as("alice@example.com");
        let bob = backend.sign_in_as("bob@example.com");

        let result = backend.insert_bookmark(&alice, new_row(&bob, "Sneaky")).await;
        assert!(matches!(result, Err(AppError::Backend(_))));
        assert_eq!(backend.row_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_of_foreign_row_is_a_no_op() {
        let backend = backend();
        let alice = backend.sign_in_as("alice@example.com");
        let bob = backend.sign_in_as("bob@example.com");
        backend.insert_bookmark(&bob, new_row(&bob, "Bobs")).await.unwrap();
        let bobs_row = backend.select_bookmarks(&bob).await.unwrap().remove(0);

        backend.delete_bookmark(&alice, &bobs_row.id).await.unwrap();
        backend.delete_bookmark(&alice, "does-not-exist").await.unwrap();
        assert_eq!(backend.select_bookmarks(&bob).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_subscription_sees_only_own_changes() {
        let backend = backend();
        let alice = backend.sign_in_as("alice@example.com");
        let bob = backend.sign_in_as("bob@example.com");
        let mut feed = backend.subscribe(&alice).await.unwrap();

        backend.insert_bookmark(&bob, new_row(&bob, "Other")).await.unwrap();
        backend.insert_bookmark(&alice, new_row(&alice, "Mine")).await.unwrap();

        let event = timeout(StdDuration::from_secs(1), feed.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.kind, ChangeKind::Insert);
        assert_eq!(feed.drain_pending(), (0, true));
    }

    #[tokio::test]
    async fn test_dropping_feed_releases_subscription() {
        let backend = backend();
        let alice = backend.sign_in_as("alice@example.com");
        let feed = backend.subscribe(&alice).await.unwrap();
        assert_eq!(backend.active_subscriptions(), 1);

        drop(feed);
        for _ in 0..100 {
            if backend.active_subscriptions() == 0 {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(5)).await;
        }
        assert_eq!(backend.active_subscriptions(), 0);
    }

    #[tokio::test]
    async fn test_oauth_code_exchange_checks_verifier() {
        let backend = backend();
        let pair = pkce::PkcePair::generate();
        let redirect = backend
            .authorize_url("google", "http://localhost:3000/dashboard", &pair.challenge)
            .unwrap();
        let code = url::Url::parse(&redirect)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap();

        assert!(backend.exchange_code(&code, "wrong-verifier").await.is_err());

        let redirect = backend
            .authorize_url("google", "http://localhost:3000/dashboard", &pair.challenge)
            .unwrap();
        let code = url::Url::parse(&redirect)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap();
        let session = backend.exchange_code(&code, &pair.verifier).await.unwrap();
        assert_eq!(session.user.email.as_deref(), Some("demo@example.com"));
        assert_eq!(
            backend.get_user(&session.access_token).await.unwrap(),
            Some(session.user.clone())
        );

        backend.sign_out(&session.access_token).await.unwrap();
        assert_eq!(backend.get_user(&session.access_token).await.unwrap(), None);
    }

    fn code_from(redirect: &str) -> String {
        url::Url::parse(redirect)
            .unwrap()
            .query_pairs()
            .find(|(k, _)| k == "code")
            .map(|(_, v)| v.into_owned())
            .unwrap()
    }

    #[tokio::test]
    async fn test_abandoned_codes_expire_and_are_pruned() {
        let backend = InMemoryBackend::with_expiry(
            "bookmarks",
            "demo@example.com",
            Duration::zero(),
            Duration::hours(1),
        );
        let pair = pkce::PkcePair::generate();

        let mut last = String::new();
        for _ in 0..5 {
            last = backend
                .authorize_url("google", "http://localhost:3000/dashboard", &pair.challenge)
                .unwrap();
        }
        // 每次签发前清理过期授权码，只剩最新一个
        assert_eq!(backend.read().pending_codes.len(), 1);

        let result = backend.exchange_code(&code_from(&last), &pair.verifier).await;
        assert!(matches!(result, Err(AppError::Authentication(_))));
        assert!(backend.read().pending_codes.is_empty());
    }

    #[tokio::test]
    async fn test_expired_tokens_are_rejected_and_pruned() {
        let backend = InMemoryBackend::with_expiry(
            "bookmarks",
            "demo@example.com",
            Duration::minutes(10),
            Duration::zero(),
        );
        let first = backend.sign_in_as("alice@example.com");
        assert_eq!(backend.get_user(&first.access_token).await.unwrap(), None);
        assert!(backend.select_bookmarks(&first).await.is_err());

        for _ in 0..5 {
            backend.sign_in_as("alice@example.com");
        }
        assert_eq!(backend.read().tokens.len(), 1);
    }
}
