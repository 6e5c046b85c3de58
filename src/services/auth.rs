use crate::{
    config::Config,
    error::{AppError, Result},
    models::user::{Claims, SessionUser, UserSession},
    services::backend::Backend,
    utils::pkce::PkcePair,
};
use chrono::{DateTime, Duration, Utc};
use cookie::{Cookie, SameSite};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// 认证服务：OAuth 登录、会话校验和登出
///
/// 会话本身由后端管理，这里只负责把浏览器携带的令牌解析为 [`UserSession`]。
#[derive(Clone)]
pub struct AuthService {
    config: Config,
    backend: Arc<dyn Backend>,
    user_cache: Arc<RwLock<HashMap<String, CachedUser>>>,
}

#[derive(Debug, Clone)]
struct CachedUser {
    user: SessionUser,
    expires_at: DateTime<Utc>,
}

/// OAuth 登录的起点：跳转地址和需要暂存在浏览器的 PKCE verifier
#[derive(Debug, Clone)]
pub struct SignInStart {
    pub authorize_url: String,
    pub code_verifier: String,
}

impl AuthService {
    pub fn new(config: &Config, backend: Arc<dyn Backend>) -> Self {
        Self {
            config: config.clone(),
            backend,
            user_cache: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 发起 OAuth 登录，登录完成后回到固定的仪表盘地址
    pub fn begin_sign_in(&self) -> Result<SignInStart> {
        let pkce = PkcePair::generate();
        let authorize_url = self.backend.authorize_url(
            &self.config.oauth_provider,
            &self.config.post_login_redirect,
            &pkce.challenge,
        )?;

        debug!("Starting {} sign-in", self.config.oauth_provider);
        Ok(SignInStart {
            authorize_url,
            code_verifier: pkce.verifier,
        })
    }

    /// 用授权码换取会话
    pub async fn complete_sign_in(&self, auth_code: &str, code_verifier: &str) -> Result<UserSession> {
        let session = self.backend.exchange_code(auth_code, code_verifier).await?;
        self.cache_user(&session.access_token, session.user.clone()).await;
        info!("User {} signed in", session.user.id);
        Ok(session)
    }

    /// 本地校验访问令牌（仅在配置了 JWT 密钥时）
    pub fn verify_jwt(&self, token: &str) -> Result<Option<Claims>> {
        let Some(secret) = self.config.supabase_jwt_secret.as_ref() else {
            return Ok(None);
        };

        let decoding_key = DecodingKey::from_secret(secret.as_bytes());
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&["authenticated"]);

        let token_data = decode::<Claims>(token, &decoding_key, &validation)?;
        debug!("JWT token verified for user: {}", token_data.claims.sub);
        Ok(Some(token_data.claims))
    }

    /// 会话守卫：令牌缺失、无效或查询失败时都返回 `None`，不向用户报告原因
    pub async fn current_session(&self, access_token: Option<&str>) -> Option<UserSession> {
        let token = access_token.filter(|t| !t.is_empty())?;

        let claims = match self.verify_jwt(token) {
            Ok(claims) => claims,
            Err(e) => {
                debug!("Rejecting session token: {}", e);
                return None;
            }
        };

        if let Some(user) = self.get_cached_user(token).await {
            return Some(UserSession {
                access_token: token.to_string(),
                user,
            });
        }

        match self.backend.get_user(token).await {
            Ok(Some(user)) => {
                if let Some(claims) = claims {
                    if claims.sub != user.id {
                        warn!("Token subject {} does not match user {}", claims.sub, user.id);
                        return None;
                    }
                }
                self.cache_user(token, user.clone()).await;
                Some(UserSession {
                    access_token: token.to_string(),
                    user,
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Session lookup failed: {}", e);
                None
            }
        }
    }

    /// 需要登录的接口使用
    pub async fn require_session(&self, access_token: Option<&str>) -> Result<UserSession> {
        self.current_session(access_token)
            .await
            .ok_or_else(|| AppError::unauthorized("Not signed in"))
    }

    /// 登出：失败只记录日志，调用方总是继续跳转
    pub async fn sign_out(&self, access_token: &str) {
        self.user_cache.write().await.remove(access_token);
        if let Err(e) = self.backend.sign_out(access_token).await {
            warn!("Sign-out request failed: {}", e);
        }
    }

    async fn get_cached_user(&self, token: &str) -> Option<SessionUser> {
        let cache = self.user_cache.read().await;
        if let Some(cached) = cache.get(token) {
            if cached.expires_at > Utc::now() {
                return Some(cached.user.clone());
            }
        }
        None
    }

    async fn cache_user(&self, token: &str, user: SessionUser) {
        let ttl = Duration::seconds(self.config.user_cache_ttl as i64);
        let mut cache = self.user_cache.write().await;
        cache.insert(
            token.to_string(),
            CachedUser {
                user,
                expires_at: Utc::now() + ttl,
            },
        );
    }

    // 清理过期缓存
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let mut cache = self.user_cache.write().await;
        let before_count = cache.len();
        cache.retain(|_, cached| cached.expires_at > now);
        let removed = before_count - cache.len();
        debug!("Cleaned {} expired user cache entries", removed);
        removed
    }

    pub fn session_cookie(&self, access_token: &str) -> String {
        self.cookie(&self.config.session_cookie, access_token, None)
    }

    pub fn clear_session_cookie(&self) -> String {
        self.cookie(&self.config.session_cookie, "", Some(0))
    }

    /// verifier 只需要在一次跳转往返内有效
    pub fn verifier_cookie(&self, verifier: &str) -> String {
        self.cookie(&self.config.verifier_cookie, verifier, Some(600))
    }

    pub fn clear_verifier_cookie(&self) -> String {
        self.cookie(&self.config.verifier_cookie, "", Some(0))
    }

    pub fn session_cookie_name(&self) -> &str {
        &self.config.session_cookie
    }

    pub fn verifier_cookie_name(&self) -> &str {
        &self.config.verifier_cookie
    }

    fn cookie(&self, name: &str, value: &str, max_age: Option<i64>) -> String {
        let mut builder = Cookie::build(name.to_string(), value.to_string())
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .secure(self.config.cookie_secure);
        if let Some(seconds) = max_age {
            builder = builder.max_age(cookie::time::Duration::seconds(seconds));
        }
        builder.finish().to_string()
    }
}
